mod common;

use closet_vision_lib::model::AppConfig;
use closet_vision_lib::service::{AnalysisService, MODEL_NOT_LOADED};

fn config_for(checkpoint: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.model.checkpoint_path = checkpoint.to_string_lossy().into_owned();
    config
}

#[test]
fn analyze_blue_shirt_with_tiny_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = common::write_tiny_checkpoint(dir.path(), &["Kaos", "Rok", "Jeans", "Polo"]);

    let service = AnalysisService::from_config(&config_for(&checkpoint));
    assert!(service.is_ready());
    assert_eq!(
        service.labels().unwrap().as_slice(),
        &["T-Shirt", "Skirt", "Jeans", "Polo Shirt"]
    );

    let record = service.analyze(&common::png_bytes([20, 30, 200], 64, 48));
    assert!(record.is_success());

    let clothing = record.clothing().unwrap();
    assert_eq!(clothing.top_predictions.len(), 3);
    assert_eq!(clothing.predicted_class, clothing.top_predictions[0].class_name);

    let colors = record.colors().unwrap();
    assert_eq!(colors.dominant_color.name.as_str(), "Blue");
    assert_eq!(colors.palette.len(), 1);
    assert_eq!(colors.palette[0], colors.dominant_color);
}

#[test]
fn same_image_gives_same_record() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = common::write_tiny_checkpoint(dir.path(), &["Kemeja", "Mantel"]);
    let service = AnalysisService::from_config(&config_for(&checkpoint));

    let bytes = common::png_bytes([200, 40, 40], 50, 50);
    assert_eq!(service.analyze(&bytes), service.analyze(&bytes));
}

#[test]
fn corrupt_checkpoint_leaves_service_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.tar.gz");
    std::fs::write(&path, b"not a tarball").unwrap();

    let service = AnalysisService::from_config(&config_for(&path));
    assert!(!service.is_ready());
    assert!(service.unloaded_reason().is_some());

    let record = service.analyze(&common::png_bytes([0, 0, 0], 8, 8));
    assert_eq!(record.error(), Some(MODEL_NOT_LOADED));
}

#[test]
fn undecodable_image_is_a_prediction_failure() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = common::write_tiny_checkpoint(dir.path(), &["Kaos", "Rok"]);
    let service = AnalysisService::from_config(&config_for(&checkpoint));

    let record = service.analyze(b"definitely not an image");
    assert!(!record.is_success());
    assert_eq!(record.error(), Some("Prediction failed"));
}
