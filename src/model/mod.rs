pub mod checkpoint_metadata;
pub mod checkpoint_storage;
pub mod config;
pub mod labels;

pub use checkpoint_metadata::{
    ArchitectureInfo, CheckpointMetadata, NormalizationInfo, TrainingMetrics, FORMAT_VERSION,
};
pub use checkpoint_storage::{
    checkpoint_path, format_metadata, load_checkpoint, load_metadata, save_checkpoint,
};
pub use config::{
    AppConfig, ColorSettings, DeviceType, IndexSettings, ModelSettings, ServerSettings,
    TrainingSettings,
};
pub use labels::{ClassLabelSet, LabelTranslator, TRANSLATION_TABLE};
