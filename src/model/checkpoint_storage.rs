//! チェックポイントの永続化
//!
//! メタデータと重みを1つの tar.gz に統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（構成、クラス一覧、学習指標）
//! - model.bin       - モデルの重み（BinBytesRecorder形式）

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::debug;

use crate::error::CheckpointError;
use crate::model::checkpoint_metadata::CheckpointMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先のパスを `.tar.gz` に正規化する
pub fn checkpoint_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)
}

/// メタデータと重みを tar.gz として保存
///
/// 同じディレクトリの一時ファイルに書いてからリネームするため、
/// 書き込み途中で落ちても既存のチェックポイントは壊れません。
pub fn save_checkpoint(
    output_path: &Path,
    metadata: &CheckpointMetadata,
    model_binary: &[u8],
) -> Result<PathBuf, CheckpointError> {
    let tar_gz_path = checkpoint_path(output_path);

    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }

    let mut tmp_name = tar_gz_path.clone().into_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let json = metadata.to_json_string()?;
    let write = || -> std::io::Result<()> {
        let file = File::create(&tmp_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes())?;
        append_entry(&mut builder, MODEL_ENTRY, model_binary)?;

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()
    };

    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(CheckpointError::io(&tmp_path, e));
    }

    std::fs::rename(&tmp_path, &tar_gz_path).map_err(|e| CheckpointError::io(&tar_gz_path, e))?;

    debug!(
        path = %tar_gz_path.display(),
        model_bytes = model_binary.len(),
        "チェックポイントを書き込みました"
    );

    Ok(tar_gz_path)
}

/// 必要なエントリだけを読み出す
fn read_entries(
    tar_gz_path: &Path,
    want_model: bool,
) -> Result<(Option<String>, Option<Vec<u8>>), CheckpointError> {
    let io_err = |e| CheckpointError::io(tar_gz_path, e);

    let file = File::open(tar_gz_path).map_err(io_err)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut json = None;
    let mut binary = None;

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let path = entry.path().map_err(io_err)?.to_string_lossy().into_owned();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut s = String::new();
                entry.read_to_string(&mut s).map_err(io_err)?;
                json = Some(s);
            }
            MODEL_ENTRY if want_model => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer).map_err(io_err)?;
                binary = Some(buffer);
            }
            _ => {}
        }

        if json.is_some() && (!want_model || binary.is_some()) {
            break;
        }
    }

    Ok((json, binary))
}

/// メタデータのみを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<CheckpointMetadata, CheckpointError> {
    let (json, _) = read_entries(tar_gz_path, false)?;
    let json = json.ok_or(CheckpointError::MissingEntry(METADATA_ENTRY))?;
    CheckpointMetadata::from_json_string(&json)
}

/// メタデータと重みを共に読み込む
pub fn load_checkpoint(
    tar_gz_path: &Path,
) -> Result<(CheckpointMetadata, Vec<u8>), CheckpointError> {
    let (json, binary) = read_entries(tar_gz_path, true)?;
    let json = json.ok_or(CheckpointError::MissingEntry(METADATA_ENTRY))?;
    let binary = binary.ok_or(CheckpointError::MissingEntry(MODEL_ENTRY))?;
    Ok((CheckpointMetadata::from_json_string(&json)?, binary))
}

/// メタデータを人が読める形に整形
pub fn format_metadata(metadata: &CheckpointMetadata) -> String {
    let arch = &metadata.architecture;
    let m = &metadata.metrics;
    let mut out = String::new();
    out.push_str("=== チェックポイント ===\n");
    out.push_str(&format!("形式バージョン: {}\n", metadata.format_version));
    out.push_str(&format!(
        "構成: ResNet layers={:?} base_width={} classes={}\n",
        arch.layers, arch.base_width, arch.num_classes
    ));
    out.push_str(&format!(
        "入力サイズ: {0}x{0}\n",
        metadata.input_size
    ));
    out.push_str("クラス:\n");
    for (i, (token, label)) in metadata
        .raw_class_tokens
        .iter()
        .zip(metadata.class_labels.iter())
        .enumerate()
    {
        out.push_str(&format!("  {i:>2}: {token} -> {label}\n"));
    }
    out.push_str(&format!("エポック: {}/{}\n", m.epoch, m.num_epochs));
    out.push_str(&format!(
        "検証精度: {:.2}%  学習精度: {:.2}%  学習損失: {:.4}\n",
        m.validation_accuracy * 100.0,
        m.train_accuracy * 100.0,
        m.train_loss
    ));
    out.push_str(&format!("学習日時: {}\n", metadata.trained_at));
    out.push_str("========================");
    out
}
