//! チェックポイントのメタデータを表示する

use std::path::PathBuf;

use clap::Parser;

use closet_vision_lib::model::{format_metadata, load_metadata, LabelTranslator};

#[derive(Debug, Parser)]
#[command(name = "inspect_checkpoint", about = "チェックポイント（.tar.gz）の内容を表示")]
struct Args {
    /// チェックポイントのパス
    path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    closet_vision_lib::init_tracing("warn");
    let args = Args::parse();

    let metadata = load_metadata(&args.path)?;
    println!("{}", format_metadata(&metadata));

    match metadata.validate(&LabelTranslator::default()) {
        Ok(()) => println!("✓ 検証OK: このチェックポイントはサーバーで読み込めます"),
        Err(e) => {
            eprintln!("✗ 検証エラー: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
