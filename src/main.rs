//! Open Recorder command line
//!
//! ```bash
//! # Record five seconds of generated test signals (needs FFmpeg)
//! open-recorder
//!
//! # Use a settings file and record ten seconds
//! open-recorder settings.json 10
//!
//! # With verbose logging
//! RUST_LOG=open_recorder_lib=trace open-recorder
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_SECONDS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    open_recorder_lib::init_tracing();

    let mut config: Option<PathBuf> = None;
    let mut seconds = DEFAULT_SECONDS;
    for arg in std::env::args().skip(1) {
        match arg.parse::<u64>() {
            Ok(value) => seconds = value,
            Err(_) if config.is_none() => config = Some(PathBuf::from(arg)),
            Err(_) => anyhow::bail!("Unexpected argument {:?}", arg),
        }
    }

    let output_dir = std::env::current_dir().context("Failed to read the current directory")?;
    let path = open_recorder_lib::run(config.as_deref(), seconds, &output_dir).await?;
    tracing::info!("Saved {}", path.display());
    println!("{}", path.display());
    Ok(())
}
