//! Headless dashboard runner: mounts the screens in ~/.labdash/config.json
//! and keeps them refreshed until interrupted.
//!
//! Usage: `labdash [CONFIG_PATH]` (RUST_LOG=info for progress lines)

use std::path::PathBuf;

use labdash_lib::config::{load_config, load_config_from};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => load_config_from(&path),
        None => load_config(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load labdash config: {e}"))?;

    labdash_lib::run(config).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
