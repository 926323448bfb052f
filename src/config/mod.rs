mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./tapedeck.toml",
        "~/.config/tapedeck/config.toml",
        "/etc/tapedeck/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.buffer.slot_count == 0 {
        anyhow::bail!("buffer.slot_count cannot be 0");
    }
    if config.buffer.slot_capacity_bytes == 0 {
        anyhow::bail!("buffer.slot_capacity_bytes cannot be 0");
    }

    let download = &config.download;
    if download.request_timeout_secs == 0 {
        anyhow::bail!("download.request_timeout_secs cannot be 0");
    }
    if download.min_block_bytes == 0 {
        anyhow::bail!("download.min_block_bytes cannot be 0");
    }
    if download.event_channel_capacity == 0 {
        anyhow::bail!("download.event_channel_capacity cannot be 0");
    }
    if download.initial_backoff_ms > download.max_backoff_ms {
        anyhow::bail!(
            "download.initial_backoff_ms ({}) exceeds download.max_backoff_ms ({})",
            download.initial_backoff_ms,
            download.max_backoff_ms
        );
    }
    if download.on_demand_lookahead_secs <= 0.0 {
        anyhow::bail!("download.on_demand_lookahead_secs must be positive");
    }

    let playback = &config.playback;
    if playback.default_monitor_fps <= 0.0 {
        anyhow::bail!("playback.default_monitor_fps must be positive");
    }
    if playback.frame_queue_depth == 0 {
        anyhow::bail!("playback.frame_queue_depth cannot be 0");
    }
    if !(0.0..=1.0).contains(&playback.safe_mode_threshold) {
        anyhow::bail!("playback.safe_mode_threshold must be within 0.0..=1.0");
    }
    if playback.calibration_samples < 2 {
        tracing::warn!(
            "playback.calibration_samples = {} is too few to calibrate; the default monitor rate will be kept",
            playback.calibration_samples
        );
    }

    if config.codec.max_in_flight == 0 {
        anyhow::bail!("codec.max_in_flight cannot be 0");
    }

    Ok(())
}
