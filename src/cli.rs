use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tapedeck")]
#[command(author, version, about = "Frame-accurate playback core for remote fragmented MP4")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a segment index and summarise it
    Inspect {
        /// Index file path or http(s) URL
        #[arg(required = true)]
        source: String,

        /// Also resolve this frame to its segment and seek range
        #[arg(long)]
        frame: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the playback loop against a virtual display clock
    Simulate {
        /// Video frame rate
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Number of frames in the video
        #[arg(long, default_value = "300")]
        frames: u64,

        /// Display refresh rate
        #[arg(long, default_value = "60")]
        display_hz: f64,

        /// Simulated seconds
        #[arg(long, default_value = "10")]
        seconds: f64,

        /// Drop every Nth display callback
        #[arg(long)]
        drop_every: Option<u64>,

        /// Playback rate factor
        #[arg(long, default_value = "1.0")]
        rate: f64,

        /// Play backward from the last frame
        #[arg(long)]
        backward: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a headless playback session against a media descriptor
    Play {
        /// Descriptor file path or http(s) URL
        #[arg(required = true)]
        descriptor: String,

        /// Backend: mse, webcodecs or compatibility
        #[arg(long, default_value = "mse")]
        backend: String,

        /// Starting rendition index
        #[arg(long)]
        rendition: Option<usize>,

        /// Seek to this frame before playing
        #[arg(long)]
        seek: Option<u64>,

        /// Seconds to play
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Playback rate factor
        #[arg(long)]
        rate: Option<f64>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
