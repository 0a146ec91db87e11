// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "amc-videodec")]
#[command(about = "Hardware media codec video decoder tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a generated stream with the simulated codec and print statistics
    Simulate {
        /// Number of frames to decode
        #[arg(short, long, default_value = "100")]
        frames: u64,

        #[arg(long, default_value = "320")]
        width: u32,

        #[arg(long, default_value = "240")]
        height: u32,

        /// Let the codec return frames out of order
        #[arg(long)]
        reorder: bool,

        /// Input slot size in bytes; smaller than the frame size splits frames
        #[arg(long, default_value = "8192")]
        input_capacity: usize,

        /// Compressed frame size in bytes
        #[arg(long, default_value = "4096")]
        frame_size: usize,

        /// Make the codec silently lose every n-th frame
        #[arg(long)]
        drop_every: Option<usize>,

        /// Decoder configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the frame layout derived for a codec color format
    ColorInfo {
        /// Color format number, decimal or 0x-prefixed hex
        #[arg(long)]
        color_format: String,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Row stride, defaults to the width
        #[arg(long)]
        stride: Option<u32>,

        /// Rows per plane, defaults to the height
        #[arg(long)]
        slice_height: Option<u32>,

        /// Codec component name, enables vendor workarounds
        #[arg(long, default_value = "")]
        codec: String,

        #[arg(long, default_value = "0")]
        crop_left: u32,

        #[arg(long, default_value = "0")]
        crop_right: u32,

        #[arg(long, default_value = "0")]
        crop_top: u32,

        #[arg(long, default_value = "0")]
        crop_bottom: u32,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the codecs of a registry file
    Codecs {
        /// Registry file (JSON)
        #[arg(short, long)]
        registry: PathBuf,

        /// Show which decoder would be used for this codec or stream type
        #[arg(short, long)]
        mime: Option<String>,

        /// Create and release every decoder once to check it can be instantiated
        #[arg(long)]
        probe: bool,
    },

    /// Write the default decoder configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=amc_videodec=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            frames,
            width,
            height,
            reorder,
            input_capacity,
            frame_size,
            drop_every,
            config,
        } => cli::simulate(cli::SimulateArgs {
            frames,
            width,
            height,
            reorder,
            input_capacity,
            frame_size,
            drop_every,
            config,
        }),
        Commands::ColorInfo {
            color_format,
            width,
            height,
            stride,
            slice_height,
            codec,
            crop_left,
            crop_right,
            crop_top,
            crop_bottom,
            json,
        } => cli::color_info(cli::ColorInfoArgs {
            color_format,
            width,
            height,
            stride,
            slice_height,
            codec,
            crop: amc_videodec::formats::Crop {
                left: crop_left,
                right: crop_right,
                top: crop_top,
                bottom: crop_bottom,
            },
            json,
        }),
        Commands::Codecs {
            registry,
            mime,
            probe,
        } => cli::list_codecs(&registry, mime.as_deref(), probe),
        Commands::Config { output } => cli::write_config(&output),
    }
}
