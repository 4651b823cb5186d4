//! Command-line interface for streamshot.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run single-shot inference invocations over a streaming engine.
#[derive(Parser, Debug)]
#[command(name = "streamshot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open a model, invoke it once with the given input frame, and print
    /// a JSON summary of the output.
    Invoke {
        /// Path to the model artifact (.tflite, .pb, or .so).
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the input frame file (JSON with tensor type/dims/data,
        /// and optionally explicit output descriptors).
        #[arg(short, long)]
        input: PathBuf,

        /// Explicit framework (tensorflow-lite, tensorflow, custom).
        /// Inferred from the model extension when omitted.
        #[arg(short, long)]
        framework: Option<String>,

        /// Hardware affinity (any, cpu, gpu, npu).
        #[arg(long, default_value = "any")]
        hardware: String,

        /// Invoke timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Output format (json, pretty).
        #[arg(long, default_value = "json")]
        format: String,

        /// Path to an optional YAML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Open a model and print its negotiated input and output descriptors.
    Describe {
        /// Path to the model artifact.
        #[arg(short, long)]
        model: PathBuf,

        /// Path to a JSON file with explicit input/output descriptors
        /// (required for frameworks that cannot self-describe).
        #[arg(short, long)]
        shapes: Option<PathBuf>,

        /// Explicit framework.
        #[arg(short, long)]
        framework: Option<String>,

        /// Hardware affinity.
        #[arg(long, default_value = "any")]
        hardware: String,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
