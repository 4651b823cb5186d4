//! CLI entry point for streamshot.
//!
//! Drives the invocation bridge through the in-process loopback engine,
//! which echoes each input frame back as the output. Useful for exercising
//! open/invoke/describe against real descriptor plumbing without a model
//! runtime.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use streamshot::cli::{Cli, Commands};
use streamshot::config::Config;
use streamshot::engine::loopback::LoopbackEngine;
use streamshot::{
    Framework, OpenOptions, SingleShot, TensorInfo, TensorType, TensorsData, TensorsInfo,
};

/// One tensor in the input frame file.
#[derive(Debug, Deserialize)]
struct TensorEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    ty: TensorType,
    dims: Vec<usize>,
    /// Raw bytes of the tensor, little-endian element order.
    #[serde(default)]
    data: Vec<u8>,
}

/// Input frame file: the tensors to push, plus optional explicit output
/// descriptors (defaults to the input layout, matching the loopback echo).
#[derive(Debug, Deserialize)]
struct InputFile {
    tensors: Vec<TensorEntry>,
    #[serde(default)]
    outputs: Vec<TensorEntry>,
}

/// Descriptor-only shapes file used by `describe`.
#[derive(Debug, Deserialize)]
struct ShapesFile {
    #[serde(default)]
    inputs: Vec<TensorEntry>,
    #[serde(default)]
    outputs: Vec<TensorEntry>,
}

fn entries_to_info(entries: &[TensorEntry]) -> Result<TensorsInfo> {
    let mut info = TensorsInfo::new();
    for e in entries {
        let tensor = match &e.name {
            Some(name) => TensorInfo::named(name.clone(), e.ty, e.dims.clone()),
            None => TensorInfo::new(e.ty, e.dims.clone()),
        };
        info.push(tensor)?;
    }
    Ok(info)
}

fn info_to_json(info: &TensorsInfo) -> serde_json::Value {
    serde_json::json!(info
        .entries()
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.name,
                "type": e.ty.as_str(),
                "dims": e.dims,
                "bytes": e.byte_size(),
            })
        })
        .collect::<Vec<_>>())
}

fn parse_open_options(
    framework: Option<&str>,
    hardware: &str,
    input_info: Option<TensorsInfo>,
    output_info: Option<TensorsInfo>,
) -> Result<OpenOptions> {
    let framework = framework
        .map(|f| f.parse::<Framework>())
        .transpose()
        .context("Invalid framework")?;
    let hardware = hardware.parse().context("Invalid hardware hint")?;
    Ok(OpenOptions {
        input_info,
        output_info,
        framework,
        hardware,
    })
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Invoke {
            model,
            input,
            framework,
            hardware,
            timeout_ms,
            format,
            config,
        } => {
            let config = if let Some(config_path) = config {
                Config::from_yaml_file(&config_path)
                    .with_context(|| format!("Failed to load config: {}", config_path.display()))?
            } else {
                Config::default()
            };

            let input_file: InputFile = load_json(&input)?;
            let input_info = entries_to_info(&input_file.tensors)?;
            let output_info = if input_file.outputs.is_empty() {
                input_info.clone()
            } else {
                entries_to_info(&input_file.outputs)?
            };

            let options = parse_open_options(
                framework.as_deref(),
                &hardware,
                Some(input_info),
                Some(output_info),
            )?;

            info!("Opening model: {}", model.display());
            let engine = LoopbackEngine::new();
            let handle = SingleShot::open(&engine, &model, options)?;

            let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.invoke.timeout_ms));
            handle.set_timeout(timeout)?;

            let data = TensorsData::from_blocks(
                input_file.tensors.iter().map(|t| t.data.clone()).collect(),
            );

            info!("Running invoke...");
            let start = Instant::now();
            let result = handle.invoke(&data)?;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            info!(
                "Invoke complete: {} output blocks in {:.2}ms",
                result.count(),
                latency_ms
            );

            let output = serde_json::json!({
                "num_outputs": result.count(),
                "latency_ms": latency_ms,
                "outputs": result.blocks().iter().enumerate().map(|(i, b)| {
                    serde_json::json!({
                        "index": i,
                        "bytes": b.len(),
                        "data": b,
                    })
                }).collect::<Vec<_>>()
            });

            if format == "pretty" {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", serde_json::to_string(&output)?);
            }

            handle.close()?;
        }

        Commands::Describe {
            model,
            shapes,
            framework,
            hardware,
        } => {
            let (input_info, output_info) = match shapes {
                Some(path) => {
                    let shapes: ShapesFile = load_json(&path)?;
                    let inputs = if shapes.inputs.is_empty() {
                        None
                    } else {
                        Some(entries_to_info(&shapes.inputs)?)
                    };
                    let outputs = if shapes.outputs.is_empty() {
                        None
                    } else {
                        Some(entries_to_info(&shapes.outputs)?)
                    };
                    (inputs, outputs)
                }
                None => (None, None),
            };

            let options =
                parse_open_options(framework.as_deref(), &hardware, input_info, output_info)?;

            let engine = LoopbackEngine::new();
            let handle = SingleShot::open(&engine, &model, options)?;

            let output = serde_json::json!({
                "model": model.display().to_string(),
                "input": info_to_json(&handle.input_info()?),
                "output": info_to_json(&handle.output_info()?),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            handle.close()?;
        }
    }

    Ok(())
}
