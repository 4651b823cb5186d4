//! streamshot: single-shot inference invocations over a streaming engine.
//!
//! A streaming inference graph runs continuously and has no inherent notion
//! of "one request, one response". This crate bridges that gap: it opens a
//! 3-stage graph (source, inference, sink) for one model artifact and lets
//! callers submit one input frame at a time, blocking until exactly one
//! corresponding output frame is available, with bounded waiting and
//! stale-result recovery after timeouts.
//!
//! The streaming engine itself is an external collaborator behind the
//! [`engine::Engine`] trait; [`engine::loopback::LoopbackEngine`] is the
//! bundled in-process reference engine (identity echo) used by the CLI and
//! the test suite.
//!
//! # Example
//!
//! ```no_run
//! use streamshot::engine::loopback::LoopbackEngine;
//! use streamshot::{OpenOptions, SingleShot, TensorInfo, TensorType, TensorsData, TensorsInfo};
//!
//! # fn main() -> streamshot::Result<()> {
//! let info = TensorsInfo::from_entries(vec![
//!     TensorInfo::new(TensorType::Uint8, vec![1, 28, 28, 1]),
//! ])?;
//!
//! let engine = LoopbackEngine::new();
//! let handle = SingleShot::open(
//!     &engine,
//!     "model.tflite",
//!     OpenOptions {
//!         input_info: Some(info.clone()),
//!         output_info: Some(info.clone()),
//!         ..Default::default()
//!     },
//! )?;
//!
//! let input = TensorsData::new_for(&info)?;
//! let output = handle.invoke(&input)?;
//! assert_eq!(output.count(), 1);
//!
//! handle.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod framework;
pub mod graph;
pub mod single;
pub mod tensor;

// Re-export commonly used types
pub use error::{Result, SingleShotError};
pub use framework::{Capability, Framework, HardwareHint};
pub use single::{OpenOptions, SingleShot, DEFAULT_TIMEOUT};
pub use tensor::{TensorInfo, TensorType, TensorsData, TensorsInfo, MAX_RANK, MAX_TENSORS};
