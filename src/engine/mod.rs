//! The streaming-engine interface.
//!
//! The engine is an opaque collaborator: it parses a graph description,
//! instantiates the named stages, and runs the graph on its own worker
//! thread(s), independent of any single invoke call. The bridge consumes it
//! only through the narrow traits in this module.
//!
//! [`loopback::LoopbackEngine`] is an in-process reference implementation
//! used by the `streamshot` binary and the test suite.

pub mod loopback;

use std::time::Duration;

use crate::error::Result;

/// One complete set of tensor blocks moving through a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Raw memory blocks, one per tensor.
    pub blocks: Vec<Vec<u8>>,
}

impl Frame {
    /// Build a frame from raw blocks.
    pub fn new(blocks: Vec<Vec<u8>>) -> Self {
        Self { blocks }
    }
}

/// Outcome of a bounded wait on an output stage.
#[derive(Debug)]
pub enum WaitOutcome {
    /// A frame arrived within the bound.
    Frame(Frame),
    /// No frame arrived within the bound.
    TimedOut,
}

/// The stage frames are submitted to.
pub trait InputStage: Send {
    /// Submit one frame. Ownership of the frame passes to the engine; a
    /// failure here is a pipe error (e.g. the engine rejected the format).
    fn push_frame(&mut self, frame: Frame) -> Result<()>;
}

/// The stage that runs the model. Exposes string properties for shape
/// introspection.
pub trait InferenceStage: Send {
    /// Read a stage property. Recognized keys are `input`, `inputtype`,
    /// `inputname`, `output`, `outputtype`, `outputname`; each returns the
    /// serialized string form (empty when the stage cannot self-describe).
    fn property(&self, key: &str) -> Result<String>;
}

/// The stage results are drained from.
pub trait OutputStage: Send {
    /// Block until one frame is available or the timeout elapses.
    fn wait_frame(&mut self, timeout: Duration) -> Result<WaitOutcome>;

    /// Non-blocking drain of one buffered frame, if any.
    fn try_drain_frame(&mut self) -> Option<Frame>;

    /// Bound the stage's buffer to `depth` pending frames. With
    /// `drop_oldest`, a new arrival replaces the oldest pending frame
    /// instead of blocking the producer.
    fn set_buffer_policy(&mut self, depth: usize, drop_oldest: bool);
}

/// Lifecycle control for an instantiated graph.
pub trait GraphControl: Send {
    /// Request the transition to running. Asynchronous: returns once the
    /// transition is requested, not once streaming is active.
    fn start(&mut self) -> Result<()>;

    /// Stop the graph and release its workers.
    fn stop(&mut self) -> Result<()>;
}

/// The three named stages of an instantiated graph plus its control handle.
pub struct GraphHandles {
    pub control: Box<dyn GraphControl>,
    pub input: Box<dyn InputStage>,
    pub inference: Box<dyn InferenceStage>,
    pub output: Box<dyn OutputStage>,
}

/// A streaming engine that can instantiate graphs from descriptions.
pub trait Engine {
    /// Whether the engine supports the given framework on the given
    /// hardware.
    fn check_available(
        &self,
        framework: crate::framework::Framework,
        hardware: crate::framework::HardwareHint,
    ) -> bool;

    /// Parse and instantiate a graph description, returning handles to its
    /// named stages. Any construction failure is a pipe error.
    fn instantiate(&self, description: &str) -> Result<GraphHandles>;
}
