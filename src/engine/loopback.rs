//! In-process reference engine.
//!
//! `LoopbackEngine` runs one worker thread per instantiated graph. The
//! inference stage applies a configurable transform (identity by default)
//! to each frame, after an optional artificial latency, and deposits the
//! result in the sink mailbox. The mailbox honors the buffer policy set by
//! the bridge: unbounded until configured, then bounded with drop-oldest
//! replacement.
//!
//! Self-reported tensor metadata comes from explicit shape options in the
//! graph description when present, otherwise from metadata supplied at
//! construction (standing in for what a real engine would read from the
//! model artifact).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{Engine, Frame, GraphControl, GraphHandles, InferenceStage, InputStage, OutputStage, WaitOutcome};
use crate::error::{Result, SingleShotError};
use crate::framework::{Capability, Framework, HardwareHint};
use crate::graph::{INFER_NAME, SINK_NAME, SRC_NAME};
use crate::tensor::TensorsInfo;

/// Frame transform applied by the loopback inference stage.
pub type Transform = Arc<dyn Fn(Frame) -> Frame + Send + Sync>;

/// In-process streaming engine. Cheap to construct; each
/// [`instantiate`](Engine::instantiate) call spawns one worker thread.
#[derive(Clone)]
pub struct LoopbackEngine {
    input_info: Option<TensorsInfo>,
    output_info: Option<TensorsInfo>,
    transform: Transform,
    latency: Duration,
}

impl LoopbackEngine {
    /// Identity engine with no model metadata and no added latency.
    pub fn new() -> Self {
        Self {
            input_info: None,
            output_info: None,
            transform: Arc::new(|frame| frame),
            latency: Duration::ZERO,
        }
    }

    /// Set the metadata the inference stage self-reports for introspecting
    /// frameworks.
    pub fn with_model_info(mut self, input: TensorsInfo, output: TensorsInfo) -> Self {
        self.input_info = Some(input);
        self.output_info = Some(output);
        self
    }

    /// Replace the identity transform.
    pub fn with_transform(mut self, f: impl Fn(Frame) -> Frame + Send + Sync + 'static) -> Self {
        self.transform = Arc::new(f);
        self
    }

    /// Add a fixed per-frame latency before each result is produced.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Message from the input stage to the worker.
enum Msg {
    Frame(Frame),
    Stop,
}

/// Sink mailbox shared between the worker and the output stage.
struct Mailbox {
    queue: VecDeque<Frame>,
    depth: Option<usize>,
    drop_oldest: bool,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    arrived: Condvar,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Shared {
    fn deposit(&self, frame: Frame) {
        let mut mailbox = self.mailbox.lock();
        if let Some(depth) = mailbox.depth {
            while mailbox.queue.len() >= depth {
                if mailbox.drop_oldest {
                    debug!("mailbox full, dropping oldest pending frame");
                    mailbox.queue.pop_front();
                } else {
                    debug!("mailbox full, discarding new frame");
                    return;
                }
            }
        }
        mailbox.queue.push_back(frame);
        drop(mailbox);
        self.arrived.notify_one();
    }
}

struct LoopbackInput {
    sender: mpsc::Sender<Msg>,
    shared: Arc<Shared>,
    input_info: Option<TensorsInfo>,
}

impl InputStage for LoopbackInput {
    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) || self.shared.stopped.load(Ordering::SeqCst)
        {
            return Err(SingleShotError::pipe("graph is not running"));
        }
        if let Some(info) = &self.input_info {
            let ok = frame.blocks.len() == info.count()
                && frame
                    .blocks
                    .iter()
                    .enumerate()
                    .all(|(i, b)| b.len() == info.byte_size(i));
            if !ok {
                return Err(SingleShotError::pipe(
                    "pushed frame does not match the stage's input format",
                ));
            }
        }
        self.sender
            .send(Msg::Frame(frame))
            .map_err(|_| SingleShotError::pipe("graph worker is gone"))
    }
}

struct LoopbackInference {
    input_info: Option<TensorsInfo>,
    output_info: Option<TensorsInfo>,
}

impl InferenceStage for LoopbackInference {
    fn property(&self, key: &str) -> Result<String> {
        let value = match key {
            "input" => self.input_info.as_ref().map(TensorsInfo::dimensions_string),
            "inputtype" => self.input_info.as_ref().map(TensorsInfo::types_string),
            "inputname" => self.input_info.as_ref().map(TensorsInfo::names_string),
            "output" => self.output_info.as_ref().map(TensorsInfo::dimensions_string),
            "outputtype" => self.output_info.as_ref().map(TensorsInfo::types_string),
            "outputname" => self.output_info.as_ref().map(TensorsInfo::names_string),
            other => {
                return Err(SingleShotError::invalid_parameter(format!(
                    "unknown stage property: {}",
                    other
                )))
            }
        };
        Ok(value.unwrap_or_default())
    }
}

struct LoopbackOutput {
    shared: Arc<Shared>,
}

impl OutputStage for LoopbackOutput {
    fn wait_frame(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let mut mailbox = self.shared.mailbox.lock();
        if mailbox.queue.is_empty() {
            let timed_out = self
                .shared
                .arrived
                .wait_while_for(&mut mailbox, |m| m.queue.is_empty(), timeout)
                .timed_out();
            if timed_out && mailbox.queue.is_empty() {
                return Ok(WaitOutcome::TimedOut);
            }
        }
        match mailbox.queue.pop_front() {
            Some(frame) => Ok(WaitOutcome::Frame(frame)),
            None => Ok(WaitOutcome::TimedOut),
        }
    }

    fn try_drain_frame(&mut self) -> Option<Frame> {
        self.shared.mailbox.lock().queue.pop_front()
    }

    fn set_buffer_policy(&mut self, depth: usize, drop_oldest: bool) {
        let mut mailbox = self.shared.mailbox.lock();
        mailbox.depth = Some(depth);
        mailbox.drop_oldest = drop_oldest;
        while mailbox.queue.len() > depth {
            mailbox.queue.pop_front();
        }
    }
}

struct LoopbackControl {
    sender: mpsc::Sender<Msg>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl GraphControl for LoopbackControl {
    fn start(&mut self) -> Result<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        // Unblock the worker if it is idle on the channel.
        let _ = self.sender.send(Msg::Stop);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| SingleShotError::pipe("graph worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for LoopbackControl {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Split one stage description into its kind and `key=value` options.
fn parse_stage(stage: &str) -> (Option<&str>, HashMap<&str, &str>) {
    let mut tokens = stage.split_whitespace();
    let kind = tokens.next();
    let options = tokens
        .filter_map(|t| t.split_once('='))
        .collect::<HashMap<_, _>>();
    (kind, options)
}

impl Engine for LoopbackEngine {
    fn check_available(&self, _framework: Framework, hardware: HardwareHint) -> bool {
        matches!(hardware, HardwareHint::Any | HardwareHint::Cpu)
    }

    fn instantiate(&self, description: &str) -> Result<GraphHandles> {
        let stages: Vec<&str> = description.split(" ! ").collect();
        if stages.len() != 3 {
            return Err(SingleShotError::pipe(format!(
                "expected 3 stages, got {}",
                stages.len()
            )));
        }

        let (src_kind, src_opts) = parse_stage(stages[0]);
        let (infer_kind, infer_opts) = parse_stage(stages[1]);
        let (sink_kind, sink_opts) = parse_stage(stages[2]);

        if src_kind != Some("stream-src") || src_opts.get("name") != Some(&SRC_NAME) {
            return Err(SingleShotError::pipe("malformed source stage"));
        }
        if infer_kind != Some("tensor-infer") || infer_opts.get("name") != Some(&INFER_NAME) {
            return Err(SingleShotError::pipe("malformed inference stage"));
        }
        if sink_kind != Some("stream-sink") || sink_opts.get("name") != Some(&SINK_NAME) {
            return Err(SingleShotError::pipe("malformed sink stage"));
        }

        let framework: Framework = infer_opts
            .get("framework")
            .ok_or_else(|| SingleShotError::pipe("inference stage has no framework"))?
            .parse()
            .map_err(|_| SingleShotError::pipe("inference stage has an unknown framework"))?;
        let model = infer_opts
            .get("model")
            .ok_or_else(|| SingleShotError::pipe("inference stage has no model"))?;

        // Explicit shape options in the description win over constructor
        // metadata; introspecting frameworks fall back to the metadata.
        let explicit_input = match infer_opts.get("input") {
            Some(dims) => Some(TensorsInfo::from_property_strings(
                dims,
                infer_opts.get("inputtype").copied().unwrap_or(""),
                infer_opts.get("inputname").copied().unwrap_or(""),
            )?),
            None => None,
        };
        let explicit_output = match infer_opts.get("output") {
            Some(dims) => Some(TensorsInfo::from_property_strings(
                dims,
                infer_opts.get("outputtype").copied().unwrap_or(""),
                infer_opts.get("outputname").copied().unwrap_or(""),
            )?),
            None => None,
        };

        if framework.capability() == Capability::RequiresExplicitShapes
            && (explicit_input.is_none() || explicit_output.is_none())
        {
            return Err(SingleShotError::pipe(format!(
                "framework {} needs explicit shape options in the description",
                framework
            )));
        }

        let input_info = explicit_input.or_else(|| self.input_info.clone());
        let output_info = explicit_output.or_else(|| self.output_info.clone());

        info!(model = %model, framework = %framework, "instantiating loopback graph");

        let shared = Arc::new(Shared {
            mailbox: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                depth: None,
                drop_oldest: false,
            }),
            arrived: Condvar::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        let (sender, receiver) = mpsc::channel::<Msg>();
        let worker_shared = Arc::clone(&shared);
        let transform = Arc::clone(&self.transform);
        let latency = self.latency;
        let worker = thread::Builder::new()
            .name("loopback-worker".into())
            .spawn(move || {
                while let Ok(msg) = receiver.recv() {
                    let frame = match msg {
                        Msg::Frame(frame) => frame,
                        Msg::Stop => break,
                    };
                    if worker_shared.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if !latency.is_zero() {
                        thread::sleep(latency);
                    }
                    let out = transform(frame);
                    worker_shared.deposit(out);
                }
                debug!("loopback worker exiting");
            })
            .map_err(|e| SingleShotError::pipe(format!("failed to spawn graph worker: {}", e)))?;

        Ok(GraphHandles {
            control: Box::new(LoopbackControl {
                sender: sender.clone(),
                shared: Arc::clone(&shared),
                worker: Some(worker),
            }),
            input: Box::new(LoopbackInput {
                sender,
                shared: Arc::clone(&shared),
                input_info: input_info.clone(),
            }),
            inference: Box::new(LoopbackInference {
                input_info,
                output_info,
            }),
            output: Box::new(LoopbackOutput { shared }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use crate::tensor::{TensorInfo, TensorType};
    use std::path::PathBuf;

    fn instantiate_identity() -> GraphHandles {
        let info = TensorsInfo::from_entries(vec![TensorInfo::new(TensorType::Uint8, vec![4])])
            .unwrap();
        let engine = LoopbackEngine::new().with_model_info(info.clone(), info);
        let desc = graph::assemble(
            Framework::TensorFlowLite,
            &PathBuf::from("/m.tflite"),
            None,
            None,
        )
        .unwrap();
        engine.instantiate(&desc).unwrap()
    }

    #[test]
    fn test_push_before_start_fails() {
        let mut handles = instantiate_identity();
        let err = handles
            .input
            .push_frame(Frame::new(vec![vec![0u8; 4]]))
            .unwrap_err();
        assert!(matches!(err, SingleShotError::Pipe(_)));
    }

    #[test]
    fn test_push_format_mismatch_fails() {
        let mut handles = instantiate_identity();
        handles.control.start().unwrap();
        let err = handles
            .input
            .push_frame(Frame::new(vec![vec![0u8; 3]]))
            .unwrap_err();
        assert!(matches!(err, SingleShotError::Pipe(_)));
    }

    #[test]
    fn test_round_trip_and_drain() {
        let mut handles = instantiate_identity();
        handles.control.start().unwrap();
        handles.output.set_buffer_policy(1, true);

        handles
            .input
            .push_frame(Frame::new(vec![vec![1, 2, 3, 4]]))
            .unwrap();
        match handles.output.wait_frame(Duration::from_secs(2)).unwrap() {
            WaitOutcome::Frame(frame) => assert_eq!(frame.blocks[0], vec![1, 2, 3, 4]),
            WaitOutcome::TimedOut => panic!("expected a frame"),
        }
        assert!(handles.output.try_drain_frame().is_none());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let mut handles = instantiate_identity();
        handles.control.start().unwrap();
        handles.output.set_buffer_policy(1, true);

        handles
            .input
            .push_frame(Frame::new(vec![vec![1, 1, 1, 1]]))
            .unwrap();
        handles
            .input
            .push_frame(Frame::new(vec![vec![2, 2, 2, 2]]))
            .unwrap();

        // Give the worker time to process both frames; the mailbox must
        // keep only the newest.
        thread::sleep(Duration::from_millis(200));
        let frame = handles.output.try_drain_frame().expect("expected a frame");
        assert_eq!(frame.blocks[0], vec![2, 2, 2, 2]);
        assert!(handles.output.try_drain_frame().is_none());
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let mut handles = instantiate_identity();
        handles.control.start().unwrap();
        match handles
            .output
            .wait_frame(Duration::from_millis(20))
            .unwrap()
        {
            WaitOutcome::TimedOut => {}
            WaitOutcome::Frame(_) => panic!("no frame was pushed"),
        }
    }

    #[test]
    fn test_introspection_properties() {
        let handles = instantiate_identity();
        assert_eq!(handles.inference.property("input").unwrap(), "4");
        assert_eq!(handles.inference.property("inputtype").unwrap(), "uint8");
        assert!(handles.inference.property("bogus").is_err());
    }

    #[test]
    fn test_explicit_options_win_over_metadata() {
        let meta = TensorsInfo::from_entries(vec![TensorInfo::new(TensorType::Uint8, vec![4])])
            .unwrap();
        let engine = LoopbackEngine::new().with_model_info(meta.clone(), meta);

        let explicit_in =
            TensorsInfo::from_entries(vec![TensorInfo::new(TensorType::Float32, vec![1, 10])])
                .unwrap();
        let desc = graph::assemble(
            Framework::TensorFlow,
            &PathBuf::from("/m.pb"),
            Some(&explicit_in),
            Some(&explicit_in),
        )
        .unwrap();
        let handles = engine.instantiate(&desc).unwrap();
        assert_eq!(handles.inference.property("input").unwrap(), "1:10");
        assert_eq!(handles.inference.property("inputtype").unwrap(), "float32");
    }
}
