//! The single-shot invocation bridge.
//!
//! [`SingleShot`] lets a caller submit one input frame to a continuously
//! running streaming graph and block until exactly one corresponding output
//! frame is available, with bounded waiting and stale-result recovery.
//!
//! Concurrency discipline: a process-wide registry mutex protects a liveness
//! set of handle ids; every operation first proves its handle live under the
//! registry lock, acquires the per-handle lock, and only then releases the
//! registry lock. Close removes the id from the registry before taking the
//! per-handle lock, so an operation racing against close either observes a
//! dead handle and fails fast, or already holds the per-handle lock and is
//! allowed to finish before teardown proceeds. Calls on the same handle
//! serialize; calls on different handles never contend beyond the short
//! registry critical section.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{Engine, Frame, GraphHandles, InferenceStage, WaitOutcome};
use crate::error::{Result, SingleShotError};
use crate::framework::{self, Capability, Framework, HardwareHint};
use crate::graph;
use crate::tensor::{TensorsData, TensorsInfo};

/// Default time to wait for an output frame.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Process-wide liveness registry. Ids are never reused, so a stale clone
/// can never alias a newer handle.
fn registry() -> &'static Mutex<HashSet<u64>> {
    static REGISTRY: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Options for [`SingleShot::open`].
#[derive(Default)]
pub struct OpenOptions {
    /// Explicit input descriptor. Adopted verbatim when given; otherwise
    /// negotiated by introspecting the inference stage.
    pub input_info: Option<TensorsInfo>,
    /// Explicit output descriptor.
    pub output_info: Option<TensorsInfo>,
    /// Explicit framework. Inferred from the model's file extension when
    /// absent.
    pub framework: Option<Framework>,
    /// Requested hardware affinity.
    pub hardware: HardwareHint,
}

/// Invoke protocol state. `AwaitingDrain` records that a previous invoke
/// timed out and its result, should it ever arrive, must be discarded
/// before the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvokeState {
    Idle,
    AwaitingDrain,
}

struct SingleState {
    model: PathBuf,
    graph: GraphHandles,
    input_info: TensorsInfo,
    output_info: TensorsInfo,
    timeout: Duration,
    invoke_state: InvokeState,
}

struct HandleShared {
    id: u64,
    state: Mutex<Option<SingleState>>,
}

impl Drop for HandleShared {
    fn drop(&mut self) {
        let mut live = registry().lock();
        let was_live = live.remove(&self.id);
        drop(live);
        if was_live {
            if let Some(state) = self.state.get_mut().take() {
                debug!(id = self.id, "handle dropped without close, tearing down");
                let _ = teardown(state);
            }
        }
    }
}

fn teardown(mut state: SingleState) -> Result<()> {
    // Stages and the graph itself are released when the state drops; the
    // engine only needs the explicit stop.
    state.graph.control.stop()
}

/// Read the negotiated tensor metadata self-reported by an inference stage.
fn introspect_info(stage: &dyn InferenceStage, is_input: bool) -> Result<TensorsInfo> {
    let prefix = if is_input { "input" } else { "output" };
    let dims = stage.property(prefix)?;
    let types = stage.property(&format!("{}type", prefix))?;
    let names = stage.property(&format!("{}name", prefix))?;
    TensorsInfo::from_property_strings(&dims, &types, &names)
}

/// A handle to one instantiated inference graph.
///
/// Exactly one handle corresponds to exactly one graph. The handle is
/// cloneable; clones share the same graph and serialize against each other.
/// [`close`](SingleShot::close) consumes one clone and invalidates all of
/// them; any later operation on a surviving clone fails with
/// invalid-parameter. Dropping the last clone of an unclosed handle tears
/// the graph down implicitly.
#[derive(Clone)]
pub struct SingleShot {
    shared: Arc<HandleShared>,
}

impl std::fmt::Debug for SingleShot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleShot")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl SingleShot {
    /// Open a model and return a live handle.
    ///
    /// Resolves the framework from the model path (or the explicit hint),
    /// checks engine availability, assembles and instantiates the 3-stage
    /// graph, negotiates the input/output descriptors, bounds the output
    /// stage to a single drop-oldest slot, and starts the graph. Fails
    /// atomically: on any error the partially built graph is stopped and
    /// released, and no handle is registered.
    pub fn open(engine: &dyn Engine, model: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let model = model.as_ref();

        // Validate supplied descriptors before touching the engine.
        if let Some(info) = &options.input_info {
            if !info.is_valid() {
                return Err(SingleShotError::invalid_parameter(
                    "the given input tensor info is invalid",
                ));
            }
        }
        if let Some(info) = &options.output_info {
            if !info.is_valid() {
                return Err(SingleShotError::invalid_parameter(
                    "the given output tensor info is invalid",
                ));
            }
        }

        if !model.is_file() {
            return Err(SingleShotError::invalid_parameter(format!(
                "model path {} is not a regular file",
                model.display()
            )));
        }

        let framework = framework::resolve(model, options.framework)?;
        if framework.capability() == Capability::RequiresExplicitShapes
            && (options.input_info.is_none() || options.output_info.is_none())
        {
            return Err(SingleShotError::invalid_parameter(format!(
                "framework {} requires explicit input and output descriptors",
                framework
            )));
        }

        if !engine.check_available(framework, options.hardware) {
            return Err(SingleShotError::not_supported(format!(
                "framework {} is not available on {}",
                framework, options.hardware
            )));
        }

        let description = graph::assemble(
            framework,
            model,
            options.input_info.as_ref(),
            options.output_info.as_ref(),
        )?;
        let mut graph = engine.instantiate(&description)?;

        // From here on any failure must unwind the instantiated graph.
        let state = match Self::negotiate_and_start(&mut graph, &options) {
            Ok((input_info, output_info)) => SingleState {
                model: model.to_path_buf(),
                graph,
                input_info,
                output_info,
                timeout: DEFAULT_TIMEOUT,
                invoke_state: InvokeState::Idle,
            },
            Err(e) => {
                let _ = graph.control.stop();
                return Err(e);
            }
        };

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        registry().lock().insert(id);
        info!(id, model = %model.display(), framework = %framework, "opened single-shot handle");

        Ok(Self {
            shared: Arc::new(HandleShared {
                id,
                state: Mutex::new(Some(state)),
            }),
        })
    }

    /// Determine the negotiated descriptors (open steps 4–6).
    fn negotiate_and_start(
        graph: &mut GraphHandles,
        options: &OpenOptions,
    ) -> Result<(TensorsInfo, TensorsInfo)> {
        let input_info = match &options.input_info {
            Some(info) => info.clone(),
            None => {
                let info = introspect_info(graph.inference.as_ref(), true)?;
                if !info.is_valid() {
                    return Err(SingleShotError::invalid_parameter(
                        "the introspected input tensor info is invalid",
                    ));
                }
                info
            }
        };

        let output_info = match &options.output_info {
            Some(info) => info.clone(),
            None => {
                let info = introspect_info(graph.inference.as_ref(), false)?;
                if !info.is_valid() {
                    return Err(SingleShotError::invalid_parameter(
                        "the introspected output tensor info is invalid",
                    ));
                }
                info
            }
        };

        // A slow consumer must never queue more than the newest frame.
        graph.output.set_buffer_policy(1, true);
        graph.control.start()?;

        Ok((input_info, output_info))
    }

    /// Run `f` under the two-phase locking discipline: prove liveness under
    /// the registry lock, hold the per-handle lock for the operation.
    fn with_state<R>(&self, f: impl FnOnce(&mut SingleState) -> Result<R>) -> Result<R> {
        let live = registry().lock();
        if !live.contains(&self.shared.id) {
            return Err(SingleShotError::invalid_parameter("the handle is closed"));
        }
        let mut guard = self.shared.state.lock();
        drop(live);

        let state = guard
            .as_mut()
            .ok_or_else(|| SingleShotError::invalid_parameter("the handle is closed"))?;
        f(state)
    }

    /// Invoke the model with one input frame and block for its output.
    ///
    /// The input buffer is borrowed for the duration of this call only; the
    /// returned buffer is owned by the caller. At most one frame is in
    /// flight per handle: invoke is a strictly alternating push/wait
    /// protocol, never pipelined.
    ///
    /// On timeout the handle stays usable; the next invoke discards the
    /// stale result before pushing its own input.
    pub fn invoke(&self, input: &TensorsData) -> Result<TensorsData> {
        self.with_state(|state| {
            if !input.is_compatible(&state.input_info) {
                return Err(SingleShotError::invalid_parameter(
                    "input data does not match the negotiated input descriptor",
                ));
            }

            if state.invoke_state == InvokeState::AwaitingDrain {
                warn!("previous invoke timed out, clearing stale output frame");
                let _ = state.graph.output.try_drain_frame();
                state.invoke_state = InvokeState::Idle;
            }

            let frame = Frame::new(input.blocks().to_vec());
            state.graph.input.push_frame(frame).map_err(|e| match e {
                SingleShotError::Pipe(_) => e,
                other => SingleShotError::pipe(other.to_string()),
            })?;

            match state.graph.output.wait_frame(state.timeout) {
                Ok(WaitOutcome::Frame(frame)) => {
                    let mut out = TensorsData::new_for(&state.output_info)?;
                    if frame.blocks.len() != out.count() {
                        return Err(SingleShotError::unknown(
                            "output frame does not match the negotiated output descriptor",
                        ));
                    }
                    for (dst, src) in out.blocks_mut().iter_mut().zip(frame.blocks.iter()) {
                        if dst.len() != src.len() {
                            return Err(SingleShotError::unknown(
                                "output frame does not match the negotiated output descriptor",
                            ));
                        }
                        dst.copy_from_slice(src);
                    }
                    Ok(out)
                }
                Ok(WaitOutcome::TimedOut) => {
                    state.invoke_state = InvokeState::AwaitingDrain;
                    Err(SingleShotError::TimedOut)
                }
                Err(e) => Err(SingleShotError::unknown(e.to_string())),
            }
        })
    }

    /// The input descriptor negotiated at open time.
    pub fn input_info(&self) -> Result<TensorsInfo> {
        self.with_state(|state| Ok(state.input_info.clone()))
    }

    /// The output descriptor negotiated at open time.
    ///
    /// Policy: this always returns the descriptor captured at open; it never
    /// re-queries the inference stage, so describe and invoke can never
    /// disagree about the output layout.
    pub fn output_info(&self) -> Result<TensorsInfo> {
        self.with_state(|state| Ok(state.output_info.clone()))
    }

    /// The model path this handle was opened with.
    pub fn model_path(&self) -> Result<PathBuf> {
        self.with_state(|state| Ok(state.model.clone()))
    }

    /// The currently configured invoke timeout.
    pub fn timeout(&self) -> Result<Duration> {
        self.with_state(|state| Ok(state.timeout))
    }

    /// Replace the invoke timeout. Takes effect from the next invoke. A
    /// zero duration is invalid and leaves the existing timeout unchanged.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(SingleShotError::invalid_parameter(
                "timeout must be greater than zero",
            ));
        }
        self.with_state(|state| {
            state.timeout = timeout;
            Ok(())
        })
    }

    /// Close the handle and release the graph.
    ///
    /// Liveness is invalidated under the registry lock before the per-handle
    /// lock is taken, so an in-flight invoke finishes first and no new
    /// operation can start. Closing an already-closed handle (via a clone)
    /// fails with invalid-parameter.
    pub fn close(self) -> Result<()> {
        let mut live = registry().lock();
        if !live.remove(&self.shared.id) {
            return Err(SingleShotError::invalid_parameter(
                "the handle is already closed",
            ));
        }
        let mut guard = self.shared.state.lock();
        drop(live);

        info!(id = self.shared.id, "closing single-shot handle");
        match guard.take() {
            Some(state) => teardown(state),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loopback::LoopbackEngine;
    use crate::tensor::{TensorInfo, TensorType};
    use std::fs;

    /// Create an empty model artifact with the given file name under a
    /// unique temp directory.
    fn touch_model(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "streamshot-test-{}-{}",
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    fn u8_info(dims: &[usize]) -> TensorsInfo {
        TensorsInfo::from_entries(vec![TensorInfo::new(TensorType::Uint8, dims.to_vec())])
            .unwrap()
    }

    #[test]
    fn test_open_missing_model_file() {
        let engine = LoopbackEngine::new();
        let err = SingleShot::open(
            &engine,
            "/does/not/exist.tflite",
            OpenOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SingleShotError::InvalidParameter(_)));
    }

    #[test]
    fn test_open_rejects_invalid_descriptor() {
        let engine = LoopbackEngine::new();
        let model = touch_model("m.tflite");
        let bad = TensorsInfo::from_entries(vec![TensorInfo::new(TensorType::Uint8, vec![0])])
            .unwrap();
        let err = SingleShot::open(
            &engine,
            &model,
            OpenOptions {
                input_info: Some(bad),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SingleShotError::InvalidParameter(_)));
    }

    #[test]
    fn test_open_unavailable_hardware() {
        let info = u8_info(&[4]);
        let engine = LoopbackEngine::new().with_model_info(info.clone(), info);
        let model = touch_model("m.tflite");
        let err = SingleShot::open(
            &engine,
            &model,
            OpenOptions {
                hardware: HardwareHint::Gpu,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SingleShotError::NotSupported(_)));
    }

    #[test]
    fn test_open_explicit_shapes_required() {
        let engine = LoopbackEngine::new();
        let model = touch_model("m.pb");
        let err = SingleShot::open(&engine, &model, OpenOptions::default()).unwrap_err();
        assert!(matches!(err, SingleShotError::InvalidParameter(_)));
    }

    #[test]
    fn test_open_introspection_failure_is_fatal() {
        // No metadata and no explicit descriptors: open must fail, not
        // defer the problem to invoke.
        let engine = LoopbackEngine::new();
        let model = touch_model("m.tflite");
        let err = SingleShot::open(&engine, &model, OpenOptions::default()).unwrap_err();
        assert!(matches!(err, SingleShotError::InvalidParameter(_)));
    }

    #[test]
    fn test_describe_returns_negotiated_info() {
        let info = u8_info(&[4]);
        let engine = LoopbackEngine::new().with_model_info(info.clone(), info.clone());
        let model = touch_model("m.tflite");
        let handle = SingleShot::open(&engine, &model, OpenOptions::default()).unwrap();
        assert_eq!(handle.input_info().unwrap(), info);
        assert_eq!(handle.output_info().unwrap(), info);
        handle.close().unwrap();
    }

    #[test]
    fn test_default_timeout() {
        let info = u8_info(&[4]);
        let engine = LoopbackEngine::new().with_model_info(info.clone(), info);
        let model = touch_model("m.tflite");
        let handle = SingleShot::open(&engine, &model, OpenOptions::default()).unwrap();
        assert_eq!(handle.timeout().unwrap(), DEFAULT_TIMEOUT);
        handle.close().unwrap();
    }
}
