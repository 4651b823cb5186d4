//! Graph assembly.
//!
//! Builds the textual description of the 3-stage streaming graph: a source
//! stage feeding frames in, an inference stage parameterized by framework
//! and model path, and a sink stage the bridge drains results from. The
//! description is handed to [`Engine::instantiate`](crate::engine::Engine)
//! for parsing and instantiation.

use std::path::Path;

use crate::error::{Result, SingleShotError};
use crate::framework::{Capability, Framework};
use crate::tensor::TensorsInfo;

/// Fixed name of the source stage.
pub const SRC_NAME: &str = "src";
/// Fixed name of the inference stage.
pub const INFER_NAME: &str = "infer";
/// Fixed name of the sink stage.
pub const SINK_NAME: &str = "sink";

/// Assemble the description of a 3-stage graph.
///
/// For frameworks that cannot self-describe, both descriptors must be given
/// and are serialized into the inference stage's options so the engine can
/// construct a valid graph.
pub fn assemble(
    framework: Framework,
    model_path: &Path,
    input_info: Option<&TensorsInfo>,
    output_info: Option<&TensorsInfo>,
) -> Result<String> {
    let infer = match framework.capability() {
        Capability::Introspects => format!(
            "tensor-infer name={} framework={} model={}",
            INFER_NAME,
            framework.as_str(),
            model_path.display()
        ),
        Capability::RequiresExplicitShapes => {
            let (input_info, output_info) = match (input_info, output_info) {
                (Some(i), Some(o)) => (i, o),
                _ => {
                    return Err(SingleShotError::invalid_parameter(format!(
                        "framework {} requires explicit input and output descriptors",
                        framework
                    )))
                }
            };
            format!(
                "tensor-infer name={} framework={} model={} \
                 input={} inputtype={} inputname={} \
                 output={} outputtype={} outputname={}",
                INFER_NAME,
                framework.as_str(),
                model_path.display(),
                input_info.dimensions_string(),
                input_info.types_string(),
                input_info.names_string(),
                output_info.dimensions_string(),
                output_info.types_string(),
                output_info.names_string()
            )
        }
    };

    Ok(format!(
        "stream-src name={} ! {} ! stream-sink name={} sync=false",
        SRC_NAME, infer, SINK_NAME
    ))
}
