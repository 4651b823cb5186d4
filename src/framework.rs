//! Framework resolution.
//!
//! Maps a model artifact path (plus an optional explicit framework hint) to
//! a concrete backend, validated against file-extension convention. Whether
//! a framework can self-describe its tensor shapes is a declared capability,
//! not a runtime guess.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SingleShotError};

/// Concrete inference framework selected for a model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    /// TensorFlow Lite flatbuffer models (`.tflite`). Self-describing.
    #[serde(rename = "tensorflow-lite")]
    TensorFlowLite,
    /// TensorFlow frozen graphs (`.pb`). Cannot be introspected without
    /// executing them; requires explicit input and output descriptors.
    #[serde(rename = "tensorflow")]
    TensorFlow,
    /// Custom filter shared objects (`.so`). Self-describing.
    #[serde(rename = "custom")]
    Custom,
}

/// Whether a framework can report its own tensor shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The inference stage self-reports dimension/type/name strings.
    Introspects,
    /// The caller must supply both input and output descriptors.
    RequiresExplicitShapes,
}

impl Framework {
    /// File extension expected for this framework's model artifacts.
    pub fn expected_extension(&self) -> &'static str {
        match self {
            Self::TensorFlowLite => "tflite",
            Self::TensorFlow => "pb",
            Self::Custom => "so",
        }
    }

    /// Identifier used in graph descriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TensorFlowLite => "tensorflow-lite",
            Self::TensorFlow => "tensorflow",
            Self::Custom => "custom",
        }
    }

    /// Shape-discovery capability of this framework.
    pub fn capability(&self) -> Capability {
        match self {
            Self::TensorFlowLite | Self::Custom => Capability::Introspects,
            Self::TensorFlow => Capability::RequiresExplicitShapes,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = SingleShotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tensorflow-lite" | "tflite" => Ok(Self::TensorFlowLite),
            "tensorflow" | "tf" => Ok(Self::TensorFlow),
            "custom" => Ok(Self::Custom),
            other => Err(SingleShotError::invalid_parameter(format!(
                "unknown framework: {}",
                other
            ))),
        }
    }
}

/// Hardware affinity requested for the selected framework.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareHint {
    /// Any available processor.
    #[default]
    Any,
    Cpu,
    Gpu,
    Npu,
}

impl fmt::Display for HardwareHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Any => "any",
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Npu => "npu",
        };
        f.write_str(s)
    }
}

impl FromStr for HardwareHint {
    type Err = SingleShotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "npu" => Ok(Self::Npu),
            other => Err(SingleShotError::invalid_parameter(format!(
                "unknown hardware hint: {}",
                other
            ))),
        }
    }
}

/// Lower-cased extension of a model path, if any.
fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Resolve the framework for a model artifact.
///
/// Without a hint the framework is inferred from the artifact's file
/// extension; an unrecognized extension is an invalid-parameter error. With
/// a hint, the extension must match the hint's expected extension.
pub fn resolve(model_path: &Path, hint: Option<Framework>) -> Result<Framework> {
    let ext = extension_of(model_path);

    match hint {
        Some(framework) => {
            if ext.as_deref() != Some(framework.expected_extension()) {
                return Err(SingleShotError::invalid_parameter(format!(
                    "model {} does not have the {} extension expected for {}",
                    model_path.display(),
                    framework.expected_extension(),
                    framework
                )));
            }
            Ok(framework)
        }
        None => {
            let framework = match ext.as_deref() {
                Some("tflite") => Framework::TensorFlowLite,
                Some("pb") => Framework::TensorFlow,
                Some("so") => Framework::Custom,
                _ => {
                    return Err(SingleShotError::invalid_parameter(format!(
                        "model {} has an unknown extension",
                        model_path.display()
                    )))
                }
            };
            info!(model = %model_path.display(), framework = %framework, "inferred framework from extension");
            Ok(framework)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_resolve_from_extension() {
        let p = PathBuf::from("/models/mnist.tflite");
        assert_eq!(resolve(&p, None).unwrap(), Framework::TensorFlowLite);

        let p = PathBuf::from("/models/frozen.pb");
        assert_eq!(resolve(&p, None).unwrap(), Framework::TensorFlow);

        let p = PathBuf::from("/models/passthrough.so");
        assert_eq!(resolve(&p, None).unwrap(), Framework::Custom);

        // Extension matching is case-insensitive.
        let p = PathBuf::from("/models/MNIST.TFLITE");
        assert_eq!(resolve(&p, None).unwrap(), Framework::TensorFlowLite);
    }

    #[test]
    fn test_resolve_unknown_extension() {
        let p = PathBuf::from("/models/model.onnx");
        assert!(matches!(
            resolve(&p, None),
            Err(SingleShotError::InvalidParameter(_))
        ));

        let p = PathBuf::from("/models/model");
        assert!(resolve(&p, None).is_err());
    }

    #[test]
    fn test_resolve_hint_mismatch() {
        let p = PathBuf::from("/models/mnist.tflite");
        assert!(resolve(&p, Some(Framework::TensorFlow)).is_err());
        assert_eq!(
            resolve(&p, Some(Framework::TensorFlowLite)).unwrap(),
            Framework::TensorFlowLite
        );
    }

    #[test]
    fn test_capabilities() {
        assert_eq!(
            Framework::TensorFlowLite.capability(),
            Capability::Introspects
        );
        assert_eq!(Framework::Custom.capability(), Capability::Introspects);
        assert_eq!(
            Framework::TensorFlow.capability(),
            Capability::RequiresExplicitShapes
        );
    }

    #[test]
    fn test_framework_from_str() {
        assert_eq!(
            "tensorflow-lite".parse::<Framework>().unwrap(),
            Framework::TensorFlowLite
        );
        assert_eq!("tf".parse::<Framework>().unwrap(), Framework::TensorFlow);
        assert!("caffe".parse::<Framework>().is_err());
    }
}
