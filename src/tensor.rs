//! Tensor descriptors and data buffers.
//!
//! A [`TensorsInfo`] describes the layout of one frame moving through the
//! graph: up to [`MAX_TENSORS`] entries, each with an element type, a
//! dimension vector of at most [`MAX_RANK`] dimensions, and an optional name.
//! A [`TensorsData`] holds the raw memory blocks for one such frame.
//!
//! Descriptors may transiently hold incomplete data while being assembled
//! from stage introspection; validity is a derived property checked with
//! [`TensorsInfo::is_valid`], never enforced at construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SingleShotError};

/// Maximum number of tensors in one frame.
pub const MAX_TENSORS: usize = 16;

/// Maximum rank of a single tensor.
pub const MAX_RANK: usize = 4;

/// Scalar element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Unknown,
}

impl TensorType {
    /// Element width in bytes. Zero for [`TensorType::Unknown`].
    pub fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
            Self::Unknown => 0,
        }
    }

    /// Name used in graph descriptions and stage properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TensorType {
    type Err = SingleShotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::Uint8),
            "int16" => Ok(Self::Int16),
            "uint16" => Ok(Self::Uint16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::Uint32),
            "int64" => Ok(Self::Int64),
            "uint64" => Ok(Self::Uint64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(SingleShotError::invalid_parameter(format!(
                "unknown tensor type: {}",
                other
            ))),
        }
    }
}

/// Shape descriptor for a single tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Optional tensor name.
    #[serde(default)]
    pub name: Option<String>,
    /// Element type.
    pub ty: TensorType,
    /// Dimension vector, innermost first. At most [`MAX_RANK`] entries.
    pub dims: Vec<usize>,
}

impl TensorInfo {
    /// Create an unnamed descriptor.
    pub fn new(ty: TensorType, dims: impl Into<Vec<usize>>) -> Self {
        Self {
            name: None,
            ty,
            dims: dims.into(),
        }
    }

    /// Create a named descriptor.
    pub fn named(name: impl Into<String>, ty: TensorType, dims: impl Into<Vec<usize>>) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            dims: dims.into(),
        }
    }

    /// A descriptor is valid when its type is known, its rank is between 1
    /// and [`MAX_RANK`], and every dimension is at least 1.
    pub fn is_valid(&self) -> bool {
        self.ty != TensorType::Unknown
            && !self.dims.is_empty()
            && self.dims.len() <= MAX_RANK
            && self.dims.iter().all(|&d| d >= 1)
    }

    /// Byte size of one tensor with this shape. Zero when invalid.
    pub fn byte_size(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        self.dims.iter().product::<usize>() * self.ty.size()
    }

    /// Dimensions rendered as `d1:d2:...`.
    fn dims_string(&self) -> String {
        self.dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Ordered set of up to [`MAX_TENSORS`] tensor descriptors. Insertion order
/// is significant and fixed once validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorsInfo {
    entries: Vec<TensorInfo>,
}

impl TensorsInfo {
    /// Create an empty descriptor set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a descriptor set from entries.
    ///
    /// Fails with invalid-parameter when more than [`MAX_TENSORS`] entries
    /// are given.
    pub fn from_entries(entries: impl Into<Vec<TensorInfo>>) -> Result<Self> {
        let entries = entries.into();
        if entries.len() > MAX_TENSORS {
            return Err(SingleShotError::invalid_parameter(format!(
                "too many tensors: {} (max {})",
                entries.len(),
                MAX_TENSORS
            )));
        }
        Ok(Self { entries })
    }

    /// Append one descriptor.
    pub fn push(&mut self, info: TensorInfo) -> Result<()> {
        if self.entries.len() >= MAX_TENSORS {
            return Err(SingleShotError::invalid_parameter(format!(
                "too many tensors (max {})",
                MAX_TENSORS
            )));
        }
        self.entries.push(info);
        Ok(())
    }

    /// Number of tensors.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// True when the set holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The descriptor entries, in order.
    pub fn entries(&self) -> &[TensorInfo] {
        &self.entries
    }

    /// A set is valid when non-empty and every entry is valid. Checking is
    /// idempotent; it never mutates the set.
    pub fn is_valid(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(TensorInfo::is_valid)
    }

    /// Byte size of the tensor at `index`, or zero if out of range.
    pub fn byte_size(&self, index: usize) -> usize {
        self.entries.get(index).map_or(0, TensorInfo::byte_size)
    }

    /// Dimensions of all tensors as `d1:d2,d1:d2:d3,...`.
    pub fn dimensions_string(&self) -> String {
        self.entries
            .iter()
            .map(TensorInfo::dims_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Types of all tensors as `uint8,float32,...`.
    pub fn types_string(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.ty.as_str().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Names of all tensors, comma-joined, with empty slots for unnamed
    /// tensors.
    pub fn names_string(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.name.clone().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a descriptor set from the dimension/type/name property strings
    /// reported by an inference stage.
    ///
    /// The dimensions string is authoritative for the tensor count; a type
    /// or name section with a different count is tolerated with a warning,
    /// leaving the remaining entries typed `unknown` or unnamed (the caller
    /// decides whether the result is usable via [`TensorsInfo::is_valid`]).
    pub fn from_property_strings(dims: &str, types: &str, names: &str) -> Result<Self> {
        let mut out = Self::new();

        for part in dims.split(',').filter(|p| !p.trim().is_empty()) {
            let mut parsed = Vec::new();
            for d in part.split(':') {
                let d: usize = d.trim().parse().map_err(|_| {
                    SingleShotError::invalid_parameter(format!(
                        "malformed dimension string: {}",
                        part
                    ))
                })?;
                parsed.push(d);
            }
            if parsed.len() > MAX_RANK {
                return Err(SingleShotError::invalid_parameter(format!(
                    "rank {} exceeds maximum {}",
                    parsed.len(),
                    MAX_RANK
                )));
            }
            out.push(TensorInfo::new(TensorType::Unknown, parsed))?;
        }

        let types: Vec<&str> = if types.trim().is_empty() {
            Vec::new()
        } else {
            types.split(',').collect()
        };
        if types.len() != out.count() {
            warn!(
                expected = out.count(),
                got = types.len(),
                "tensor type count does not match dimensions"
            );
        }
        for (entry, ty) in out.entries.iter_mut().zip(types.iter()) {
            entry.ty = ty.parse()?;
        }

        let names: Vec<&str> = if names.trim().is_empty() {
            Vec::new()
        } else {
            names.split(',').collect()
        };
        if !names.is_empty() && names.len() != out.count() {
            warn!(
                expected = out.count(),
                got = names.len(),
                "tensor name count does not match dimensions"
            );
        }
        for (entry, name) in out.entries.iter_mut().zip(names.iter()) {
            if !name.trim().is_empty() {
                entry.name = Some(name.trim().to_string());
            }
        }

        Ok(out)
    }
}

/// Raw memory blocks for one frame, parallel in order and count to a
/// [`TensorsInfo`].
///
/// A `TensorsData` returned from invoke is exclusively owned by the caller.
/// A `TensorsData` passed into invoke is borrowed for that call only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TensorsData {
    blocks: Vec<Vec<u8>>,
}

impl TensorsData {
    /// Build a data buffer from raw blocks.
    pub fn from_blocks(blocks: Vec<Vec<u8>>) -> Self {
        Self { blocks }
    }

    /// Allocate zeroed blocks sized per the descriptor set.
    pub fn new_for(info: &TensorsInfo) -> Result<Self> {
        if !info.is_valid() {
            return Err(SingleShotError::invalid_parameter(
                "cannot allocate data for an invalid descriptor set",
            ));
        }
        let blocks = (0..info.count()).map(|i| vec![0u8; info.byte_size(i)]).collect();
        Ok(Self { blocks })
    }

    /// Number of memory blocks.
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    /// The raw blocks, in order.
    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    /// Mutable access to the raw blocks.
    pub fn blocks_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.blocks
    }

    /// Compatible when counts match and every block's byte length equals the
    /// descriptor entry's computed byte size.
    pub fn is_compatible(&self, info: &TensorsInfo) -> bool {
        self.blocks.len() == info.count()
            && self
                .blocks
                .iter()
                .enumerate()
                .all(|(i, b)| b.len() == info.byte_size(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(TensorType::Uint8.size(), 1);
        assert_eq!(TensorType::Int16.size(), 2);
        assert_eq!(TensorType::Float32.size(), 4);
        assert_eq!(TensorType::Uint64.size(), 8);
        assert_eq!(TensorType::Unknown.size(), 0);
    }

    #[test]
    fn test_type_string_round_trip() {
        for ty in [
            TensorType::Int8,
            TensorType::Uint8,
            TensorType::Float32,
            TensorType::Float64,
        ] {
            assert_eq!(ty.as_str().parse::<TensorType>().unwrap(), ty);
        }
        assert!("float16".parse::<TensorType>().is_err());
    }

    #[test]
    fn test_info_validity() {
        let good = TensorInfo::new(TensorType::Uint8, vec![1, 28, 28, 1]);
        assert!(good.is_valid());
        assert_eq!(good.byte_size(), 28 * 28);

        let zero_dim = TensorInfo::new(TensorType::Uint8, vec![1, 0, 28]);
        assert!(!zero_dim.is_valid());
        assert_eq!(zero_dim.byte_size(), 0);

        let no_dims = TensorInfo::new(TensorType::Uint8, vec![]);
        assert!(!no_dims.is_valid());

        let too_deep = TensorInfo::new(TensorType::Uint8, vec![1, 1, 1, 1, 1]);
        assert!(!too_deep.is_valid());

        let unknown = TensorInfo::new(TensorType::Unknown, vec![1]);
        assert!(!unknown.is_valid());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let info = TensorsInfo::from_entries(vec![TensorInfo::new(
            TensorType::Float32,
            vec![1, 10],
        )])
        .unwrap();
        let first = info.is_valid();
        let second = info.is_valid();
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn test_max_tensors() {
        let entries: Vec<_> = (0..MAX_TENSORS)
            .map(|_| TensorInfo::new(TensorType::Uint8, vec![1]))
            .collect();
        let mut info = TensorsInfo::from_entries(entries).unwrap();
        assert!(info.push(TensorInfo::new(TensorType::Uint8, vec![1])).is_err());
        assert_eq!(info.count(), MAX_TENSORS);
    }

    #[test]
    fn test_property_strings_round_trip() {
        let info = TensorsInfo::from_entries(vec![
            TensorInfo::named("in", TensorType::Uint8, vec![1, 28, 28, 1]),
            TensorInfo::new(TensorType::Float32, vec![1, 10]),
        ])
        .unwrap();

        let dims = info.dimensions_string();
        let types = info.types_string();
        let names = info.names_string();
        assert_eq!(dims, "1:28:28:1,1:10");
        assert_eq!(types, "uint8,float32");
        assert_eq!(names, "in,");

        let parsed = TensorsInfo::from_property_strings(&dims, &types, &names).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_property_strings_malformed() {
        assert!(TensorsInfo::from_property_strings("1:x", "uint8", "").is_err());
        assert!(TensorsInfo::from_property_strings("1:1:1:1:1", "uint8", "").is_err());
    }

    #[test]
    fn test_data_compatibility() {
        let info = TensorsInfo::from_entries(vec![TensorInfo::new(
            TensorType::Uint8,
            vec![1, 28, 28, 1],
        )])
        .unwrap();

        let data = TensorsData::new_for(&info).unwrap();
        assert!(data.is_compatible(&info));
        assert_eq!(data.blocks()[0].len(), 28 * 28);

        // One byte short must not be compatible.
        let short = TensorsData::from_blocks(vec![vec![0u8; 28 * 28 - 1]]);
        assert!(!short.is_compatible(&info));

        // Wrong block count must not be compatible.
        let extra = TensorsData::from_blocks(vec![vec![0u8; 28 * 28], vec![0u8; 4]]);
        assert!(!extra.is_compatible(&info));
    }
}
