//! Operand data types and layouts understood by the cube convolution planner.
//!
//! The cube unit consumes operands in fixed-size fractal blocks whose shape
//! depends on the feature-map element width. This crate owns that mapping
//! ([`CubeShape`]), the accumulator type rule, and the read-only tables of
//! supported `(fmap, weight, [bias,] output)` type combinations.

pub mod support;

#[cfg(test)]
pub mod test;

#[cfg(any(test, feature = "proptest"))]
pub mod proptest_gen;

pub use support::{TypeCombo, is_supported};

/// Element types an operand of the convolution can carry.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr, strum::Display)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[enumset(repr = "u32")]
pub enum ConvDType {
    Float16 = 0,
    BFloat16 = 1,
    Float32 = 2,

    /// 8-bit float with tapered precision, quantized path only.
    HiFloat8 = 3,
    Float8E4M3 = 4,

    Int8 = 5,
    Int32 = 6,
    /// Packed per-channel quantization scale.
    Int64 = 7,
}

impl ConvDType {
    /// Element width in bytes.
    pub const fn bytes(&self) -> u64 {
        match self {
            Self::HiFloat8 | Self::Float8E4M3 | Self::Int8 => 1,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 | Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::HiFloat8 | Self::Float8E4M3)
    }

    /// 8-bit float formats that carry extra quantization attribute rules.
    pub const fn is_float8(&self) -> bool {
        matches!(self, Self::HiFloat8 | Self::Float8E4M3)
    }

    /// Accumulator type the cube unit produces for this input type.
    pub const fn mad_dtype(&self) -> ConvDType {
        match self {
            Self::Int8 => Self::Int32,
            _ => Self::Float32,
        }
    }
}

/// Memory layout of a tensor in global memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConvFormat {
    Nchw,
    Nhwc,
    Hwcn,
    /// Fractal weight layout.
    FractalZ,
    /// Fractal weight layout with input channels packed to four.
    FractalZC04,
    /// Plain vector, used for bias and scale.
    Nd,
}

/// Native operand block `(m0, k0, n0)` of the cube unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CubeShape {
    pub m0: u64,
    pub k0: u64,
    pub n0: u64,
}

/// Bytes moved per fractal row.
pub const C0_SIZE: u64 = 32;

const CUBE_MN: u64 = 16;

impl CubeShape {
    /// Block shape for a feature-map element type. K is always one 32-byte row.
    pub const fn for_fmap(fmap: ConvDType) -> Self {
        Self { m0: CUBE_MN, k0: C0_SIZE / fmap.bytes(), n0: CUBE_MN }
    }
}
