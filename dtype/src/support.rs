//! Supported operand type combinations.
//!
//! Each table row is `(fmap, weight, [bias,] output)`; lookups are exact.

use crate::ConvDType::{self, *};

/// A candidate operand type combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCombo {
    pub fmap: ConvDType,
    pub weight: ConvDType,
    pub bias: Option<ConvDType>,
    pub output: ConvDType,
}

static FLOAT_NO_BIAS: &[[ConvDType; 3]] = &[
    [Float16, Float16, Float16],
    [BFloat16, BFloat16, BFloat16],
    [Float32, Float32, Float32],
];

static FLOAT_WITH_BIAS: &[[ConvDType; 4]] = &[
    [Float16, Float16, Float16, Float16],
    [Float16, Float16, Float32, Float16],
    [BFloat16, BFloat16, Float32, BFloat16],
    [Float32, Float32, Float32, Float32],
];

static QUANT_NO_BIAS: &[[ConvDType; 3]] = &[
    [Int8, Int8, Float16],
    [Int8, Int8, BFloat16],
    [Int8, Int8, Int8],
    [HiFloat8, HiFloat8, HiFloat8],
    [HiFloat8, HiFloat8, Float16],
    [Float8E4M3, Float8E4M3, Float8E4M3],
    [Float8E4M3, Float8E4M3, Float32],
];

static QUANT_WITH_BIAS: &[[ConvDType; 4]] = &[
    [Int8, Int8, Int32, Float16],
    [Int8, Int8, Int32, BFloat16],
    [Int8, Int8, Int32, Int8],
    [HiFloat8, HiFloat8, Float32, HiFloat8],
    [HiFloat8, HiFloat8, Float32, Float16],
    [Float8E4M3, Float8E4M3, Float32, Float8E4M3],
    [Float8E4M3, Float8E4M3, Float32, Float32],
];

/// Type of the per-channel scale operand on the quantized path.
pub const QUANT_SCALE_DTYPE: ConvDType = Int64;

/// Returns true if the combination appears in the table selected by
/// `quant` and the presence of a bias.
pub fn is_supported(combo: TypeCombo, quant: bool) -> bool {
    let TypeCombo { fmap, weight, bias, output } = combo;
    match (quant, bias) {
        (false, None) => FLOAT_NO_BIAS.contains(&[fmap, weight, output]),
        (false, Some(bias)) => FLOAT_WITH_BIAS.contains(&[fmap, weight, bias, output]),
        (true, None) => QUANT_NO_BIAS.contains(&[fmap, weight, output]),
        (true, Some(bias)) => QUANT_WITH_BIAS.contains(&[fmap, weight, bias, output]),
    }
}
