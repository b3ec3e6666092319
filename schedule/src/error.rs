use snafu::Snafu;

use cubetile_dtype::{ConvDType, ConvFormat};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("algorithm limit: {reason}"))]
    AlgorithmLimit { reason: &'static str },

    #[snafu(display("invalid attribute {name}: {value}"))]
    InvalidAttr { name: &'static str, value: i64 },

    #[snafu(display("invalid shape {name}: {value}"))]
    InvalidShape { name: &'static str, value: u64 },

    #[snafu(display("unsupported format pair fmap={fmap} weight={weight}"))]
    UnsupportedFormat { fmap: ConvFormat, weight: ConvFormat },

    #[snafu(display("unsupported dtype combination fmap={fmap} weight={weight} bias={bias:?} output={output}"))]
    UnsupportedDType { fmap: ConvDType, weight: ConvDType, bias: Option<ConvDType>, output: ConvDType },

    #[snafu(display("invalid quantization attribute: {reason}"))]
    InvalidQuantAttr { reason: &'static str },

    #[snafu(display("instruction limit exceeded: {reason}"))]
    InstructionLimit { reason: &'static str },

    #[snafu(display("L1 working set {required} exceeds L1 capacity {capacity}"))]
    L1Capacity { required: u64, capacity: u64 },

    #[snafu(display("byte count overflow while sizing {what}"))]
    SizeOverflow { what: &'static str },

    #[snafu(display("no {axis} candidate fits the fixed buffers"))]
    EmptyLattice { axis: &'static str },

    #[snafu(display("output order is not supported here"))]
    UnsupportedOutputOrder,

    #[snafu(display("invalid basic block input: {reason}"))]
    InvalidBasicBlock { reason: &'static str },

    #[snafu(display("basic block limit: {reason}"))]
    BasicBlockLimit { reason: &'static str },

    #[snafu(display("no L1 load strategy fits"))]
    NoL1Strategy,

    #[snafu(display("invalid tiling result: {reason}"))]
    InvalidTilingResult { reason: &'static str },

    #[snafu(display("platform: {source}"))]
    Platform { source: cubetile_device::Error },
}
