use snafu::Snafu;

use crate::BufferKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A buffer the planner sizes tiles against reports zero bytes.
    #[snafu(display("{buffer} capacity must be non-zero"))]
    ZeroCapacity { buffer: BufferKind },

    #[snafu(display("platform reports no cube cores"))]
    NoCores,

    #[snafu(display("bandwidth coefficient must be non-zero"))]
    ZeroBandwidth,

    /// Unrecognized SoC name.
    #[snafu(display("unknown soc version: {soc}"))]
    UnknownSoc { soc: String },
}
