//! Platform description for the cube convolution planner.
//!
//! The planner never queries hardware itself; callers describe the target
//! with a [`PlatformInfo`], either from a [`SocVersion`] preset or through the
//! builder.

pub mod error;
pub mod platform;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use platform::{BufferKind, PlatformInfo, SocVersion};
