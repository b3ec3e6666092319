pub mod bbmode;
pub mod blockdim;
pub mod buffer;
pub mod config;
pub mod driver;
pub mod hwmode;
pub mod math;
pub mod mmode;
pub mod record;
pub mod ub;
pub mod validate;
