//! Host-side tiling planner for cube convolution kernels.
//!
//! Given a 2-D convolution (shapes, attributes, data types, layouts) and the
//! on-chip buffer capacities of the target part, the planner decides how the
//! work is split across AI cores and how each core's share is cut into L1
//! and L0 tiles. The result is a flat [`TilingRecord`] the kernel reads.
//!
//! # Module Organization
//!
//! - [`driver`] - setter front end ([`Conv2dTiler`]) and the status-code entry points
//! - [`validate`] - parameter, instruction and block limit checks
//! - [`blockdim`] - core partition decision over factor lattices
//! - [`tiling`] - the three search variants
//!   - [`tiling::mmode`] - flattened output (M) tiling
//!   - [`tiling::hwmode`] - split height/width tiling, with the DMA datapath
//!   - [`tiling::bbmode`] - basic-block tiling in two phases
//! - [`buffer`] - byte accounting of the L0 buffers, bias table and fixpipe
//! - [`ub`] - UB staging steps
//! - [`record`] - the tiling record and its derived scalars
//! - [`config`] - search knobs with environment fallbacks
//!
//! # Example
//!
//! ```
//! use cubetile_device::PlatformInfo;
//! use cubetile_dtype::{ConvDType, ConvFormat};
//! use cubetile_schedule::{Conv2dTiler, TilingRecord};
//!
//! let mut tiler = Conv2dTiler::new(PlatformInfo::builder().build());
//! tiler
//!     .set_org_batch(1)
//!     .set_org_fmap_shape(64, 56, 56)
//!     .set_org_weight_shape(64, 3, 3)
//!     .set_single_weight_shape(64, 3, 3)
//!     .set_single_output_shape_m(64, 56 * 56, 1)
//!     .set_fmap_type(ConvFormat::Nchw, ConvDType::Float16)
//!     .set_weight_type(ConvFormat::Nchw, ConvDType::Float16)
//!     .set_output_type(ConvFormat::Nchw, ConvDType::Float16)
//!     .set_padding(1, 1, 1, 1);
//!
//! let mut record = TilingRecord::default();
//! assert_eq!(tiler.get_tiling(&mut record), 0);
//! assert!(record.k_l0 > 0);
//! ```

pub mod blockdim;
pub mod buffer;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod math;
pub mod record;
pub mod tiling;
pub mod ub;
pub mod validate;

#[cfg(test)]
pub mod test;

pub use blockdim::BlockDimDecision;
pub use config::{InnerBatchPolicy, PlannerConfig};
pub use context::{FixpipeInfo, OutputOrder, RoundMode, TilingContext};
pub use driver::{Conv2dTiler, OptGroupInfo, OriGroupInfo};
pub use error::{Error, Result};
pub use record::TilingRecord;
pub use tiling::{BasicBlockInfo, BbStrategy, TilingAlgorithm, TilingOutcome};
