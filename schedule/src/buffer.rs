//! Byte usage of a tile in every fixed-capacity on-chip buffer.
//!
//! All functions are pure. They never fail; callers compare the result
//! against [`cubetile_device::PlatformInfo`] capacities.

use crate::context::{MAD_DTYPE_SIZE, TilingContext};
use crate::tiling::DoubleBuffer;

/// Buffer sizing bound to one problem.
#[derive(Debug, Clone, Copy)]
pub struct BufferModel<'a> {
    ctx: &'a TilingContext,
}

impl<'a> BufferModel<'a> {
    pub fn new(ctx: &'a TilingContext) -> Self {
        Self { ctx }
    }

    /// Operand A bytes in L0.
    pub fn al0(&self, m: u64, k: u64, db: &DoubleBuffer) -> u64 {
        m * k * db.pb_al0 * self.ctx.fmap_bytes()
    }

    /// Operand B bytes in L0.
    pub fn bl0(&self, k: u64, n: u64, db: &DoubleBuffer) -> u64 {
        k * n * db.pb_bl0 * self.ctx.weight_bytes()
    }

    /// Accumulator bytes in L0.
    pub fn cl0(&self, m: u64, n: u64, db: &DoubleBuffer) -> u64 {
        m * n * db.pb_cl0 * MAD_DTYPE_SIZE
    }

    /// Bias table bytes; the table always holds the accumulator type.
    pub fn bias_table(&self, n: u64) -> u64 {
        if self.ctx.flags.has_bias { n * MAD_DTYPE_SIZE } else { 0 }
    }

    /// Fixpipe buffer bytes.
    pub fn fixpipe(&self, n: u64) -> u64 {
        self.ctx.fixp_l1(n)
    }

    /// True when the three L0 sub-buffers hold the tile.
    pub fn l0_fits(&self, m: u64, k: u64, n: u64, db: &DoubleBuffer) -> bool {
        let p = &self.ctx.platform;
        self.al0(m, k, db) <= p.l0a_size && self.bl0(k, n, db) <= p.l0b_size && self.cl0(m, n, db) <= p.l0c_size
    }

    /// True when the bias table and fixpipe buffer hold `n` channels.
    pub fn side_fits(&self, n: u64) -> bool {
        let p = &self.ctx.platform;
        self.bias_table(n) <= p.bt_size && self.fixpipe(n) <= p.fb_size
    }

    /// Every fixed buffer holds the tile.
    pub fn feasible(&self, m: u64, k: u64, n: u64, db: &DoubleBuffer) -> bool {
        self.l0_fits(m, k, n, db) && self.side_fits(n)
    }
}
