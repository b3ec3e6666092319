use cubetile_dtype::{ConvDType, ConvFormat};

use crate::buffer::BufferModel;
use crate::context::FixpipeInfo;
use crate::test::helpers::*;
use crate::tiling::DoubleBuffer;

fn double() -> DoubleBuffer {
    DoubleBuffer { pb_al0: 2, pb_bl0: 2, pb_cl0: 2, ..Default::default() }
}

#[test]
fn l0_bytes_scale_with_ping_pong() {
    let ctx = validated(&Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform()));
    let buf = BufferModel::new(&ctx);
    let single = DoubleBuffer::default();
    assert_eq!(buf.al0(16, 16, &single), 512);
    assert_eq!(buf.al0(16, 16, &double()), 1024);
    assert_eq!(buf.bl0(16, 32, &double()), 2048);
    assert_eq!(buf.cl0(16, 16, &single), 1024);
}

#[test]
fn l0_capacity_boundary() {
    let ctx = validated(&Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform()));
    let buf = BufferModel::new(&ctx);
    assert!(buf.l0_fits(128, 64, 128, &double()));
    // 256 x 64 fp16 double buffered fills L0A exactly.
    assert!(buf.l0_fits(256, 64, 16, &double()));
    assert!(!buf.l0_fits(512, 64, 16, &double()));
}

#[test]
fn side_buffers() {
    let mut tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    let ctx = validated(&tiler);
    let buf = BufferModel::new(&ctx);
    assert_eq!(buf.bias_table(16), 0);
    assert_eq!(buf.fixpipe(16), 0);
    assert!(buf.feasible(16, 16, 16, &double()));

    tiler
        .set_bias_type(ConvFormat::Nd, ConvDType::Float16)
        .set_fixpipe_params(FixpipeInfo { channel_wise_coeff: 2.0, ..Default::default() });
    let ctx = validated(&tiler);
    let buf = BufferModel::new(&ctx);
    assert_eq!(buf.bias_table(16), 64);
    assert_eq!(buf.fixpipe(16), 64);
    assert!(buf.side_fits(1024));
    assert!(!buf.side_fits(2048));
}
