use test_case::test_case;

use crate::context::FixpipeInfo;
use crate::test::helpers::*;
use crate::tiling::DoubleBuffer;

#[test_case(DoubleBuffer::default() => 0; "all single")]
#[test_case(DoubleBuffer { pb_al1: 2, pb_bl1: 2, pb_al0: 2, pb_bl0: 2, pb_cl0: 2, pb_ub: 2 } => 0b111111; "all double")]
#[test_case(DoubleBuffer { pb_al0: 2, ..Default::default() } => 0b000001; "al0 is the low bit")]
#[test_case(DoubleBuffer { pb_ub: 2, ..Default::default() } => 0b100000; "ub is the high bit")]
#[test_case(DoubleBuffer { pb_al1: 2, pb_cl0: 2, ..Default::default() } => 0b001100; "al1 and cl0")]
fn pbuffer_flag(db: DoubleBuffer) -> u64 {
    db.pbuffer_flag()
}

#[test]
fn derived_scalars_of_a_pointwise_layer() {
    let record = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform()).plan().unwrap();
    assert_eq!(record.kernel_hxw, 1);
    assert_eq!((record.cin_a_in_core, record.cin_a_tail_in_core), (16, 16));
    assert_eq!((record.cin_b_in_core, record.cin_b_tail_in_core), (16, 16));
    assert_eq!((record.m_step, record.fmap_k_stride), (64, 4));
    assert_eq!((record.n_step, record.k_step), (1, 1));
    assert_eq!(record.weight_k_stride, 1);
    assert_eq!(record.cout_offset_block, 16);
    assert_eq!(record.n_l1_div_block_size, 1);
    assert_eq!(record.org_hixwi, 64);
    assert_eq!(record.cin_offset_block_in_gm, 1024);
    assert_eq!(record.a_l1_space_size, 2048);
}

#[test]
fn shapes_and_attributes_are_copied() {
    let record = Conv::new(64, 56, 56, 64, 3, 1).m_tiler(default_platform()).plan().unwrap();
    assert_eq!((record.org_hi, record.org_wi, record.org_ho, record.org_wo), (56, 56, 56, 56));
    assert_eq!((record.org_ci, record.org_co), (64, 64));
    assert_eq!((record.kernel_h, record.kernel_w, record.kernel_hxw), (3, 3, 9));
    assert_eq!(record.single_core_ho, 56 * 56);
    assert_eq!((record.stride_h, record.dilation_w), (1, 1));
    assert_eq!([record.pad_top, record.pad_bottom, record.pad_left, record.pad_right], [1; 4]);
    assert_eq!(record.groups, 1);
    assert_eq!(record.k_step, record.k_l0 / 16);
    assert!(!record.has_bias);
}

#[test]
fn fixpipe_modes_pass_through() {
    let mut tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    tiler.set_fixpipe_params(FixpipeInfo {
        quant_mode: [1, 2],
        relu_mode: [3, 0],
        clip_mode: [0, 4],
        dual_output: true,
        ..Default::default()
    });
    let record = tiler.plan().unwrap();
    assert_eq!((record.quant_mode0, record.quant_mode1), (1, 2));
    assert_eq!((record.relu_mode0, record.relu_mode1), (3, 0));
    assert_eq!((record.clip_mode0, record.clip_mode1), (0, 4));
    assert!(record.dual_output);
}
