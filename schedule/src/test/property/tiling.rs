//! Whole-planner invariants over generated layers.

use proptest::prelude::*;

use cubetile_dtype::{ConvDType, ConvFormat};

use crate::buffer::BufferModel;
use crate::context::OutputOrder;
use crate::driver::Conv2dTiler;
use crate::math::{ceil_div, gcd};
use crate::test::helpers::*;
use crate::tiling::bbmode::BbTiling;
use crate::tiling::hwmode::HwTiling;
use crate::tiling::mmode::MTiling;
use crate::tiling::{BasicBlockInfo, TilingAlgorithm};
use crate::validate::{self, CheckScope, LOAD3D_MAX_STRIDE};

#[derive(Debug, Clone, Copy)]
struct Layer {
    conv: Conv,
    bias: bool,
    order: OutputOrder,
}

impl Layer {
    fn tiler(&self) -> Conv2dTiler {
        let mut tiler = match self.order {
            OutputOrder::M => self.conv.m_tiler(default_platform()),
            OutputOrder::Hw => self.conv.hw_tiler(default_platform()),
        };
        if self.bias {
            tiler.set_bias_type(ConvFormat::Nd, ConvDType::Float16);
        }
        tiler
    }
}

fn layer() -> impl Strategy<Value = Layer> {
    (
        (1u64..=128, 1u64..=64, 1u64..=64, 1u64..=256),
        prop_oneof![Just(1u64), Just(3), Just(5)],
        0u64..=2,
        1u64..=4,
        any::<bool>(),
        prop_oneof![Just(OutputOrder::M), Just(OutputOrder::Hw)],
    )
        .prop_map(|((ci, hi, wi, co), k, pad, batch, bias, order)| Layer {
            conv: Conv { batch, ..Conv::new(ci, hi, wi, co, k, pad) },
            bias,
            order,
        })
        .prop_filter("output must be non-empty", |l| l.conv.ho() > 0 && l.conv.wo() > 0)
}

/// Split layout with a stride past the load-3D limit, so the direct copy
/// datapath tiles it.
fn dma_layer() -> impl Strategy<Value = Layer> {
    (
        (1u64..=128, 64u64..=200, 64u64..=200, 1u64..=256),
        prop_oneof![Just(1u64), Just(3), Just(5)],
        0u64..=2,
        64u64..=80,
        1u64..=4,
        any::<bool>(),
    )
        .prop_map(|((ci, hi, wi, co), k, pad, stride, batch, bias)| Layer {
            conv: Conv { batch, stride, ..Conv::new(ci, hi, wi, co, k, pad) },
            bias,
            order: OutputOrder::Hw,
        })
        .prop_filter("output must be non-empty", |l| l.conv.ho() > 0 && l.conv.wo() > 0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn planning_is_deterministic(layer in layer()) {
        let tiler = layer.tiler();
        let (a, b) = (tiler.plan(), tiler.plan());
        prop_assert_eq!(a.is_ok(), b.is_ok());
        prop_assert_eq!(a.ok(), b.ok());
    }

    #[test]
    fn tiles_fit_the_fixed_buffers(layer in layer()) {
        let tiler = layer.tiler();
        let mut ctx = tiler.build_context().unwrap();
        if validate::check_params(&mut ctx, CheckScope::Full).is_err() {
            return Ok(());
        }
        ctx.infer_5hd();
        let outcome = match ctx.order {
            OutputOrder::M => MTiling::new(&ctx).process(),
            OutputOrder::Hw => HwTiling::new(&ctx).process(),
        };
        let Ok(outcome) = outcome else { return Ok(()) };

        let p = &ctx.platform;
        let buf = BufferModel::new(&ctx);
        let l0 = &outcome.l0;
        let m = match ctx.order {
            OutputOrder::M => l0.m_l0,
            OutputOrder::Hw => l0.ho_l0 * l0.wo_l0,
        };
        prop_assert!(buf.al0(m, l0.k_l0, &outcome.db) <= p.l0a_size);
        prop_assert!(buf.bl0(l0.k_l0, l0.n_l0, &outcome.db) <= p.l0b_size);
        prop_assert!(buf.cl0(m, l0.n_l0, &outcome.db) <= p.l0c_size);
        prop_assert!(buf.bias_table(l0.n_l0) <= p.bt_size);
        prop_assert!(buf.fixpipe(l0.n_l0) <= p.fb_size);
    }

    #[test]
    fn tiles_fit_l1(layer in prop_oneof![layer(), dma_layer()]) {
        let tiler = layer.tiler();
        let mut ctx = tiler.build_context().unwrap();
        if validate::check_params(&mut ctx, CheckScope::Full).is_err() {
            return Ok(());
        }
        prop_assert!(ctx.is_dma || layer.conv.stride <= LOAD3D_MAX_STRIDE);
        ctx.infer_5hd();
        let used = match ctx.order {
            OutputOrder::M => MTiling::new(&ctx).process().and_then(|o| MTiling::l1_bytes(&ctx, &o)),
            OutputOrder::Hw => HwTiling::new(&ctx).process().map(|o| HwTiling::l1_bytes(&ctx, &o)),
        };
        if let Ok(used) = used {
            prop_assert!(used <= ctx.platform.l1_size, "{} > {}", used, ctx.platform.l1_size);
        }
    }

    #[test]
    fn basic_block_tiles_fit_l1(
        (ci, hw, co) in (1u64..=128, 32u64..=96, 16u64..=512),
        k in prop_oneof![Just(1u64), Just(3)],
        batch in 1u64..=16,
        f_dim in prop_oneof![Just(2u64), Just(4), Just(8), Just(16)],
        n_dim in prop_oneof![Just(1u64), Just(2)],
        bias in any::<bool>(),
    ) {
        let conv = Conv { batch, ..Conv::new(ci, hw, hw, co, k, k / 2) };
        let howo = conv.ho() * conv.wo();
        let batch_dim = gcd(batch, f_dim);
        let m_dim = f_dim / batch_dim;
        let mut tiler = conv.m_tiler(default_platform());
        tiler.set_single_output_shape_m(co, ceil_div(howo, m_dim), ceil_div(batch, batch_dim));
        if bias {
            tiler.set_bias_type(ConvFormat::Nd, ConvDType::Float16);
        }

        let (m_tile, n_tile) = BasicBlockInfo::initial_mn(howo, co);
        let mut info = BasicBlockInfo {
            aicore_num: 32,
            f_dim,
            n_dim,
            group_dim: 1,
            batch,
            m_tile,
            n_tile,
            m_cut: ceil_div(howo, m_tile),
            n_cut: ceil_div(co, n_tile),
            m_in: hw * hw,
            ..Default::default()
        };
        if tiler.try_core_binding_decision(&mut info).is_err() {
            return Ok(());
        }
        info.batch_dim = batch_dim;
        info.m_dim = m_dim;
        let Ok(ctx) = tiler.bb_context(&info, CheckScope::Full) else { return Ok(()) };

        let mut tiled = info.clone();
        let mut bb = BbTiling::new(&ctx, &mut tiled);
        let outcome = bb.tile();
        let used = bb.l1_bytes();
        prop_assert_eq!(outcome.is_ok(), tiler.plan_bb(&mut info.clone()).is_ok());
        if outcome.is_ok() {
            prop_assert!(used <= ctx.platform.l1_size, "{} > {}", used, ctx.platform.l1_size);
        }
    }

    #[test]
    fn records_cover_the_core_slice(layer in layer()) {
        let Ok(record) = layer.tiler().plan() else { return Ok(()) };
        for tile in [record.ho_l1, record.ho_l0, record.k_al1, record.k_bl1, record.n_bl1, record.k_l0, record.n_l0] {
            prop_assert!(tile > 0);
        }
        prop_assert_eq!(record.k_al1 % record.k_l0, 0);
        prop_assert_eq!(record.k_bl1 % record.k_l0, 0);
        prop_assert!(record.multi_n_bl1 * record.n_l0 >= record.n_bl1);
        prop_assert!(ceil_div(record.single_core_co, record.n_bl1) * record.n_bl1 >= record.single_core_co);
        prop_assert!(record.inner_batch >= 1);
        prop_assert!(record.p_buffer_flag < 64);
    }

    #[test]
    fn core_binding_never_loses_active_cores(
        (ci, hi, wi, co) in (1u64..=64, 1u64..=64, 1u64..=64, 1u64..=512),
        batch in 1u64..=8,
        f_dim in prop_oneof![Just(1u64), Just(2), Just(4), Just(8), Just(16), Just(32)],
        n_dim in prop_oneof![Just(1u64), Just(2), Just(4)],
    ) {
        let conv = Conv { batch, ..Conv::new(ci, hi, wi, co, 1, 0) };
        let tiler = conv.m_tiler(default_platform());
        let mut ctx = tiler.build_context().unwrap();
        validate::check_params(&mut ctx, CheckScope::BeforeCoreBind).unwrap();
        ctx.infer_5hd();

        let howo = hi * wi;
        let (m_tile, n_tile) = BasicBlockInfo::initial_mn(howo, co);
        let (m_cut, n_cut) = (ceil_div(howo, m_tile), ceil_div(co, n_tile));
        let mut info = BasicBlockInfo {
            aicore_num: 32,
            f_dim,
            n_dim,
            group_dim: 1,
            batch,
            m_tile,
            n_tile,
            m_cut,
            n_cut,
            m_in: hi * wi,
            ..Default::default()
        };
        let f_cut = batch * m_cut;
        let pre_f = ceil_div(f_cut, ceil_div(f_cut, f_dim));
        let pre_n = ceil_div(n_cut, ceil_div(n_cut, n_dim));

        let mut bb = BbTiling::new(&ctx, &mut info);
        bb.adjust_m();
        bb.adjust_n();
        drop(bb);

        prop_assert!(info.f_active >= pre_f);
        prop_assert!(info.n_active >= pre_n);
        prop_assert!(info.f_active <= f_dim);
        prop_assert!(info.n_active <= n_dim);
        prop_assert_eq!(info.m_tile % 16, 0);
        prop_assert_eq!(info.n_tile % 16, 0);
    }
}
