//! Property tests for dtype invariants.

use proptest::prelude::*;

use crate::*;

proptest! {
    #[test]
    fn k0_covers_one_fractal_row(dtype in ConvDType::fmap_generator()) {
        let cube = CubeShape::for_fmap(dtype);
        prop_assert_eq!(cube.k0 * dtype.bytes(), C0_SIZE);
        prop_assert_eq!(cube.m0, 16);
        prop_assert_eq!(cube.n0, 16);
    }

    #[test]
    fn accumulator_is_four_bytes(dtype: ConvDType) {
        prop_assert_eq!(dtype.mad_dtype().bytes(), 4);
    }

    #[test]
    fn float_outputs_never_accept_int_bias(fmap in ConvDType::float_fmap_generator(), output: ConvDType) {
        let combo = TypeCombo { fmap, weight: fmap, bias: Some(ConvDType::Int32), output };
        prop_assert!(!is_supported(combo, false));
    }
}
