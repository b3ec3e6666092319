use test_case::test_case;

use crate::ConvDType::*;
use crate::*;

#[test_case(Float16, 2, 16; "fp16")]
#[test_case(BFloat16, 2, 16; "bf16")]
#[test_case(Float32, 4, 8; "fp32")]
#[test_case(Int8, 1, 32; "int8")]
#[test_case(HiFloat8, 1, 32; "hifloat8")]
#[test_case(Float8E4M3, 1, 32; "fp8")]
fn cube_shape_by_fmap(dtype: ConvDType, bytes: u64, k0: u64) {
    assert_eq!(dtype.bytes(), bytes);
    assert_eq!(CubeShape::for_fmap(dtype).k0, k0);
}

#[test]
fn mad_type() {
    assert_eq!(Int8.mad_dtype(), Int32);
    assert_eq!(Float16.mad_dtype(), Float32);
    assert_eq!(HiFloat8.mad_dtype(), Float32);
}

#[test_case(Float16, Float16, None, Float16, false => true; "fp16 plain")]
#[test_case(Float16, Float16, Some(Float32), Float16, false => true; "fp16 with fp32 bias")]
#[test_case(BFloat16, BFloat16, Some(BFloat16), BFloat16, false => false; "bf16 bias must be fp32")]
#[test_case(Float32, Float16, None, Float32, false => false; "mixed operands")]
#[test_case(Int8, Int8, Some(Int32), Float16, true => true; "int8 quant with bias")]
#[test_case(Int8, Int8, None, Int8, false => false; "int8 requires quant table")]
#[test_case(HiFloat8, HiFloat8, Some(Float32), Float16, true => true; "hifloat8 to fp16")]
#[test_case(Float8E4M3, Float8E4M3, None, Float16, true => false; "fp8 to fp16 unsupported")]
fn type_table_lookup(
    fmap: ConvDType,
    weight: ConvDType,
    bias: Option<ConvDType>,
    output: ConvDType,
    quant: bool,
) -> bool {
    is_supported(TypeCombo { fmap, weight, bias, output }, quant)
}

#[test]
fn float8_family() {
    let float8: enumset::EnumSet<ConvDType> = HiFloat8 | Float8E4M3;
    for dtype in enumset::EnumSet::<ConvDType>::all() {
        assert_eq!(dtype.is_float8(), float8.contains(dtype), "{dtype}");
    }
}
