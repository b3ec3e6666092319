use crate::*;
use proptest::prelude::*;

#[rustfmt::skip]
impl ConvDType {
    /// Feature-map types the cube unit accepts on the non-quantized path.
    pub fn float_fmap_generator() -> impl Strategy<Value = Self> {
        prop_oneof![Just(Self::Float16), Just(Self::BFloat16), Just(Self::Float32)]
    }

    /// Feature-map types the cube unit accepts on the quantized path.
    pub fn quant_fmap_generator() -> impl Strategy<Value = Self> {
        prop_oneof![Just(Self::Int8), Just(Self::HiFloat8), Just(Self::Float8E4M3)]
    }

    pub fn fmap_generator() -> impl Strategy<Value = Self> {
        prop_oneof![Self::float_fmap_generator(), Self::quant_fmap_generator()]
    }
}
