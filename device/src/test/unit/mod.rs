use proptest::prelude::*;
use test_case::test_case;

use crate::{BufferKind, Error, PlatformInfo, SocVersion};

#[test_case("Ascend950", SocVersion::Ascend950; "upper camel")]
#[test_case("ascend910_55", SocVersion::Ascend910_55; "lower snake")]
#[test_case("ASCEND910-55", SocVersion::Ascend910_55; "dash")]
#[test_case("mc62cm12a", SocVersion::Mc62cm12a; "mc")]
fn soc_parse(name: &str, expected: SocVersion) {
    assert_eq!(name.parse::<SocVersion>().unwrap(), expected);
}

#[test]
fn soc_parse_unknown() {
    let err = "tpu".parse::<SocVersion>().unwrap_err();
    assert!(matches!(err, Error::UnknownSoc { .. }));
}

#[test]
fn preset_is_valid() {
    use strum::IntoEnumIterator;
    for soc in SocVersion::iter() {
        let platform = PlatformInfo::preset(soc);
        platform.validate().unwrap();
        assert_eq!(platform.bandwidth_coeff, soc.bandwidth_coeff());
    }
}

#[test]
fn builder_overrides_bandwidth() {
    let platform = PlatformInfo::builder().bandwidth_coeff(3).l1_size(1024).build();
    assert_eq!(platform.bandwidth_coeff, 3);
    assert_eq!(platform.capacity(BufferKind::L1), 1024);
}

#[test]
fn zero_capacity_rejected() {
    let platform = PlatformInfo::builder().bt_size(0).build();
    match platform.validate() {
        Err(Error::ZeroCapacity { buffer }) => assert_eq!(buffer, BufferKind::BiasTable),
        other => panic!("unexpected {other:?}"),
    }
    let platform = PlatformInfo::builder().aicore_num(0).build();
    assert!(matches!(platform.validate(), Err(Error::NoCores)));
}

proptest! {
    #[test]
    fn non_zero_platforms_validate(l1 in 1u64..1 << 24, l0 in 1u64..1 << 20, cores in 1u64..64) {
        let platform = PlatformInfo::builder().l1_size(l1).l0a_size(l0).l0b_size(l0).aicore_num(cores).build();
        prop_assert!(platform.validate().is_ok());
    }
}
