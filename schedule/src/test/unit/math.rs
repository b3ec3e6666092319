use test_case::test_case;

use crate::math::*;
use crate::tiling::walk_up;

#[test_case(12, 6 => vec![1, 2, 3, 4, 6]; "capped")]
#[test_case(16, 16 => vec![1, 2, 4, 8, 16]; "power of two")]
#[test_case(13, 32 => vec![1, 13]; "prime")]
#[test_case(1, 1 => vec![1]; "one")]
fn factors(num: u64, max: u64) -> Vec<u64> {
    comm_factors(num, max).to_vec()
}

#[test]
fn factor_lattice_variants() {
    assert_eq!(comm_factors_pow2(12, 8).as_slice(), &[1, 2, 3, 4, 6, 8]);
    assert_eq!(comm_factors_of_two(12, 18).as_slice(), &[1, 2, 3, 6]);

    let mut lattice = comm_factors(6, 6);
    merge_sorted(&mut lattice, &[4, 2, 8]);
    assert_eq!(lattice.as_slice(), &[1, 2, 3, 4, 6, 8]);
    scale(&mut lattice, 16);
    assert_eq!(lattice[1], 32);
}

#[test_case(56, 1, 3, 1, 1 => Some(56); "same padding")]
#[test_case(2, 0, 3, 1, 1 => None; "kernel larger than input")]
#[test_case(7, 0, 3, 2, 1 => Some(3); "strided")]
#[test_case(9, 0, 3, 1, 2 => Some(5); "dilated")]
#[test_case(8, 0, 1, 0, 1 => None; "zero stride")]
fn output_extent(input: u64, pad: u64, k: u64, stride: u64, dilation: u64) -> Option<u64> {
    conv_out(input, pad, pad, k, stride, dilation)
}

#[test]
fn input_window() {
    assert_eq!(infer_in_l1(4, 3, 1, 1, 56), 6);
    assert_eq!(infer_in_l1(100, 3, 1, 1, 56), 56);
    assert_eq!(infer_in_l1(0, 3, 1, 1, 56), 0);
    assert_eq!(infer_in_l1(4, 3, 2, 1, 56), 9);
    assert_eq!(kernel_dilated(3, 2), 5);
    assert_eq!(kernel_dilated(1, 7), 1);
}

#[test]
fn rounding() {
    assert_eq!(ceil_div(17, 16), 2);
    assert_eq!(ceil_div(5, 0), 0);
    assert_eq!(align_up(17, 16), 32);
    assert_eq!(floor_align(31, 16), 16);
    assert_eq!(lcm(4, 6), 12);
    assert_eq!(gcd(0, 9), 9);
}

#[test]
fn walk_stops_at_first_failure() {
    let lattice = [1, 2, 4, 8];
    assert_eq!(walk_up(&lattice, 0, |v| v <= 4), 2);
    assert_eq!(walk_up(&lattice, 0, |v| v != 2), 0);
    assert_eq!(walk_up(&lattice, 3, |_| true), 3);
}
