//! Integer helpers shared by every tiling variant.

use smallvec::SmallVec;

/// Sorted candidate values along one search axis.
pub type Lattice = SmallVec<[u64; 16]>;

#[inline]
pub const fn ceil_div(a: u64, b: u64) -> u64 {
    if b == 0 { 0 } else { a.div_ceil(b) }
}

/// Rounds `a` up to a multiple of `b`.
#[inline]
pub const fn align_up(a: u64, b: u64) -> u64 {
    ceil_div(a, b) * b
}

/// Rounds `a` down to a multiple of `b`.
#[inline]
pub const fn floor_align(a: u64, b: u64) -> u64 {
    if b == 0 { 0 } else { a / b * b }
}

pub const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

pub const fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}

/// Factors of `num` not exceeding `max`, ascending.
pub fn comm_factors(num: u64, max: u64) -> Lattice {
    let mut low = Lattice::new();
    let mut high = Lattice::new();
    let mut i = 1;
    while i * i <= num {
        if num % i == 0 {
            if i <= max {
                low.push(i);
            }
            let pair = num / i;
            if pair != i && pair <= max {
                high.push(pair);
            }
        }
        i += 1;
    }
    low.extend(high.into_iter().rev());
    low
}

/// Factors of `num` merged with the powers of two up to `min(num, max)`.
pub fn comm_factors_pow2(num: u64, max: u64) -> Lattice {
    let mut out = comm_factors(num, max);
    let limit = num.min(max);
    let mut p = 1;
    while p <= limit {
        out.push(p);
        p *= 2;
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Common factors of `a` and `b`, ascending.
pub fn comm_factors_of_two(a: u64, b: u64) -> Lattice {
    let g = gcd(a, b);
    comm_factors(g, g)
}

/// Merges `extra` into `base` keeping it sorted without duplicates.
pub fn merge_sorted(base: &mut Lattice, extra: &[u64]) {
    base.extend_from_slice(extra);
    base.sort_unstable();
    base.dedup();
}

/// Scales every element of the lattice.
pub fn scale(lattice: &mut Lattice, by: u64) {
    for v in lattice.iter_mut() {
        *v *= by;
    }
}

/// Span of a dilated kernel.
#[inline]
pub const fn kernel_dilated(k: u64, dilation: u64) -> u64 {
    k.saturating_sub(1) * dilation + 1
}

/// Input rows (or columns) an output window of `out` rows touches, capped by
/// the full input extent.
#[inline]
pub fn infer_in_l1(out: u64, k: u64, stride: u64, dilation: u64, full: u64) -> u64 {
    if out == 0 {
        return 0;
    }
    ((out - 1) * stride + kernel_dilated(k, dilation)).min(full)
}

/// Standard convolution output extent, `None` when it would not be positive.
pub fn conv_out(input: u64, pad_a: u64, pad_b: u64, k: u64, stride: u64, dilation: u64) -> Option<u64> {
    let span = input + pad_a + pad_b;
    let kd = kernel_dilated(k, dilation);
    if stride == 0 || span < kd {
        return None;
    }
    Some((span - kd) / stride + 1)
}
