//! Residual descriptor, scanner, and cost estimation backends.
//!
//! One [`Residual`] describes a single 4x4 block of quantized
//! coefficients together with the probability and cost planes it will be
//! costed against. A [`CostBackend`] carries the concrete scanner and
//! estimator strategy: the portable element-wise path, or the SSE2 path
//! on x86_64 with the `simd` feature. Both strategies feed one shared
//! accumulation loop, so their results are identical bit for bit.

#![allow(clippy::needless_range_loop)]

#[cfg(all(target_arch = "x86_64", feature = "simd"))]
use archmage::{arcane, Has128BitSimd, SimdToken, X64V3Token};
#[cfg(all(target_arch = "x86_64", feature = "simd"))]
use core::arch::x86_64::*;
#[cfg(all(target_arch = "x86_64", feature = "simd"))]
use safe_unaligned_simd::x86_64 as simd_mem;

use crate::cost::{select_planes, vp8_bit_cost, LevelCosts, TypeLevelCosts};
use crate::proba::{TokenProbTables, TokenType, TypeProbas};
use crate::tables::{MAX_LEVEL, MAX_VARIABLE_LEVEL, VP8_ENC_BANDS, VP8_LEVEL_FIXED_COSTS};

/// Placeholder coefficient block referenced by descriptors that have not
/// been through the scanner yet.
static UNSCANNED: [i32; 16] = [0; 16];

/// Residual coefficients of one 4x4 block, bound to the probability and
/// cost planes selected for its coefficient type.
///
/// Constructed per block, populated once by
/// [`CostBackend::set_residual_coeffs`], then read (possibly several
/// times, with different starting contexts) by
/// [`CostBackend::get_residual_cost`]. Nothing here is mutated during
/// costing, and the descriptor never outlives the coefficient buffer or
/// tables it borrows.
pub struct Residual<'a> {
    /// First coefficient position to cost. Positions before it are
    /// accounted for elsewhere; either `first == 0` or `coeffs[0]` is
    /// zero.
    pub first: usize,
    /// Index of the last non-zero coefficient, or -1 if the block is
    /// entirely zero from `first` on. Set by the scanner.
    pub last: i32,
    /// Coefficients in zig-zag scan order. Bound by the scanner.
    pub coeffs: &'a [i32; 16],
    pub(crate) prob: &'a TypeProbas,
    pub(crate) cost: &'a TypeLevelCosts,
}

impl<'a> Residual<'a> {
    /// Create a descriptor for one block of the given coefficient plane,
    /// costing from position `first` on.
    ///
    /// `last` starts at the all-zero sentinel and `coeffs` at an empty
    /// placeholder until [`CostBackend::set_residual_coeffs`] runs.
    pub fn new(
        coeff_type: TokenType,
        first: usize,
        probs: &'a TokenProbTables,
        costs: &'a LevelCosts,
    ) -> Self {
        debug_assert!(first < 16);
        let (prob, cost) = select_planes(probs, costs, coeff_type.plane());
        Self {
            first,
            last: -1,
            coeffs: &UNSCANNED,
            prob,
            cost,
        }
    }
}

/// Per-position classification of all 16 coefficients, produced in one
/// batch before the cost loop runs.
struct ResidualClasses {
    /// Clamped magnitudes, `min(|c|, 67)`, for cost-row indexing.
    levels: [u8; 16],
    /// Clamped contexts, `min(|c|, 2)`.
    ctxs: [u8; 16],
    /// Full magnitudes, for the fixed cost table.
    abs_levels: [u16; 16],
}

/// Element-wise classification, the portable strategy.
fn classify_coeffs(coeffs: &[i32; 16]) -> ResidualClasses {
    let mut classes = ResidualClasses {
        levels: [0; 16],
        ctxs: [0; 16],
        abs_levels: [0; 16],
    };
    for n in 0..16 {
        let v = coeffs[n].unsigned_abs();
        classes.levels[n] = v.min(MAX_VARIABLE_LEVEL as u32) as u8;
        classes.ctxs[n] = v.min(2) as u8;
        classes.abs_levels[n] = v.min(u16::MAX as u32) as u16;
    }
    classes
}

/// Data-parallel classification: all 16 positions in two 128-bit
/// registers. The i32 coefficients are packed to i16 then i8 with signed
/// saturation, which agrees with the element-wise strategy over the
/// quantizer's output range.
#[cfg(all(target_arch = "x86_64", feature = "simd"))]
#[arcane]
fn classify_coeffs_x64(_token: impl Has128BitSimd + Copy, coeffs: &[i32; 16]) -> ResidualClasses {
    let mut classes = ResidualClasses {
        levels: [0; 16],
        ctxs: [0; 16],
        abs_levels: [0; 16],
    };

    let zero = _mm_setzero_si128();
    let k_cst2 = _mm_set1_epi8(2);
    let k_cst67 = _mm_set1_epi8(MAX_VARIABLE_LEVEL as i8);

    let c0_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[0..4]).unwrap());
    let c1_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[4..8]).unwrap());
    let c2_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[8..12]).unwrap());
    let c3_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[12..16]).unwrap());

    let c0 = _mm_packs_epi32(c0_32, c1_32); // 8 x i16
    let c1 = _mm_packs_epi32(c2_32, c3_32);

    // abs(v) = max(v, -v)
    let d0 = _mm_sub_epi16(zero, c0);
    let d1 = _mm_sub_epi16(zero, c1);
    let e0 = _mm_max_epi16(c0, d0);
    let e1 = _mm_max_epi16(c1, d1);

    let f = _mm_packs_epi16(e0, e1); // 16 x i8 magnitudes
    let g = _mm_min_epu8(f, k_cst2); // context: 0, 1, 2
    let h = _mm_min_epu8(f, k_cst67); // clamped level in 0..=67

    simd_mem::_mm_storeu_si128(&mut classes.ctxs, g);
    simd_mem::_mm_storeu_si128(&mut classes.levels, h);
    simd_mem::_mm_storeu_si128(
        <&mut [u16; 8]>::try_from(&mut classes.abs_levels[0..8]).unwrap(),
        e0,
    );
    simd_mem::_mm_storeu_si128(
        <&mut [u16; 8]>::try_from(&mut classes.abs_levels[8..16]).unwrap(),
        e1,
    );

    classes
}

/// Reverse scan for the last non-zero coefficient, the portable
/// strategy.
fn scan_last_nonzero(coeffs: &[i32; 16]) -> i32 {
    coeffs
        .iter()
        .rposition(|&c| c != 0)
        .map(|i| i as i32)
        .unwrap_or(-1)
}

/// Bitmask scan: compare all 16 coefficients against zero at once and
/// take the highest set bit of the inverted mask.
#[cfg(all(target_arch = "x86_64", feature = "simd"))]
#[arcane]
fn scan_last_nonzero_x64(_token: impl Has128BitSimd + Copy, coeffs: &[i32; 16]) -> i32 {
    let zero = _mm_setzero_si128();

    let c0_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[0..4]).unwrap());
    let c1_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[4..8]).unwrap());
    let c2_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[8..12]).unwrap());
    let c3_32 = simd_mem::_mm_loadu_si128(<&[i32; 4]>::try_from(&coeffs[12..16]).unwrap());

    // Signed saturation maps non-zero to non-zero, so the packed bytes
    // have the same zero pattern as the inputs.
    let c0 = _mm_packs_epi32(c0_32, c1_32);
    let c1 = _mm_packs_epi32(c2_32, c3_32);
    let m0 = _mm_packs_epi16(c0, c1);

    let m1 = _mm_cmpeq_epi8(m0, zero);
    let mask = 0x0000_ffff_u32 ^ (_mm_movemask_epi8(m1) as u32);

    if mask == 0 {
        -1
    } else {
        (31 - mask.leading_zeros()) as i32
    }
}

/// Shared accumulation loop. Both backends call this with their own
/// classification batch; everything downstream of classification is one
/// code path, so backend agreement reduces to classify + scan agreement.
fn accumulate_cost(ctx0: usize, res: &Residual<'_>, classes: &ResidualClasses) -> u32 {
    debug_assert!(ctx0 < 3);
    debug_assert!(res.last >= -1 && res.last < 16);

    let mut n = res.first;
    let band = VP8_ENC_BANDS[n] as usize;
    let p0 = res.prob[band][ctx0][0];

    // bit_cost(1, p0) is already folded into the cost rows, but only for
    // a non-zero entering context. For ctx0 == 0 it must be added here
    // or the first coefficient is under-counted.
    let mut cost = if ctx0 == 0 {
        vp8_bit_cost(true, p0) as u32
    } else {
        0
    };

    if res.last < 0 {
        return vp8_bit_cost(false, p0) as u32;
    }

    let mut t = &res.cost[band][ctx0];
    while (n as i32) < res.last {
        let level = classes.levels[n] as usize;
        let flevel = classes.abs_levels[n] as usize;
        cost += VP8_LEVEL_FIXED_COSTS[flevel.min(MAX_LEVEL)] as u32 + t[level] as u32;

        // Advance the cost-row cursor: band of the next position,
        // context from this one.
        let b = VP8_ENC_BANDS[n + 1] as usize;
        let ctx = classes.ctxs[n] as usize;
        t = &res.cost[b][ctx];
        n += 1;
    }

    // Last coefficient is non-zero by the descriptor invariant.
    let level = classes.levels[n] as usize;
    let flevel = classes.abs_levels[n] as usize;
    debug_assert!(flevel != 0, "last coefficient must be non-zero");
    cost += VP8_LEVEL_FIXED_COSTS[flevel.min(MAX_LEVEL)] as u32 + t[level] as u32;

    if n < 15 {
        let b = VP8_ENC_BANDS[n + 1] as usize;
        let ctx = classes.ctxs[n] as usize;
        let last_p0 = res.prob[b][ctx][0];
        cost += vp8_bit_cost(false, last_p0) as u32;
    }

    cost
}

/// One concrete {scanner, estimator} strategy, chosen once per session.
///
/// Every variant is a drop-in behavioral equivalent of every other: same
/// inputs, same `last`, same cost, including at the all-zero sentinel
/// and block-boundary edge cases. The value is `Copy` and carries no
/// mutable state, so a session simply owns one; there is nothing to
/// rebind, and tests can run several variants side by side.
#[derive(Clone, Copy, Debug)]
pub enum CostBackend {
    /// Portable element-wise reference implementation.
    Scalar,
    /// 128-bit SIMD implementation (x86_64, `simd` feature).
    #[cfg(all(target_arch = "x86_64", feature = "simd"))]
    X64(X64V3Token),
}

impl CostBackend {
    /// Pick the best strategy the running CPU supports. Call once at
    /// session start, before any concurrent costing begins.
    pub fn detect() -> Self {
        #[cfg(all(target_arch = "x86_64", feature = "simd"))]
        if let Some(token) = X64V3Token::summon() {
            return Self::X64(token);
        }
        Self::Scalar
    }

    /// The portable reference strategy, on any hardware.
    pub const fn scalar() -> Self {
        Self::Scalar
    }

    /// Scan `coeffs` for the last non-zero position at or after
    /// `res.first`, store it in `res.last`, and bind `coeffs` to the
    /// descriptor.
    ///
    /// The scan covers the whole block: positions below `first` are zero
    /// by the descriptor invariant, which is debug-asserted here, so no
    /// masking is needed and every strategy agrees on the result.
    pub fn set_residual_coeffs<'a>(&self, coeffs: &'a [i32; 16], res: &mut Residual<'a>) {
        debug_assert!(coeffs[..res.first].iter().all(|&c| c == 0));
        res.last = match *self {
            Self::Scalar => scan_last_nonzero(coeffs),
            #[cfg(all(target_arch = "x86_64", feature = "simd"))]
            Self::X64(token) => scan_last_nonzero_x64(token, coeffs),
        };
        res.coeffs = coeffs;
    }

    /// Approximate cost, in 1/256 bit units, of entropy-coding the
    /// block's coefficients from `res.first` through the end of the
    /// block, entering with context `ctx0`.
    ///
    /// Pure function of its inputs; `res` is not mutated.
    pub fn get_residual_cost(&self, ctx0: usize, res: &Residual<'_>) -> u32 {
        let classes = match *self {
            Self::Scalar => classify_coeffs(res.coeffs),
            #[cfg(all(target_arch = "x86_64", feature = "simd"))]
            Self::X64(token) => classify_coeffs_x64(token, res.coeffs),
        };
        accumulate_cost(ctx0, res, &classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proba::COEFF_PROBS;

    #[test]
    fn scan_finds_last_nonzero() {
        let mut coeffs = [0i32; 16];
        assert_eq!(scan_last_nonzero(&coeffs), -1);
        coeffs[0] = 3;
        assert_eq!(scan_last_nonzero(&coeffs), 0);
        coeffs[15] = -1;
        assert_eq!(scan_last_nonzero(&coeffs), 15);
        coeffs[15] = 0;
        coeffs[7] = -200;
        assert_eq!(scan_last_nonzero(&coeffs), 7);
    }

    #[test]
    fn classify_clamps_levels_and_contexts() {
        let mut coeffs = [0i32; 16];
        coeffs[0] = 1;
        coeffs[1] = -2;
        coeffs[2] = 68;
        coeffs[3] = -2047;
        let classes = classify_coeffs(&coeffs);
        assert_eq!(classes.levels[0], 1);
        assert_eq!(classes.ctxs[0], 1);
        assert_eq!(classes.levels[1], 2);
        assert_eq!(classes.ctxs[1], 2);
        assert_eq!(classes.levels[2], 67);
        assert_eq!(classes.abs_levels[2], 68);
        assert_eq!(classes.levels[3], 67);
        assert_eq!(classes.abs_levels[3], 2047);
        assert_eq!(classes.levels[4], 0);
        assert_eq!(classes.ctxs[4], 0);
    }

    #[test]
    fn cost_is_pure_and_repeatable() {
        let costs = LevelCosts::from_probs(&COEFF_PROBS);
        let backend = CostBackend::scalar();
        let coeffs = [4, -1, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut res = Residual::new(TokenType::I4, 0, &COEFF_PROBS, &costs);
        backend.set_residual_coeffs(&coeffs, &mut res);
        assert_eq!(res.last, 4);
        let first = backend.get_residual_cost(0, &res);
        assert_eq!(backend.get_residual_cost(0, &res), first);
        // Different starting contexts reuse the same descriptor.
        let with_ctx = backend.get_residual_cost(2, &res);
        assert_ne!(first, with_ctx);
    }
}
