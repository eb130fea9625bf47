//! Bit-cost primitive and derived level cost tables.
//!
//! The estimator never touches raw probabilities for coefficient levels;
//! it reads precomputed per-(plane, band, context) cost rows derived
//! here from a probability set. Deriving the rows once per probability
//! update keeps the per-block hot path to table lookups.

use thiserror::Error;

use crate::proba::{TokenProbTables, TypeProbas, NUM_BANDS, NUM_CTX, NUM_PROBAS, NUM_TYPES};
use crate::tables::{MAX_VARIABLE_LEVEL, VP8_ENTROPY_COST, VP8_LEVEL_CODES, VP8_LEVEL_FIXED_COSTS};

/// Calculate the cost of coding a boolean value with the given
/// probability, in 1/256 bit units.
#[inline]
pub fn vp8_bit_cost(bit: bool, prob: u8) -> u16 {
    if bit {
        VP8_ENTROPY_COST[255 - prob as usize]
    } else {
        VP8_ENTROPY_COST[prob as usize]
    }
}

/// Cost row for one (plane, band, context): indexed by clamped level.
pub type LevelCostArray = [u16; MAX_VARIABLE_LEVEL + 1];

/// Derived cost rows for one coefficient plane: `[band][ctx]`.
///
/// This is the shape a [`crate::residual_cost::Residual`] descriptor
/// references during costing.
pub type TypeLevelCosts = [[LevelCostArray; NUM_CTX]; NUM_BANDS];

/// A supplied cost table failed its structural preconditions.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CostModelError {
    /// A cost row decreases between two levels of the same magnitude
    /// category.
    #[error("level cost not monotone in plane {plane} band {band} ctx {ctx} at level {level}")]
    NonMonotoneLevelCost {
        /// Coefficient plane index.
        plane: usize,
        /// Coding band.
        band: usize,
        /// Context.
        ctx: usize,
        /// First clamped level whose cost dips below its predecessor.
        level: usize,
    },
}

/// Cost of the probability-adaptive magnitude-tree walk for a clamped
/// level >= 1, following the visited-node pattern in
/// [`VP8_LEVEL_CODES`].
fn variable_level_cost(level: usize, probas: &[u8; NUM_PROBAS]) -> u16 {
    if level == 0 {
        return 0;
    }
    let [mut pattern, mut bits] = VP8_LEVEL_CODES[level.min(MAX_VARIABLE_LEVEL) - 1];

    let mut cost = 0u16;
    let mut node = 2;
    while pattern != 0 {
        if (pattern & 1) != 0 {
            cost += vp8_bit_cost((bits & 1) != 0, probas[node]);
        }
        bits >>= 1;
        pattern >>= 1;
        node += 1;
    }
    cost
}

/// First clamped level of the magnitude category containing `level`.
///
/// Levels 1..=4 are bare tokens (their own category); beyond that the
/// category boundaries are the bitstream's extra-bit ranges.
fn category_base(level: usize) -> usize {
    match level {
        0..=4 => level,
        5..=6 => 5,
        7..=10 => 7,
        11..=18 => 11,
        19..=34 => 19,
        35..=66 => 35,
        _ => 67,
    }
}

/// Precomputed level cost tables for all four coefficient planes.
///
/// Derived from a probability set by [`LevelCosts::calculate`]. A row's
/// entries carry the cost of the "any coefficient left" bit only when the
/// entering context is non-zero; when a position is entered with context
/// 0 that bit's cost must be added by the consumer. The cost estimator
/// relies on exactly this split, so it is part of this type's contract
/// and pinned by the test suite.
#[derive(Clone)]
pub struct LevelCosts {
    level_cost: [TypeLevelCosts; NUM_TYPES],
}

impl Default for LevelCosts {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelCosts {
    /// Create zeroed tables. Call [`calculate`](Self::calculate) before
    /// costing anything against them.
    pub fn new() -> Self {
        Self {
            level_cost: [[[[0u16; MAX_VARIABLE_LEVEL + 1]; NUM_CTX]; NUM_BANDS]; NUM_TYPES],
        }
    }

    /// Derive tables from a probability set in one step.
    pub fn from_probs(probs: &TokenProbTables) -> Self {
        let mut costs = Self::new();
        costs.calculate(probs);
        costs
    }

    /// Recompute every cost row from `probs`.
    ///
    /// For each (plane, band, ctx): level 0 costs the "coefficient is
    /// zero" bit; level v >= 1 costs the "coefficient is non-zero" bit
    /// plus the magnitude-tree walk. The "any coefficient left" bit
    /// (node 0) is folded in only for ctx > 0; see the type-level
    /// contract note.
    pub fn calculate(&mut self, probs: &TokenProbTables) {
        for (plane, plane_probs) in probs.iter().enumerate() {
            for band in 0..NUM_BANDS {
                for ctx in 0..NUM_CTX {
                    let p = &plane_probs[band][ctx];
                    let cost0 = if ctx > 0 { vp8_bit_cost(true, p[0]) } else { 0 };
                    let cost_base = vp8_bit_cost(true, p[1]) + cost0;

                    let row = &mut self.level_cost[plane][band][ctx];
                    row[0] = vp8_bit_cost(false, p[1]) + cost0;
                    for v in 1..=MAX_VARIABLE_LEVEL {
                        row[v] = cost_base + variable_level_cost(v, p);
                    }
                }
            }
        }
    }

    /// Cost rows for one coefficient plane.
    #[inline]
    pub fn plane(&self, plane: usize) -> &TypeLevelCosts {
        &self.level_cost[plane]
    }

    /// Check the monotonicity precondition the estimator assumes: within
    /// each magnitude category, a row's total cost (fixed + variable) is
    /// non-decreasing in clamped level.
    ///
    /// Only same-category neighbors are compared. Across a category
    /// boundary the coding tree path changes and the total cost may
    /// legitimately drop (a near-certainty probability on a rarely taken
    /// branch makes the smaller level's leaf arbitrarily expensive); the
    /// bitstream's own default tables do this at the 4/5 and 66/67
    /// boundaries.
    pub fn validate(&self) -> Result<(), CostModelError> {
        for plane in 0..NUM_TYPES {
            for band in 0..NUM_BANDS {
                for ctx in 0..NUM_CTX {
                    let row = &self.level_cost[plane][band][ctx];
                    for level in 2..=MAX_VARIABLE_LEVEL {
                        if category_base(level) != category_base(level - 1) {
                            continue;
                        }
                        let prev = row[level - 1] as u32 + VP8_LEVEL_FIXED_COSTS[level - 1] as u32;
                        let cur = row[level] as u32 + VP8_LEVEL_FIXED_COSTS[level] as u32;
                        if cur < prev {
                            return Err(CostModelError::NonMonotoneLevelCost {
                                plane,
                                band,
                                ctx,
                                level,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Probability plane and cost plane selected for one residual, bundled
/// so descriptor construction stays a single lookup.
#[inline]
pub(crate) fn select_planes<'a>(
    probs: &'a TokenProbTables,
    costs: &'a LevelCosts,
    plane: usize,
) -> (&'a TypeProbas, &'a TypeLevelCosts) {
    (&probs[plane], costs.plane(plane))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proba::COEFF_PROBS;

    #[test]
    fn bit_cost_is_symmetric_at_even_odds() {
        assert_eq!(vp8_bit_cost(false, 128), vp8_bit_cost(true, 127));
        // Certain bits are free, surprising bits are expensive.
        assert!(vp8_bit_cost(false, 250) < vp8_bit_cost(false, 128));
        assert!(vp8_bit_cost(true, 250) > vp8_bit_cost(true, 128));
    }

    #[test]
    fn variable_cost_counts_visited_nodes() {
        // With every node at 128 the walk cost is one bit per visited
        // node, so it only depends on the tree path.
        let probas = [128u8; NUM_PROBAS];
        let one = vp8_bit_cost(true, 128);
        let zero = vp8_bit_cost(false, 128);
        // Level 1: node 2 only, zero branch.
        assert_eq!(variable_level_cost(1, &probas), zero);
        // Level 2: nodes 2, 3, 4 with branches 1, 0, 0.
        assert_eq!(variable_level_cost(2, &probas), one + 2 * zero);
        // Level 5: nodes 2, 3, 6, 7 with branches 1, 1, 0, 0.
        assert_eq!(variable_level_cost(5, &probas), 2 * one + 2 * zero);
        // Level 67: nodes 2, 3, 6, 8, 10, all one branches.
        assert_eq!(variable_level_cost(67, &probas), 5 * one);
        // Out-of-range levels clamp to the last entry.
        assert_eq!(variable_level_cost(2000, &probas), 5 * one);
    }

    #[test]
    fn level_cost_carries_leading_bit_iff_nonzero_ctx() {
        let costs = LevelCosts::from_probs(&COEFF_PROBS);
        for plane in 0..NUM_TYPES {
            for band in 0..NUM_BANDS {
                let p = &COEFF_PROBS[plane][band];
                for ctx in 0..NUM_CTX {
                    let row = &costs.plane(plane)[band][ctx];
                    for v in 1..=MAX_VARIABLE_LEVEL {
                        // Rebuild the entry from primitives: the node-0
                        // ("any coefficient left") bit is baked in only
                        // when the entering context is non-zero.
                        let leading = if ctx > 0 { vp8_bit_cost(true, p[ctx][0]) } else { 0 };
                        let expected = leading
                            + vp8_bit_cost(true, p[ctx][1])
                            + variable_level_cost(v, &p[ctx]);
                        assert_eq!(row[v], expected);
                    }
                }
            }
        }
    }

    #[test]
    fn default_tables_validate() {
        let costs = LevelCosts::from_probs(&COEFF_PROBS);
        assert_eq!(costs.validate(), Ok(()));
    }

    #[test]
    fn validation_catches_inverted_rows() {
        let mut costs = LevelCosts::from_probs(&COEFF_PROBS);
        // Invert a same-category pair (7 and 8 are both category 7..=10).
        costs.level_cost[0][1][1][8] = 0;
        assert!(matches!(
            costs.validate(),
            Err(CostModelError::NonMonotoneLevelCost {
                plane: 0,
                band: 1,
                ctx: 1,
                ..
            })
        ));
    }
}
