//! Bit cost estimation for residual coefficient blocks.
//!
//! This crate estimates, without actually entropy-coding anything, how
//! many bits a VP8-style arithmetic coder would spend on one 4x4 block
//! of quantized transform coefficients. A rate-distortion search calls
//! the estimate millions of times per frame, so the hot path is pure
//! table lookups, and the accelerated implementation is certified
//! bit-exact against the portable one.
//!
//! # Features
//!
//! - `std` (default): standard library support. The core is pure integer
//!   math and builds without it.
//! - `simd` (default): SSE2 scanner/estimator on x86_64, dispatched
//!   through a CPU-verified token.
//!
//! # Usage
//!
//! ```rust
//! use zencost::{CostBackend, LevelCosts, Residual, TokenType, COEFF_PROBS};
//!
//! let costs = LevelCosts::from_probs(&COEFF_PROBS);
//! let backend = CostBackend::detect();
//!
//! let coeffs = [5, -2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
//! let mut res = Residual::new(TokenType::I4, 0, &COEFF_PROBS, &costs);
//! backend.set_residual_coeffs(&coeffs, &mut res);
//! let bits_x256 = backend.get_residual_cost(0, &res);
//! assert!(bits_x256 > 0);
//! ```
//!
//! All costs are fixed-point with 8 fractional bits (1/256 bit units),
//! the unit fixed by [`tables::VP8_ENTROPY_COST`]. Rate-distortion
//! comparisons stay meaningful as long as every rate estimate in the
//! enclosing encoder shares that unit.
//!
//! # Safety
//!
//! This crate uses `#![forbid(unsafe_code)]`. With the `simd` feature we
//! rely on the [`archmage`] crate for safe SIMD intrinsics; its `#[arcane]`
//! proc macro generates the unsafe blocks internally, and the soundness
//! of the SIMD path rests on archmage's token-based safety model.
//! Without the `simd` feature the crate contains no unsafe code at all.
//!
//! [`archmage`]: https://docs.rs/archmage

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cost;
pub mod proba;
pub mod residual_cost;
pub mod tables;

pub use cost::{vp8_bit_cost, CostModelError, LevelCostArray, LevelCosts, TypeLevelCosts};
pub use proba::{TokenProbTables, TokenType, TypeProbas, COEFF_PROBS};
pub use residual_cost::{CostBackend, Residual};
