//! # Tomographic inversion of differenced TEC observations.
//!
//! Each observation is the difference between the slant TEC of a current ray and that of an
//! earlier reference ray of the same satellite-receiver arc. Both rays are projected onto the
//! real spherical harmonic basis of their time slices, which yields a block-sparse row of the
//! design matrix `A`.
//!
//! The inversion proceeds in three steps:
//! 1. The observations are split into memory-bounded chunks and a partial normal system
//!    `(Aᵀ P A, Aᵀ P y)` is built for each chunk in parallel ([`construct_normal_system`]).
//! 2. The partial systems are summed up ([`stack_normal_systems`]) and temporal smoothness
//!    constraints between consecutive time slices are imposed ([`apply_temporal_constraints`]).
//! 3. The dense system is solved for the coefficient vector ([`solve_normal_system`]).
//!
//! The entry point for a full observation series is [`solve_weights`].

mod forward;
mod normal;
mod solver;

pub use forward::*;
pub use normal::*;
pub use solver::*;
