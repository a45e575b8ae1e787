#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod base;
pub mod basis;
pub mod coords;
pub mod maps;
mod math;
pub mod methods;

pub use math::{LegendreTable, sph_harm};
