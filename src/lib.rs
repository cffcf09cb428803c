// Empirical orthogonal functions (EOF) over tidy data

#![doc = include_str!("../README.md")]

pub mod bootstrap;
pub mod bridge;
pub mod decomposition;
pub mod diagnostics;
pub mod eof;
pub mod error;
pub mod linalg_backends;
pub mod result;
pub mod rotation;
pub mod table;

pub use bridge::{to_matrix, to_tidy, AxisIndex, Fill, TidyMatrix};
pub use decomposition::{Decomposition, DecompositionConfig};
pub use eof::{eof, AxisSpec, EofConfig};
pub use error::EofError;
pub use result::EofResult;
pub use polars;
