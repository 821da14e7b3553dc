//! In-memory filter evaluation.
//!
//! [`Evaluator`] applies the same typing rules as the relational compiler
//! to entity snapshots, so a filter selects the same entities whether it
//! runs against the store or against a change event.

mod evaluator;
mod value;

pub use evaluator::Evaluator;
pub use value::{Number, Rounding, Value};
