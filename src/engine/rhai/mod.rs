//! The Rhai engine used to evaluate trigger conditions.

pub mod compiler;
pub mod conversions;
mod create_engine;
mod evaluator;

pub use compiler::{RhaiCompiler, RhaiCompilerError};
pub use create_engine::create_engine;
pub use evaluator::{EvaluationError, ExpressionEvaluator, RhaiEvaluator};
#[cfg(test)]
pub use evaluator::MockExpressionEvaluator;
