//! Boolean condition evaluation over a JSON context.

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use rhai::{Dynamic, Scope};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{
    RhaiCompiler, RhaiCompilerError,
    conversions::{json_object_to_map, json_to_dynamic},
};

/// Errors raised while evaluating a condition.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The script does not compile.
    #[error(transparent)]
    Compile(#[from] RhaiCompilerError),

    /// The script failed at run time, including hitting an engine limit.
    #[error("Rhai evaluation error: {0}")]
    Runtime(#[from] Box<rhai::EvalAltResult>),

    /// The script produced something other than a boolean.
    #[error("Condition must evaluate to a boolean, got '{0}'")]
    NonBoolean(String),
}

/// Evaluates a condition against a context.
#[cfg_attr(test, automock)]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `script` against `context` and returns its boolean result.
    fn evaluate(&self, script: &str, context: &Map<String, Value>) -> Result<bool, EvaluationError>;
}

/// Evaluates conditions with the embedded Rhai engine.
///
/// Every top-level context key is bound as a variable, and the whole context
/// is also bound as `ctx`, so `results[0]` and `ctx.results[0]` are
/// equivalent.
pub struct RhaiEvaluator {
    compiler: Arc<RhaiCompiler>,
}

impl RhaiEvaluator {
    /// Creates an evaluator backed by a shared compiler.
    pub fn new(compiler: Arc<RhaiCompiler>) -> Self {
        Self { compiler }
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(&self, script: &str, context: &Map<String, Value>) -> Result<bool, EvaluationError> {
        let ast = self.compiler.get_ast(script)?;

        let mut scope = Scope::new();
        for (key, value) in context {
            if key != "ctx" {
                scope.push_dynamic(key.clone(), json_to_dynamic(value));
            }
        }
        scope.push("ctx", json_object_to_map(context));

        let result = self.compiler.engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast)?;

        result.as_bool().map_err(|type_name| EvaluationError::NonBoolean(type_name.to_string()))
    }
}
