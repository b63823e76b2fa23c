//! Compiles Rhai conditions and caches the resulting ASTs.

use std::sync::Arc;

use dashmap::DashMap;
use rhai::{AST, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::create_engine;
use crate::config::RhaiConfig;

type ScriptHash = [u8; 32];

/// Compiles scripts once and shares the AST between runs and triggers.
#[derive(Debug)]
pub struct RhaiCompiler {
    /// The engine used for compiling and evaluating scripts.
    pub engine: Arc<Engine>,
    cache: DashMap<ScriptHash, Arc<AST>>,
}

/// Errors that can occur during Rhai compilation.
#[derive(Debug, Clone, Error)]
pub enum RhaiCompilerError {
    /// Error that occurs during script compilation.
    #[error("Rhai compilation error: {0}")]
    CompilationError(#[from] rhai::ParseError),
}

impl RhaiCompiler {
    /// Creates a new instance of the Rhai compiler.
    pub fn new(rhai_config: &RhaiConfig) -> Self {
        RhaiCompiler { engine: Arc::new(create_engine(rhai_config)), cache: DashMap::new() }
    }

    fn hash_script(script: &str) -> ScriptHash {
        let mut hasher = Sha256::new();
        hasher.update(script.as_bytes());
        hasher.finalize().into()
    }

    /// Returns the compiled AST of `script`, compiling it on first use.
    pub fn get_ast(&self, script: &str) -> Result<Arc<AST>, RhaiCompilerError> {
        let key = Self::hash_script(script);

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        let ast = Arc::new(self.engine.compile(script)?);
        self.cache.insert(key, ast.clone());
        Ok(ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_invalid_script() {
        let compiler = RhaiCompiler::new(&RhaiConfig::default());
        let result = compiler.get_ast("ctx.results[0] > \"unterminated");
        assert!(matches!(result, Err(RhaiCompilerError::CompilationError(_))));
        assert_eq!(compiler.cache.len(), 0);
    }

    #[test]
    fn test_caching_shares_ast() {
        let compiler = RhaiCompiler::new(&RhaiConfig::default());
        let script = "params.count > 5";

        let first = compiler.get_ast(script).unwrap();
        let second = compiler.get_ast(script).unwrap();

        assert_eq!(compiler.cache.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        compiler.get_ast("params.count > 6").unwrap();
        assert_eq!(compiler.cache.len(), 2);
    }
}
