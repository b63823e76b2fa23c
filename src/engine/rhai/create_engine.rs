use rhai::Engine;

use crate::config::RhaiConfig;

/// Creates a sandboxed Rhai engine bounded by the configured limits.
pub fn create_engine(rhai_config: &RhaiConfig) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(rhai_config.max_operations);
    engine.set_max_call_levels(rhai_config.max_call_levels);
    engine.set_max_string_size(rhai_config.max_string_size);
    engine.set_max_array_size(rhai_config.max_array_size);
    engine.set_max_map_size(rhai_config.max_map_size);

    const DANGEROUS_SYMBOLS: &[&str] = &[
        "eval", "import", "export", "print", "debug", "File", "file", "http", "net", "system",
        "process", "thread", "spawn",
    ];
    for &symbol in DANGEROUS_SYMBOLS {
        engine.disable_symbol(symbol);
    }

    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_limit_is_enforced() {
        let config = RhaiConfig { max_operations: 50, ..Default::default() };
        let engine = create_engine(&config);
        let result = engine.eval::<i64>("let x = 0; while true { x += 1; } x");
        assert!(result.is_err());
    }

    #[test]
    fn test_eval_is_disabled() {
        let engine = create_engine(&RhaiConfig::default());
        assert!(engine.compile(r#"eval("1 + 1")"#).is_err());
    }
}
