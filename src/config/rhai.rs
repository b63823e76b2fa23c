use serde::Deserialize;

/// Limits applied to every Rhai engine evaluating trigger conditions.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RhaiConfig {
    /// Maximum number of operations a single condition may perform
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum function call nesting depth
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum size of strings in characters
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum number of array elements
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    /// Maximum number of object map entries. Bounds the size of converted
    /// query results as well as maps built by scripts.
    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,
}

impl Default for RhaiConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
        }
    }
}

fn default_max_operations() -> u64 {
    100_000
}

fn default_max_call_levels() -> usize {
    10
}

fn default_max_string_size() -> usize {
    65_536
}

fn default_max_array_size() -> usize {
    10_000
}

fn default_max_map_size() -> usize {
    10_000
}
