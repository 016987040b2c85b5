use serde::{Deserialize, Serialize};

/// Default RepairLoop cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Tunables for validation and repair. Every field has a default so a
/// partial TOML file (or none at all) is accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MendConfig {
    pub repair: RepairSettings,
    pub fields: FieldRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    pub max_iterations: usize,
    pub unreachable: UnreachablePolicy,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            unreachable: UnreachablePolicy::Remove,
        }
    }
}

/// What to do with a node that cannot be reached from any start node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnreachablePolicy {
    /// Delete the node and every connection touching it.
    #[default]
    Remove,
    /// Leave it in place; it is reported as a residual warning.
    Retain,
}

/// Which node attributes declare data fields and which reference them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub declares: Vec<String>,
    pub references: Vec<String>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            declares: vec!["outputField".to_string(), "declaresFields".to_string()],
            references: vec![
                "dataField".to_string(),
                "inputField".to_string(),
                "conditionField".to_string(),
            ],
        }
    }
}

impl MendConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.repair.max_iterations = max_iterations;
        self
    }

    pub fn with_unreachable_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.repair.unreachable = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: MendConfig =
            serde_json::from_value(serde_json::json!({"repair": {"unreachable": "retain"}}))
                .unwrap();
        assert_eq!(config.repair.unreachable, UnreachablePolicy::Retain);
        assert_eq!(config.repair.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.fields, FieldRules::default());
    }
}
