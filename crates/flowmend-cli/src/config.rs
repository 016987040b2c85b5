use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use flowmend_core::{MendConfig, UnreachablePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnreachableArg {
    Remove,
    Retain,
}

impl From<UnreachableArg> for UnreachablePolicy {
    fn from(arg: UnreachableArg) -> Self {
        match arg {
            UnreachableArg::Remove => UnreachablePolicy::Remove,
            UnreachableArg::Retain => UnreachablePolicy::Retain,
        }
    }
}

/// Load a TOML config file, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<MendConfig> {
    let Some(path) = path else {
        return Ok(MendConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml_edit::de::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Apply command-line overrides on top of the file config.
pub fn apply_overrides(
    mut config: MendConfig,
    max_iterations: Option<usize>,
    unreachable: Option<UnreachableArg>,
) -> MendConfig {
    if let Some(max) = max_iterations {
        config = config.with_max_iterations(max);
    }
    if let Some(policy) = unreachable {
        config = config.with_unreachable_policy(policy.into());
    }
    config
}
