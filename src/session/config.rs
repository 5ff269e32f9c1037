//! Orchestration loop policy.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::{parse_positive, ConfabConfig, ENV_MAX_ROUNDS};

pub const DEFAULT_MAX_ROUNDS: usize = 20;

/// What the loop does when the model calls a tool nobody provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MissingToolPolicy {
    /// Answer with a denial tool message and keep going.
    #[default]
    Deny,
    /// Answer with a denial tool message, then end the turn.
    Stop,
    /// Return `UnknownTool` to the caller.
    Fail,
}

/// What the loop does when a tool call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Answer with an error tool message so the model can react.
    #[default]
    ReportToModel,
    /// Return the error to the caller.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_rounds: usize,
    pub missing_tool: MissingToolPolicy,
    pub tool_errors: ToolErrorPolicy,
    /// Tool calls in flight per round; 1 executes strictly in order.
    pub parallelism: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            missing_tool: MissingToolPolicy::default(),
            tool_errors: ToolErrorPolicy::default(),
            parallelism: 1,
        }
    }
}

impl LoopConfig {
    /// Defaults with `CONFAB_MAX_ROUNDS` applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(rounds) = lookup(ENV_MAX_ROUNDS).and_then(|v| parse_positive(&v)) {
            config.max_rounds = rounds;
        }
        config
    }

    pub fn from_config(config: &ConfabConfig) -> Self {
        Self {
            max_rounds: config.max_rounds().unwrap_or(DEFAULT_MAX_ROUNDS),
            ..Self::default()
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_missing_tool(mut self, policy: MissingToolPolicy) -> Self {
        self.missing_tool = policy;
        self
    }

    pub fn with_tool_errors(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_errors = policy;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_rounds, 20);
        assert_eq!(config.missing_tool, MissingToolPolicy::Deny);
        assert_eq!(config.tool_errors, ToolErrorPolicy::ReportToModel);
        assert_eq!(config.parallelism, 1);
    }

    #[test]
    fn env_override_ignores_zero_and_garbage() {
        let config = LoopConfig::from_lookup(|_| Some("5".into()));
        assert_eq!(config.max_rounds, 5);
        let config = LoopConfig::from_lookup(|_| Some("0".into()));
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        let config = LoopConfig::from_lookup(|_| Some("many".into()));
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
    }

    #[test]
    fn setters_clamp_to_one() {
        let config = LoopConfig::default()
            .with_parallelism(0)
            .with_max_rounds(0);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.max_rounds, 1);
    }

    #[test]
    fn policies_parse_from_snake_case() {
        assert_eq!(
            MissingToolPolicy::from_str("stop").expect("parse"),
            MissingToolPolicy::Stop
        );
        assert_eq!(
            ToolErrorPolicy::from_str("report_to_model").expect("parse"),
            ToolErrorPolicy::ReportToModel
        );
        assert_eq!(ToolErrorPolicy::Fail.to_string(), "fail");
    }
}
