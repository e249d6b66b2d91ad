//! Function construction options
//!
//! Options arrive as a JSON dictionary (unknown keys are rejected) and may
//! be overridden from the environment:
//!
//! | key              | env                     | default |
//! |------------------|-------------------------|---------|
//! | `cse`            | `SXTAPE_CSE`            | true    |
//! | `live_variables` | `SXTAPE_LIVE_VARIABLES` | true    |
//! | `verbose`        | `SXTAPE_VERBOSE`        | false   |

use crate::{FunctionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::env;
use sxtape_vm::CompileOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionOptions {
    /// Emit shared subexpressions once
    #[serde(default = "default_true")]
    pub cse: bool,

    /// Reuse work slots of dead values
    #[serde(default = "default_true")]
    pub live_variables: bool,

    /// Log the compiled algorithm
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FunctionOptions {
    fn default() -> Self {
        FunctionOptions {
            cse: true,
            live_variables: true,
            verbose: false,
        }
    }
}

impl FunctionOptions {
    /// Parse an options dictionary; `null` gives the defaults
    pub fn from_dict(dict: &JsonValue) -> Result<Self> {
        if dict.is_null() {
            return Ok(FunctionOptions::default());
        }
        FunctionOptions::deserialize(dict).map_err(|e| FunctionError::InvalidOptions(e.to_string()))
    }

    /// Apply `SXTAPE_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flags: [(&str, &mut bool); 3] = [
            ("SXTAPE_CSE", &mut self.cse),
            ("SXTAPE_LIVE_VARIABLES", &mut self.live_variables),
            ("SXTAPE_VERBOSE", &mut self.verbose),
        ];
        for (key, flag) in flags {
            if let Some(raw) = lookup(key) {
                match parse_bool(&raw) {
                    Some(v) => *flag = v,
                    None => log::warn!("ignoring {key}={raw:?}: not a boolean"),
                }
            }
        }
        self
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            cse: self.cse,
            live_variables: self.live_variables,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dictionary_with_defaults() {
        let opts = FunctionOptions::from_dict(&json!({ "cse": false })).unwrap();
        assert!(!opts.cse);
        assert!(opts.live_variables);
        assert!(!opts.verbose);
        assert_eq!(
            FunctionOptions::from_dict(&JsonValue::Null).unwrap(),
            FunctionOptions::default()
        );
    }

    #[test]
    fn unknown_keys_and_bad_types_are_rejected() {
        let err = FunctionOptions::from_dict(&json!({ "jit": true })).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidOptions(msg) if msg.contains("jit")));
        let err = FunctionOptions::from_dict(&json!({ "cse": "sometimes" })).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidOptions(_)));
    }

    #[test]
    fn overrides_take_precedence() {
        let opts = FunctionOptions::default().with_overrides(|key| match key {
            "SXTAPE_CSE" => Some("off".into()),
            "SXTAPE_VERBOSE" => Some("1".into()),
            "SXTAPE_LIVE_VARIABLES" => Some("maybe".into()),
            _ => None,
        });
        assert!(!opts.cse);
        assert!(opts.verbose);
        assert!(opts.live_variables);
        assert_eq!(
            opts.compile_options(),
            CompileOptions {
                cse: false,
                live_variables: true
            }
        );
    }
}
