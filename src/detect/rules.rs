//! Data-driven sensitive-pattern rules.
//!
//! Rules are versioned configuration, not code: a JSON file can replace or
//! extend the built-in set without touching the detector. Each rule names a
//! category, a regex pattern, and an optional post-match validator.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rule file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid pattern for category '{category}': {source}")]
    Pattern {
        category: String,
        source: regex::Error,
    },
}

/// Extra validation applied to a raw pattern match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    #[default]
    None,
    /// Luhn checksum over the matched digits (card numbers)
    Luhn,
}

/// One sensitive-pattern rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub category: String,
    pub pattern: String,
    #[serde(default)]
    pub validator: Validator,
}

/// A versioned set of rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u32,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Built-in default rules: SSN, card numbers (Luhn-gated), phone numbers
    pub fn builtin() -> Self {
        Self {
            version: 1,
            rules: vec![
                Rule {
                    category: "ssn".to_string(),
                    pattern: r"\b\d{3}[- ]?\d{2}[- ]?\d{4}\b".to_string(),
                    validator: Validator::None,
                },
                Rule {
                    category: "credit_card".to_string(),
                    pattern: r"\b\d(?:[- ]?\d){12,18}\b".to_string(),
                    validator: Validator::Luhn,
                },
                Rule {
                    category: "phone".to_string(),
                    pattern: r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b".to_string(),
                    validator: Validator::None,
                },
            ],
        }
    }

    /// Load a rule set from a JSON file
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Luhn checksum over the digit characters of `text`
pub fn luhn_valid(text: &str) -> bool {
    let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}
