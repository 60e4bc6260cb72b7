//! Chunking configuration and its validation rules.
//!
//! A [`ChunkingConfig`] tells the parser how to split a document into
//! retrievable chunks. It is always persisted as a whole object
//! (replace-style `PUT`); there are no partial updates.
//!
//! Input that arrives from the command line or an untyped JSON body is
//! first collected into a [`ChunkingDraft`] whose fields are all optional,
//! so that a missing field can be reported the same way as an out-of-range
//! one. Validation collects every field error instead of stopping at the
//! first, and never touches the network.
//!
//! | Field | Rule |
//! |-------|------|
//! | `strategy` | required; `basic`, `smart`, `advanced` or `strict_regex` |
//! | `chunk_token_num` | required; 50 ..= 2048 |
//! | `min_chunk_tokens` | required; 10 ..= 500 |
//! | `regex_pattern` | required, non-blank and valid iff `strategy = strict_regex` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const CHUNK_TOKEN_RANGE: RangeInclusive<i64> = 50..=2048;
pub const MIN_CHUNK_TOKEN_RANGE: RangeInclusive<i64> = 10..=500;

/// Algorithm family used to split a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed-size token windows.
    Basic,
    /// Structure-aware splitting (backend default).
    #[default]
    Smart,
    /// Splits on headings.
    Advanced,
    /// Splits on matches of a user-supplied pattern.
    StrictRegex,
}

impl ChunkingStrategy {
    pub const ALL: [ChunkingStrategy; 4] = [
        ChunkingStrategy::Basic,
        ChunkingStrategy::Smart,
        ChunkingStrategy::Advanced,
        ChunkingStrategy::StrictRegex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::Basic => "basic",
            ChunkingStrategy::Smart => "smart",
            ChunkingStrategy::Advanced => "advanced",
            ChunkingStrategy::StrictRegex => "strict_regex",
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown strategy '{}'; expected basic, smart, advanced or strict_regex",
                    s
                )
            })
    }
}

/// A validated-shape chunking configuration as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkingStrategy,
    #[serde(default = "default_chunk_token_num")]
    pub chunk_token_num: i64,
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_pattern: Option<String>,
}

fn default_chunk_token_num() -> i64 {
    256
}
fn default_min_chunk_tokens() -> i64 {
    10
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Smart,
            chunk_token_num: default_chunk_token_num(),
            min_chunk_tokens: default_min_chunk_tokens(),
            regex_pattern: None,
        }
    }
}

impl ChunkingConfig {
    /// Check ranges and the regex rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        check_ranges(self.chunk_token_num, self.min_chunk_tokens, &mut errors);
        check_regex(self.strategy, self.regex_pattern.as_deref(), &mut errors);
        errors.into_result()
    }
}

/// Unvalidated chunking input with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingDraft {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub chunk_token_num: Option<i64>,
    #[serde(default)]
    pub min_chunk_tokens: Option<i64>,
    #[serde(default)]
    pub regex_pattern: Option<String>,
}

impl ChunkingDraft {
    /// Validate every field and build a [`ChunkingConfig`].
    ///
    /// The regex pattern is dropped for strategies other than
    /// `strict_regex`, since the backend ignores it there.
    pub fn validate(&self) -> Result<ChunkingConfig, ValidationErrors> {
        let (strategy, pattern, errors) = self.check(true);
        errors.into_result()?;

        // All fields are present once no error was recorded.
        let strategy = strategy.unwrap_or_default();
        Ok(ChunkingConfig {
            strategy,
            chunk_token_num: self.chunk_token_num.unwrap_or_else(default_chunk_token_num),
            min_chunk_tokens: self
                .min_chunk_tokens
                .unwrap_or_else(default_min_chunk_tokens),
            regex_pattern: match strategy {
                ChunkingStrategy::StrictRegex => pattern.map(String::from),
                _ => None,
            },
        })
    }

    /// Validate only the fields that are set. Missing numbers and a missing
    /// pattern are not errors here; the strategy is always required.
    pub fn validate_present(&self) -> Result<(), ValidationErrors> {
        self.check(false).2.into_result()
    }

    /// Whether every field the strategy needs is set.
    pub fn is_complete(&self) -> bool {
        self.chunk_token_num.is_some()
            && self.min_chunk_tokens.is_some()
            && (self.regex_pattern.is_some() || !self.wants_regex())
    }

    /// Fill unset fields from `current`. The pattern is only taken over
    /// when the strategy uses one.
    pub fn fill_from(&mut self, current: &ChunkingConfig) {
        self.chunk_token_num.get_or_insert(current.chunk_token_num);
        self.min_chunk_tokens.get_or_insert(current.min_chunk_tokens);
        if self.regex_pattern.is_none() && self.wants_regex() {
            self.regex_pattern = current.regex_pattern.clone();
        }
    }

    fn wants_regex(&self) -> bool {
        self.strategy
            .as_deref()
            .and_then(|s| s.trim().parse::<ChunkingStrategy>().ok())
            == Some(ChunkingStrategy::StrictRegex)
    }

    fn check(
        &self,
        require_all: bool,
    ) -> (Option<ChunkingStrategy>, Option<&str>, ValidationErrors) {
        let mut errors = ValidationErrors::default();

        let strategy = match self.strategy.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("strategy", "strategy is required");
                None
            }
            Some(s) => match s.parse::<ChunkingStrategy>() {
                Ok(st) => Some(st),
                Err(msg) => {
                    errors.push("strategy", msg);
                    None
                }
            },
        };

        match self.chunk_token_num {
            Some(size) => check_chunk_size(size, &mut errors),
            None if require_all => errors.push("chunk_token_num", "chunk size is required"),
            None => {}
        }
        match self.min_chunk_tokens {
            Some(min) => check_min_chunk(min, &mut errors),
            None if require_all => {
                errors.push("min_chunk_tokens", "min chunk size is required")
            }
            None => {}
        }

        // Surrounding whitespace is dropped; the trimmed pattern is both
        // checked and stored.
        let pattern = self.regex_pattern.as_deref().map(str::trim);
        if let Some(strategy) = strategy {
            if require_all || pattern.is_some() {
                check_regex(strategy, pattern, &mut errors);
            }
        }

        (strategy, pattern, errors)
    }
}

fn check_ranges(size: i64, min: i64, errors: &mut ValidationErrors) {
    check_chunk_size(size, errors);
    check_min_chunk(min, errors);
}

fn check_chunk_size(size: i64, errors: &mut ValidationErrors) {
    if !CHUNK_TOKEN_RANGE.contains(&size) {
        errors.push("chunk_token_num", "chunk size must be in [50,2048]");
    }
}

fn check_min_chunk(min: i64, errors: &mut ValidationErrors) {
    if !MIN_CHUNK_TOKEN_RANGE.contains(&min) {
        errors.push("min_chunk_tokens", "min chunk size must be in [10,500]");
    }
}

fn check_regex(strategy: ChunkingStrategy, pattern: Option<&str>, errors: &mut ValidationErrors) {
    if strategy != ChunkingStrategy::StrictRegex {
        return;
    }
    match pattern {
        None => errors.push("regex_pattern", "regex required"),
        Some(p) if p.trim().is_empty() => errors.push("regex_pattern", "regex required"),
        Some(p) => {
            if let Err(e) = regex::Regex::new(p) {
                errors.push("regex_pattern", format!("invalid regex: {}", e));
            }
        }
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All field errors found while validating one config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Error message recorded for `field`, if any.
    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "invalid chunking config: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(strategy: &str, size: i64, min: i64, regex: Option<&str>) -> ChunkingDraft {
        ChunkingDraft {
            strategy: Some(strategy.to_string()),
            chunk_token_num: Some(size),
            min_chunk_tokens: Some(min),
            regex_pattern: regex.map(String::from),
        }
    }

    #[test]
    fn strict_regex_requires_pattern() {
        let err = draft("strict_regex", 256, 10, Some("")).validate().unwrap_err();
        assert_eq!(err.for_field("regex_pattern"), Some("regex required"));
        assert_eq!(err.errors.len(), 1);
    }

    #[test]
    fn strict_regex_blank_pattern_rejected() {
        let err = draft("strict_regex", 256, 10, Some("   ")).validate().unwrap_err();
        assert_eq!(err.for_field("regex_pattern"), Some("regex required"));
    }

    #[test]
    fn strict_regex_invalid_pattern_rejected() {
        let err = draft("strict_regex", 256, 10, Some("第(\\d+条"))
            .validate()
            .unwrap_err();
        assert!(err
            .for_field("regex_pattern")
            .unwrap()
            .starts_with("invalid regex"));
    }

    #[test]
    fn strict_regex_valid_pattern_kept() {
        let cfg = draft("strict_regex", 512, 20, Some("第[零一二三四五六七八九十百千万\\d]+条"))
            .validate()
            .unwrap();
        assert_eq!(cfg.strategy, ChunkingStrategy::StrictRegex);
        assert!(cfg.regex_pattern.is_some());
    }

    #[test]
    fn saved_pattern_is_the_validated_one() {
        let cfg = draft("strict_regex", 256, 10, Some("  ^Article \\d+\n"))
            .validate()
            .unwrap();
        assert_eq!(cfg.regex_pattern.as_deref(), Some("^Article \\d+"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn chunk_size_out_of_range() {
        let err = draft("basic", 10, 10, None).validate().unwrap_err();
        assert_eq!(
            err.for_field("chunk_token_num"),
            Some("chunk size must be in [50,2048]")
        );
        assert!(err.for_field("min_chunk_tokens").is_none());
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(draft("basic", 50, 10, None).validate().is_ok());
        assert!(draft("basic", 2048, 500, None).validate().is_ok());
        assert!(draft("basic", 2049, 10, None).validate().is_err());
        assert!(draft("basic", 256, 501, None).validate().is_err());
        assert!(draft("basic", 256, 9, None).validate().is_err());
    }

    #[test]
    fn regex_ignored_for_other_strategies() {
        let cfg = draft("smart", 256, 10, Some("(unclosed")).validate().unwrap();
        assert_eq!(cfg.regex_pattern, None);
    }

    #[test]
    fn missing_fields_reported_together() {
        let err = ChunkingDraft::default().validate().unwrap_err();
        assert!(err.for_field("strategy").is_some());
        assert_eq!(err.for_field("chunk_token_num"), Some("chunk size is required"));
        assert_eq!(
            err.for_field("min_chunk_tokens"),
            Some("min chunk size is required")
        );
    }

    #[test]
    fn present_fields_checked_without_the_rest() {
        let partial = ChunkingDraft {
            strategy: Some("basic".into()),
            chunk_token_num: Some(10),
            ..Default::default()
        };
        let err = partial.validate_present().unwrap_err();
        assert_eq!(
            err.for_field("chunk_token_num"),
            Some("chunk size must be in [50,2048]")
        );
        assert_eq!(err.errors.len(), 1);

        let ok = ChunkingDraft {
            strategy: Some("strict_regex".into()),
            ..Default::default()
        };
        assert!(ok.validate_present().is_ok());
        assert!(!ok.is_complete());
    }

    #[test]
    fn pattern_only_needed_for_strict_regex() {
        let basic = ChunkingDraft {
            strategy: Some("basic".into()),
            chunk_token_num: Some(256),
            min_chunk_tokens: Some(10),
            regex_pattern: None,
        };
        assert!(basic.is_complete());

        let mut strict = ChunkingDraft {
            strategy: Some("strict_regex".into()),
            ..Default::default()
        };
        strict.fill_from(&ChunkingConfig {
            strategy: ChunkingStrategy::StrictRegex,
            chunk_token_num: 512,
            min_chunk_tokens: 20,
            regex_pattern: Some("^Part".into()),
        });
        assert!(strict.is_complete());
        let cfg = strict.validate().unwrap();
        assert_eq!(cfg.chunk_token_num, 512);
        assert_eq!(cfg.regex_pattern.as_deref(), Some("^Part"));

        let mut smart = ChunkingDraft {
            strategy: Some("smart".into()),
            ..Default::default()
        };
        smart.fill_from(&ChunkingConfig {
            regex_pattern: Some("^Part".into()),
            ..Default::default()
        });
        assert!(smart.regex_pattern.is_none());
    }

    #[test]
    fn unknown_strategy_rejected() {
        let err = draft("semantic", 256, 10, None).validate().unwrap_err();
        assert!(err.for_field("strategy").unwrap().contains("unknown strategy"));
    }

    #[test]
    fn typed_config_validation() {
        let mut cfg = ChunkingConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.strategy = ChunkingStrategy::StrictRegex;
        assert_eq!(
            cfg.validate().unwrap_err().for_field("regex_pattern"),
            Some("regex required")
        );
    }

    #[test]
    fn deserialize_fills_backend_defaults() {
        let cfg: ChunkingConfig = serde_json::from_str(r#"{"strategy":"basic"}"#).unwrap();
        assert_eq!(cfg.strategy, ChunkingStrategy::Basic);
        assert_eq!(cfg.chunk_token_num, 256);
        assert_eq!(cfg.min_chunk_tokens, 10);
    }

    #[test]
    fn serializes_snake_case_strategy() {
        let cfg = ChunkingConfig {
            strategy: ChunkingStrategy::StrictRegex,
            chunk_token_num: 256,
            min_chunk_tokens: 10,
            regex_pattern: Some("x".into()),
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["strategy"], "strict_regex");
        assert_eq!(json["regex_pattern"], "x");
    }
}
