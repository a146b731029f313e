//! Generation requests and their validation
//!
//! A [`GenerationRequest`] can only be obtained through [`RequestValidator`],
//! so holding one means the size, timeout and deny-list checks passed.

use crate::config::schema::LimitsConfig;
use crate::error::{KilnError, KilnResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A validated request to build and run a script
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    source: String,
    timeout: Duration,
}

impl GenerationRequest {
    /// The trimmed source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Deadline for build and run together
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Wire shape of a generate call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub source_text: String,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

/// Wire shape of a generate response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateResponse {
    #[serde(rename_all = "camelCase")]
    Success { generated_code: String, success: bool },
    Failure { error: String, success: bool },
}

impl GenerateResponse {
    pub fn success(generated_code: String) -> Self {
        Self::Success {
            generated_code,
            success: true,
        }
    }

    pub fn failure(error: &KilnError) -> Self {
        Self::Failure {
            error: error.to_string(),
            success: false,
        }
    }
}

/// Applies size, timeout and deny-list rules to raw input
#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_source_bytes: usize,
    max_timeout_secs: f64,
    default_timeout_secs: f64,
    deny_patterns: Vec<String>,
}

impl RequestValidator {
    /// Create a validator from the configured limits
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_source_bytes: limits.max_source_bytes,
            max_timeout_secs: limits.max_timeout_secs,
            default_timeout_secs: limits.default_timeout_secs,
            deny_patterns: limits
                .deny_patterns
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Validate raw input into a request
    pub fn validate(&self, source: &str, timeout_secs: Option<f64>) -> KilnResult<GenerationRequest> {
        let source = source.trim();

        if source.is_empty() {
            return Err(KilnError::EmptySource);
        }

        if source.len() > self.max_source_bytes {
            return Err(KilnError::SourceTooLarge {
                size: source.len(),
                max: self.max_source_bytes,
            });
        }

        let secs = timeout_secs.unwrap_or(self.default_timeout_secs);
        let timeout = match Duration::try_from_secs_f64(secs) {
            Ok(timeout) if secs > 0.0 && secs <= self.max_timeout_secs => timeout,
            _ => return Err(KilnError::InvalidTimeout(secs, self.max_timeout_secs)),
        };

        if let Some(pattern) = self.denied_pattern(source) {
            debug!(pattern, "Rejecting source containing a denied pattern");
            return Err(KilnError::ForbiddenPattern {
                pattern: pattern.to_string(),
            });
        }

        Ok(GenerationRequest {
            source: source.to_string(),
            timeout,
        })
    }

    /// Validate a decoded wire body
    pub fn validate_body(&self, body: &GenerateBody) -> KilnResult<GenerationRequest> {
        self.validate(&body.source_text, body.timeout_seconds)
    }

    /// Validate a raw JSON payload
    pub fn validate_json(&self, payload: &[u8]) -> KilnResult<GenerationRequest> {
        let body: GenerateBody = serde_json::from_slice(payload)
            .map_err(|e| KilnError::InvalidRequest(e.to_string()))?;
        self.validate_body(&body)
    }

    fn denied_pattern(&self, source: &str) -> Option<&str> {
        self.deny_patterns
            .iter()
            .find(|p| source.contains(p.as_str()))
            .map(String::as_str)
    }
}
