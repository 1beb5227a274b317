//! Retry state machine and wire envelopes for the script backend.
//!
//! The backend is a single action-dispatch endpoint: every call POSTs a
//! `{ action, data }` envelope and reads back `{ success, url?, message? }`.
//! The shell executes one attempt with a hard timeout; classification and
//! backoff scheduling happen here, shared by every call site.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    BACKOFF_MULTIPLIER, INITIAL_BACKOFF_MS, JITTER_MAX_MS, MAX_BACKOFF_MS, MAX_UPLOAD_RETRIES,
    UPLOAD_TIMEOUT_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptAction {
    UploadFile,
    DeleteFile,
    GetFileBase64,
    GetLogo,
    UpdateClient,
}

impl ScriptAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UploadFile => "UPLOAD_FILE",
            Self::DeleteFile => "DELETE_FILE",
            Self::GetFileBase64 => "GET_FILE_BASE64",
            Self::GetLogo => "GET_LOGO",
            Self::UpdateClient => "UPDATE_CLIENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEnvelope {
    pub action: ScriptAction,
    pub data: serde_json::Value,
}

impl ScriptEnvelope {
    #[must_use]
    pub fn new(action: ScriptAction, data: serde_json::Value) -> Self {
        Self { action, data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub base64_data: String,
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRefPayload {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "base64Data")]
    pub base64_data: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScriptError {
    #[error("network failure: {message}")]
    Network { message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("rejected by backend: {message}")]
    Rejected { message: String },
}

pub type ScriptResult = Result<ScriptResponse, ScriptError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Terminal,
}

/// 429 and 5xx are worth retrying; any other 4xx means the request itself
/// is wrong and will not get better.
#[must_use]
pub const fn classify_status(status: u16) -> FailureClass {
    match status {
        429 => FailureClass::Retryable,
        500..=599 => FailureClass::Retryable,
        _ => FailureClass::Terminal,
    }
}

impl ScriptError {
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => FailureClass::Retryable,
            Self::Status { status, .. } => classify_status(*status),
            Self::InvalidResponse { .. } | Self::Rejected { .. } => FailureClass::Terminal,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Retryable)
    }
}

/// Raised once retries are exhausted (or the failure was terminal),
/// carrying the last underlying cause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("request failed after {attempts} attempt(s): {cause}")]
pub struct TransportError {
    pub attempts: u32,
    pub cause: ScriptError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub attempt_timeout_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_UPLOAD_RETRIES,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            attempt_timeout_ms: UPLOAD_TIMEOUT_MS,
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    /// Monotonically non-decreasing in `retry`.
    #[must_use]
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(retry.saturating_sub(1).min(64) as i32);
        let delay = (self.initial_backoff_ms as f64 * factor).round();
        if delay >= MAX_BACKOFF_MS as f64 {
            MAX_BACKOFF_MS
        } else {
            delay as u64
        }
    }

    fn jitter_ms(&self) -> u64 {
        if self.jitter_max_ms == 0 {
            return 0;
        }
        use rand::Rng;
        rand::thread_rng().gen_range(0..self.jitter_max_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryAfter { delay_ms: u64 },
    GiveUp { error: TransportError },
}

/// Per-request retry state. `begin_attempt` before each dispatch,
/// `on_failure` after each failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetrySchedule {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Returns the attempt number just started (1-based).
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn on_failure(&self, error: ScriptError) -> RetryDecision {
        let exhausted = self.attempts > self.policy.max_retries;
        if exhausted || !error.is_retryable() {
            return RetryDecision::GiveUp {
                error: TransportError {
                    attempts: self.attempts,
                    cause: error,
                },
            };
        }
        RetryDecision::RetryAfter {
            delay_ms: self
                .policy
                .backoff_ms(self.attempts)
                .saturating_add(self.policy.jitter_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_policy() -> RetryPolicy {
        RetryPolicy {
            jitter_max_ms: 0,
            ..RetryPolicy::default()
        }
    }

    fn server_error() -> ScriptError {
        ScriptError::Status {
            status: 500,
            message: "internal".into(),
        }
    }

    #[test]
    fn persistent_500_makes_exactly_four_attempts_with_non_decreasing_waits() {
        let mut schedule = RetrySchedule::new(no_jitter_policy());
        let mut delays = Vec::new();

        let error = loop {
            schedule.begin_attempt();
            match schedule.on_failure(server_error()) {
                RetryDecision::RetryAfter { delay_ms } => delays.push(delay_ms),
                RetryDecision::GiveUp { error } => break error,
            }
        };

        // 1 initial + max_retries retries.
        assert_eq!(schedule.attempts(), MAX_UPLOAD_RETRIES + 1);
        assert_eq!(error.attempts, MAX_UPLOAD_RETRIES + 1);
        assert_eq!(error.cause, server_error());
        assert_eq!(delays.len() as u32, MAX_UPLOAD_RETRIES);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn backoff_grows_by_the_configured_multiplier() {
        let policy = no_jitter_policy();
        assert_eq!(policy.backoff_ms(1), INITIAL_BACKOFF_MS);
        assert_eq!(
            policy.backoff_ms(2),
            (INITIAL_BACKOFF_MS as f64 * BACKOFF_MULTIPLIER).round() as u64
        );
        assert!(policy.backoff_ms(3) > policy.backoff_ms(2));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = no_jitter_policy();
        assert_eq!(policy.backoff_ms(60), MAX_BACKOFF_MS);
    }

    #[test]
    fn client_errors_are_terminal_on_the_first_attempt() {
        let mut schedule = RetrySchedule::new(no_jitter_policy());
        schedule.begin_attempt();
        let decision = schedule.on_failure(ScriptError::Status {
            status: 404,
            message: "not found".into(),
        });
        assert!(matches!(
            decision,
            RetryDecision::GiveUp { error } if error.attempts == 1
        ));
    }

    #[test]
    fn rate_limiting_and_timeouts_are_retryable() {
        assert!(ScriptError::Status {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(ScriptError::Timeout { timeout_ms: 45_000 }.is_retryable());
        assert!(ScriptError::Network {
            message: "reset".into()
        }
        .is_retryable());
        assert!(!ScriptError::Rejected {
            message: "quota".into()
        }
        .is_retryable());
    }

    #[test]
    fn envelope_serializes_with_the_wire_field_names() {
        let payload = UploadPayload {
            base64_data: "QUJD".into(),
            file_name: "photo.jpg".into(),
            mime_type: "image/jpeg".into(),
        };
        let envelope = ScriptEnvelope::new(
            ScriptAction::UploadFile,
            serde_json::to_value(&payload).unwrap(),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["action"], "UPLOAD_FILE");
        assert_eq!(json["data"]["base64Data"], "QUJD");
        assert_eq!(json["data"]["fileName"], "photo.jpg");
        assert_eq!(json["data"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn response_parses_with_missing_optional_fields() {
        let parsed: ScriptResponse =
            serde_json::from_str(r#"{"success": true, "url": "https://files/x"}"#).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.url.as_deref(), Some("https://files/x"));
        assert_eq!(parsed.message, None);
    }
}
