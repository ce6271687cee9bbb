use serde::Serialize;

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseoutType {
    Success,
    NotReady,
    Failed,
    AbortAllProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCode {
    Success,
    RetryEligibleNetworkError,
    NoRetry,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub closeout: CloseoutType,
    pub retry: RetryCode,
    pub message: String,
}

impl CaptureOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            closeout: CloseoutType::Success,
            retry: RetryCode::Success,
            message: message.into(),
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            closeout: CloseoutType::NotReady,
            retry: RetryCode::NoRetry,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            closeout: CloseoutType::Failed,
            retry: RetryCode::NoRetry,
            message: message.into(),
        }
    }

    pub fn abort_all_processing(&self) -> bool {
        self.closeout == CloseoutType::AbortAllProcessing
    }

    /// JSON rendering handed back to the pipeline scheduler.
    pub fn to_json(&self) -> String {
        // A closed struct of enums and a string cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// Substrings reported by the OS when an SMB session itself is dead or
// saturated. Seeing one of these means every later job on this host will
// fail the same way until the session is torn down.
const SESSION_FAULTS: &[&str] = &[
    "unexpected network error",
    "multiple connections",
    "network name is no longer available",
];

// Transient credential faults: the domain controller may simply have been
// unreachable, so the next scheduled attempt is allowed to retry.
const LOGON_FAULTS: &[&str] = &[
    "unknown user name or bad password",
    "logon failure",
    "user name or password is incorrect",
];

pub fn classify_fault(message: &str) -> CaptureOutcome {
    let lower = message.to_lowercase();
    if SESSION_FAULTS.iter().any(|needle| lower.contains(needle)) {
        return CaptureOutcome {
            closeout: CloseoutType::AbortAllProcessing,
            retry: RetryCode::RetryEligibleNetworkError,
            message: message.to_string(),
        };
    }
    if LOGON_FAULTS.iter().any(|needle| lower.contains(needle)) {
        return CaptureOutcome {
            closeout: CloseoutType::Failed,
            retry: RetryCode::RetryEligibleNetworkError,
            message: message.to_string(),
        };
    }
    CaptureOutcome {
        closeout: CloseoutType::Failed,
        retry: RetryCode::NoRetry,
        message: message.to_string(),
    }
}

pub fn outcome_for(error: &CaptureError) -> CaptureOutcome {
    match error {
        CaptureError::NotReady(message) => CaptureOutcome::not_ready(message.clone()),
        CaptureError::ShareConnect { code, .. } => {
            if crate::share::is_session_fault_code(*code) {
                CaptureOutcome {
                    closeout: CloseoutType::AbortAllProcessing,
                    retry: RetryCode::RetryEligibleNetworkError,
                    message: error.to_string(),
                }
            } else if crate::share::is_logon_fault_code(*code) {
                CaptureOutcome {
                    closeout: CloseoutType::Failed,
                    retry: RetryCode::RetryEligibleNetworkError,
                    message: error.to_string(),
                }
            } else {
                classify_fault(&error.to_string())
            }
        }
        CaptureError::Copy(_) | CaptureError::Filesystem(_) => classify_fault(&error.to_string()),
        other => CaptureOutcome::failed(other.to_string()),
    }
}
