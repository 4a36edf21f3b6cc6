//! Error classification for retry behaviour
//!
//! Errors from the evroc API fall into three classes. Transient errors are
//! swallowed and retried on a fixed delay; terminal and unknown errors are
//! returned so the controller's error policy backs off and the object
//! records the failure.

use std::time::Duration;

use tracing::debug;

use crate::controller::Outcome;
use crate::error::{Error, Result};

/// Delay before retrying after a transient error
pub const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delay used while waiting on bootstrap data, identity secrets and VM boot
pub const BOOTSTRAP_DATA_RETRY_DELAY: Duration = Duration::from_secs(5);

const TRANSIENT_MESSAGES: &[&str] = &[
    "timeout",
    "connection refused",
    "connection reset",
    "rate limit",
    "too many requests",
    "temporarily unavailable",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Terminal,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Terminal => "terminal",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Classify an error. Transient wins when both checks would match.
pub fn classify(err: &Error) -> ErrorClass {
    if is_transient(err) {
        ErrorClass::Transient
    } else if is_terminal(err) {
        ErrorClass::Terminal
    } else {
        ErrorClass::Unknown
    }
}

pub fn is_transient(err: &Error) -> bool {
    match err.root() {
        Error::KubeError(kube::Error::HyperError(_) | kube::Error::Service(_)) => true,
        // API messages echo object names back, so only the status counts
        Error::KubeError(kube::Error::Api(e)) => {
            matches!(e.code, 503 | 429)
                || matches!(
                    e.reason.as_str(),
                    "ServiceUnavailable" | "TooManyRequests" | "Timeout" | "ServerTimeout"
                )
        }
        // Context layers carry resource names and are left out of the match
        root => {
            let message = root.to_string().to_lowercase();
            TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
        }
    }
}

pub fn is_terminal(err: &Error) -> bool {
    matches!(
        err.api_code(),
        Some(422) | Some(400) | Some(403) | Some(401) | Some(404) | Some(409)
    ) || matches!(
        err.api_reason(),
        Some("Invalid" | "BadRequest" | "Forbidden" | "Unauthorized" | "NotFound" | "Conflict")
    )
}

/// Turn the result of a provisioning step into a reconcile outcome.
///
/// `Ok` means nothing more to do. Transient errors become a requeue after
/// [`TRANSIENT_RETRY_DELAY`] with no error; anything else is wrapped with
/// `context` and returned.
pub fn handle_result(result: Result<()>, context: &str) -> Result<Outcome> {
    let err = match result {
        Ok(()) => return Ok(Outcome::Done),
        Err(err) => err,
    };

    match classify(&err) {
        ErrorClass::Transient => {
            debug!("Transient error, retrying in {:?}: {}", TRANSIENT_RETRY_DELAY, err);
            Ok(Outcome::RequeueAfter(TRANSIENT_RETRY_DELAY))
        }
        ErrorClass::Terminal | ErrorClass::Unknown => Err(err.context(context)),
    }
}
