//! Error types for the evroc infrastructure provider

use thiserror::Error;

/// Main error type for provider operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error, from either the management cluster or the evroc API
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid or missing configuration (identity secret, kubeconfig, flags)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A secret exists but does not carry the expected data key
    #[error("secret {secret} does not contain {key} data")]
    MissingSecretKey { secret: String, key: String },

    /// Serialization error while building patches
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An error wrapped with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap this error with a description of the failed operation
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping any context layers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status code of the underlying API error, if there is one
    pub fn api_code(&self) -> Option<u16> {
        match self.root() {
            Error::KubeError(kube::Error::Api(e)) => Some(e.code),
            _ => None,
        }
    }

    /// Machine-readable reason of the underlying API error, if there is one
    pub fn api_reason(&self) -> Option<&str> {
        match self.root() {
            Error::KubeError(kube::Error::Api(e)) => Some(e.reason.as_str()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    pub fn is_forbidden(&self) -> bool {
        self.api_code() == Some(403)
    }

    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Whether the controller should retry soon rather than back off
    pub fn is_retriable(&self) -> bool {
        crate::cloud::errors::is_transient(self) || self.is_conflict()
    }
}

/// Extension for attaching context to fallible results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Into::<Error>::into(e).context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Into::<Error>::into(e).context(f()))
    }
}
