use snafu::{Backtrace, IntoError, Snafu};

/// Classification of a cloud REST failure, per the error taxonomy: callers
/// branch on this to decide requeue-with-backoff vs fatal vs silent-success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// 404. Benign on delete and on get-before-create.
    NotFound,
    /// 403 with a quota reason token. Requeue with exponential backoff.
    Quota,
    /// 403 without a quota reason token. Fatal; reported via health endpoint.
    Permission,
    /// Optimistic-concurrency precondition failure. Retry once, then requeue.
    Conflict,
    /// 5xx or network-level failure. Retry up to three times, then requeue.
    Transient,
}

impl CloudErrorKind {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudErrorKind::NotFound)
    }
}

#[derive(Snafu, Debug)]
#[snafu(crate_root(crate::error))]
#[allow(clippy::enum_variant_names)]
pub enum ControllerError {
    #[snafu(display("cloud API error ({kind:?}) on {operation}: {message}"))]
    Cloud {
        kind: CloudErrorKind,
        operation: String,
        message: String,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },

    #[snafu(display("malformed ingress: {reason}"))]
    Validation {
        reason: String,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },

    #[snafu(display("HTTP transport error: {source}"))]
    Transport {
        #[snafu(source)]
        source: reqwest::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },

    #[snafu(display("JSON serialization error: {source}"))]
    Serialization {
        #[snafu(source)]
        source: serde_json::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },

    #[snafu(display("I/O error: {source}"))]
    Io {
        #[snafu(source)]
        source: std::io::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
}

impl From<reqwest::Error> for ControllerError {
    fn from(value: reqwest::Error) -> Self {
        TransportSnafu.into_error(value)
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(value: serde_json::Error) -> Self {
        SerializationSnafu.into_error(value)
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(value: std::io::Error) -> Self {
        IoSnafu.into_error(value)
    }
}

impl ControllerError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ValidationSnafu {
            reason: reason.into(),
        }
        .build()
    }

    pub fn cloud(
        kind: CloudErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CloudSnafu {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
        .build()
    }

    /// The classification used by the reconciler's retry policy. Non-cloud
    /// errors (serialization, I/O, kube client setup) are always transient.
    pub fn cloud_kind(&self) -> Option<CloudErrorKind> {
        match self {
            ControllerError::Cloud { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
