use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    UntrustedCertificate,
    RedirectLimitExceeded,
    UnsupportedScheme,
    Timeout,
    Read,
    Other,
}

impl TransportErrorKind {
    /// Kinds that describe a misconfiguration rather than a transient fault.
    pub const fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::UntrustedCertificate | Self::RedirectLimitExceeded | Self::UnsupportedScheme
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::UntrustedCertificate => "untrusted_certificate",
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::Timeout => "timeout",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Failure reported by a [`Transport`](crate::Transport) for a single dispatch.
#[derive(Debug, Error)]
#[error("{kind} error: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    RequestBuild,
    UnsupportedBody,
    RewindBody,
    SerializeForm,
    Transport,
    Context,
    RetriesExhausted,
    ReadBody,
    TlsConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::UnsupportedBody => "unsupported_body",
            Self::RewindBody => "rewind_body",
            Self::SerializeForm => "serialize_form",
            Self::Transport => "transport",
            Self::Context => "context",
            Self::RetriesExhausted => "retries_exhausted",
            Self::ReadBody => "read_body",
            Self::TlsConfig => "tls_config",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("cannot handle request body of type {type_name}")]
    UnsupportedBody { type_name: &'static str },
    #[error("failed to rewind request body: {source}")]
    RewindBody {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Context {
        #[from]
        source: ContextError,
    },
    #[error("{method} {uri} giving up after {attempts} attempt(s)")]
    RetriesExhausted {
        method: Method,
        uri: String,
        attempts: usize,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::UnsupportedBody { .. } => ErrorCode::UnsupportedBody,
            Self::RewindBody { .. } => ErrorCode::RewindBody,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Context { .. } => ErrorCode::Context,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn from_transport(error: TransportError, method: &Method, uri: &str) -> Self {
        Self::Transport {
            kind: error.kind,
            method: method.clone(),
            uri: uri.to_owned(),
            source: error.source,
        }
    }
}

impl From<http::Error> for Error {
    fn from(source: http::Error) -> Self {
        Self::RequestBuild { source }
    }
}
