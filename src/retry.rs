use std::fmt;

use http::{Method, StatusCode};

use crate::context::Context;
use crate::error::{ContextError, Error, TransportError};
use crate::request::Request;
use crate::response::HttpResponse;
use crate::util::redact_uri_for_logs;

/// Result of a single dispatch against the transport.
pub enum AttemptOutcome {
    Response(HttpResponse),
    Transport(TransportError),
    Cancelled(ContextError),
}

impl AttemptOutcome {
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn response_mut(&mut self) -> Option<&mut HttpResponse> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(http::Response::status)
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(error) => Some(error),
            _ => None,
        }
    }

    /// Converts the outcome into what `execute` hands back to the caller.
    pub fn into_result(self, method: &Method, uri: &str) -> Result<HttpResponse, Error> {
        match self {
            Self::Response(response) => Ok(response),
            Self::Transport(error) => Err(Error::from_transport(error, method, uri)),
            Self::Cancelled(error) => Err(Error::Context { source: error }),
        }
    }
}

impl fmt::Debug for AttemptOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(response) => formatter
                .debug_tuple("Response")
                .field(&response.status())
                .finish(),
            Self::Transport(error) => formatter.debug_tuple("Transport").field(error).finish(),
            Self::Cancelled(error) => formatter.debug_tuple("Cancelled").field(error).finish(),
        }
    }
}

/// Decides whether an attempt should be retried.
///
/// `Ok(true)` retries, `Ok(false)` hands the outcome back to the caller and
/// `Err(error)` stops with `error` in place of the outcome. Implementations
/// must not consume the response body; the client drains it before retrying.
pub trait CheckRetry: Send + Sync {
    fn check_retry(&self, context: &Context, outcome: &AttemptOutcome) -> Result<bool, Error>;
}

impl<F> CheckRetry for F
where
    F: Fn(&Context, &AttemptOutcome) -> Result<bool, Error> + Send + Sync,
{
    fn check_retry(&self, context: &Context, outcome: &AttemptOutcome) -> Result<bool, Error> {
        self(context, outcome)
    }
}

/// Retries transient transport failures and 5xx responses other than 501.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryPolicy;

impl CheckRetry for DefaultRetryPolicy {
    fn check_retry(&self, context: &Context, outcome: &AttemptOutcome) -> Result<bool, Error> {
        default_retry_policy(context, outcome)
    }
}

pub fn default_retry_policy(context: &Context, outcome: &AttemptOutcome) -> Result<bool, Error> {
    if let Some(error) = context.err() {
        return Err(Error::Context { source: error });
    }

    match outcome {
        AttemptOutcome::Cancelled(error) => Err(Error::Context { source: *error }),
        AttemptOutcome::Transport(error) => Ok(!error.kind().is_permanent()),
        AttemptOutcome::Response(response) => Ok(is_retryable_status(response.status())),
    }
}

/// 5xx and any code above that range, except 501 Not Implemented.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.as_u16() >= 500 && status != StatusCode::NOT_IMPLEMENTED
}

/// Transforms the final outcome once retries are exhausted.
///
/// The handler owns the outcome: a response it does not return is dropped,
/// which releases its connection.
pub trait ErrorHandler: Send + Sync {
    fn handle(
        &self,
        request: &Request,
        outcome: AttemptOutcome,
        attempts: usize,
    ) -> Result<HttpResponse, Error>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Request, AttemptOutcome, usize) -> Result<HttpResponse, Error> + Send + Sync,
{
    fn handle(
        &self,
        request: &Request,
        outcome: AttemptOutcome,
        attempts: usize,
    ) -> Result<HttpResponse, Error> {
        self(request, outcome, attempts)
    }
}

/// Returns the last response or error unmodified.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughErrorHandler;

impl ErrorHandler for PassthroughErrorHandler {
    fn handle(
        &self,
        request: &Request,
        outcome: AttemptOutcome,
        _attempts: usize,
    ) -> Result<HttpResponse, Error> {
        let uri = redact_uri_for_logs(&request.uri().to_string());
        outcome.into_result(request.method(), &uri)
    }
}
