//! `retryhttp` wraps a single logical HTTP call with automatic retries,
//! exponential or jittered backoff and request-body replay.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use retryhttp::prelude::{Client, Context, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .retry_max(3)
//!         .retry_wait_min(Duration::from_millis(100))
//!         .retry_wait_max(Duration::from_secs(2))
//!         .try_build()?;
//!
//!     let request = Request::new("PUT", "https://api.example.com/v1/items/1", r#"{"name":"demo"}"#)?
//!         .try_header("content-type", "application/json")?
//!         .with_context(Context::background().with_timeout(Duration::from_secs(10)));
//!
//!     let response = client.execute(&request).await?;
//!     println!("status={}", response.status());
//!     let body = retryhttp::read_body(response).await?;
//!     println!("{} bytes", body.len());
//!     Ok(())
//! }
//! ```
//!
//! # Behavior
//!
//! - Transport failures and 5xx responses other than 501 are retried; every
//!   other response is returned to the caller as-is.
//! - Redirect-limit, unsupported-scheme and untrusted-certificate failures are
//!   never retried.
//! - Once retries are exhausted the last response is discarded and
//!   [`Error::RetriesExhausted`] is returned, unless an [`ErrorHandler`] is set.

use std::sync::OnceLock;

use serde::Serialize;

mod backoff;
mod body;
mod client;
mod config;
mod context;
mod error;
mod logging;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::backoff::{Backoff, ExponentialBackoff, LinearJitterBackoff, RespectRetryAfter};
pub use crate::body::{Body, BodyFactory, ReadSeek};
pub use crate::client::{Client, ClientBuilder};
pub use crate::config::{
    DEFAULT_RETRY_MAX, DEFAULT_RETRY_WAIT_MAX, DEFAULT_RETRY_WAIT_MIN, RetryConfig,
};
pub use crate::context::Context;
pub use crate::error::{ContextError, Error, ErrorCode, TransportError, TransportErrorKind};
pub use crate::logging::{Logger, RequestLogHook, ResponseLogHook, TracingLogger};
pub use crate::request::Request;
pub use crate::response::{HttpResponse, ResponseBody, empty_body, full_body, read_body};
pub use crate::retry::{
    AttemptOutcome, CheckRetry, DefaultRetryPolicy, ErrorHandler, PassthroughErrorHandler,
    default_retry_policy,
};
pub use crate::transport::{HyperTransport, HyperTransportBuilder, RedirectPolicy, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AttemptOutcome, Backoff, Body, CheckRetry, Client, ClientBuilder, Context, ContextError,
        DefaultRetryPolicy, Error, ErrorCode, ErrorHandler, ExponentialBackoff, HttpResponse,
        HyperTransport, LinearJitterBackoff, Logger, PassthroughErrorHandler, RedirectPolicy,
        Request, RespectRetryAfter, Result, RetryConfig, Transport, TransportError,
        TransportErrorKind,
    };
}

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// Process-wide client with the default policy, built on first use.
pub fn default_client() -> Result<&'static Client> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = Client::builder().try_build()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

pub async fn get(url: &str) -> Result<HttpResponse> {
    default_client()?.get(url).await
}

pub async fn head(url: &str) -> Result<HttpResponse> {
    default_client()?.head(url).await
}

pub async fn post(url: &str, content_type: &str, body: impl Into<Body>) -> Result<HttpResponse> {
    default_client()?.post(url, content_type, body).await
}

pub async fn post_form<T>(url: &str, form: &T) -> Result<HttpResponse>
where
    T: Serialize + ?Sized,
{
    default_client()?.post_form(url, form).await
}
