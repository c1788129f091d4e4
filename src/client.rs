use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{Instrument, info_span};

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::body::Body;
use crate::config::RetryConfig;
use crate::error::Error;
use crate::logging::{Logger, RequestLogHook, ResponseLogHook, TracingLogger};
use crate::request::Request;
use crate::response::{HttpResponse, RESPONSE_DRAIN_LIMIT, drain_body};
use crate::retry::{AttemptOutcome, CheckRetry, DefaultRetryPolicy, ErrorHandler};
use crate::transport::{HyperTransport, Transport};
use crate::util::redact_uri_for_logs;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// What the loop does after one attempt.
enum LoopControl {
    Return(Result<HttpResponse, Error>),
    Continue,
    Exhausted(AttemptOutcome),
}

/// Releases idle pooled connections when an `execute` call ends, however it
/// ends.
struct CloseIdleOnDrop<'a>(&'a dyn Transport);

impl Drop for CloseIdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close_idle_connections();
    }
}

pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: RetryConfig,
    check_retry: Arc<dyn CheckRetry>,
    backoff: Arc<dyn Backoff>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    logger: Option<Arc<dyn Logger>>,
    request_log_hook: Option<RequestLogHook>,
    response_log_hook: Option<ResponseLogHook>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            transport: None,
            config: RetryConfig::default(),
            check_retry: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
            error_handler: None,
            logger: Some(Arc::new(TracingLogger)),
            request_log_hook: None,
            response_log_hook: None,
        }
    }

    /// Transport used for every attempt. Defaults to a [`HyperTransport`].
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_wait_min(mut self, retry_wait_min: Duration) -> Self {
        self.config.retry_wait_min = retry_wait_min;
        self
    }

    pub fn retry_wait_max(mut self, retry_wait_max: Duration) -> Self {
        self.config.retry_wait_max = retry_wait_max;
        self
    }

    /// Number of retries after the initial attempt.
    pub fn retry_max(mut self, retry_max: usize) -> Self {
        self.config.retry_max = retry_max;
        self
    }

    pub fn check_retry(mut self, check_retry: impl CheckRetry + 'static) -> Self {
        self.check_retry = Arc::new(check_retry);
        self
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Handler invoked once retries are exhausted, in place of the default
    /// [`Error::RetriesExhausted`].
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn no_logger(mut self) -> Self {
        self.logger = None;
        self
    }

    pub fn request_log_hook(mut self, hook: RequestLogHook) -> Self {
        self.request_log_hook = Some(hook);
        self
    }

    pub fn response_log_hook(mut self, hook: ResponseLogHook) -> Self {
        self.response_log_hook = Some(hook);
        self
    }

    pub fn try_build(self) -> Result<Client, Error> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::builder().try_build()?),
        };

        Ok(Client {
            transport,
            config: self.config,
            check_retry: self.check_retry,
            backoff: self.backoff,
            error_handler: self.error_handler,
            logger: self.logger,
            request_log_hook: self.request_log_hook,
            response_log_hook: self.response_log_hook,
        })
    }

    #[track_caller]
    pub fn build(self) -> Client {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build retryhttp client: {error}"))
    }
}

/// Executes requests with retries, backoff and body replay.
///
/// A client holds no per-call state. Clones share the transport, so one
/// client can serve any number of concurrent `execute` calls.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: RetryConfig,
    check_retry: Arc<dyn CheckRetry>,
    backoff: Arc<dyn Backoff>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    logger: Option<Arc<dyn Logger>>,
    request_log_hook: Option<RequestLogHook>,
    response_log_hook: Option<ResponseLogHook>,
}

impl Client {
    /// Client with the default transport and retry policy.
    ///
    /// # Panics
    ///
    /// Panics if the default TLS configuration cannot be built. Use
    /// `Client::builder().try_build()` to handle that case.
    #[track_caller]
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> RetryConfig {
        self.config
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, Error> {
        let request = Request::new(Method::GET, url, ())?;
        self.execute(&request).await
    }

    pub async fn head(&self, url: &str) -> Result<HttpResponse, Error> {
        let request = Request::new(Method::HEAD, url, ())?;
        self.execute(&request).await
    }

    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<HttpResponse, Error> {
        let request =
            Request::new(Method::POST, url, body)?.try_header(CONTENT_TYPE.as_str(), content_type)?;
        self.execute(&request).await
    }

    /// Posts `form` encoded as `application/x-www-form-urlencoded`.
    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<HttpResponse, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded =
            serde_urlencoded::to_string(form).map_err(|source| Error::SerializeForm { source })?;
        self.post(url, FORM_CONTENT_TYPE, encoded).await
    }

    /// Sends `request`, retrying according to the client's policy.
    ///
    /// Makes at most `retry_max + 1` attempts. The request's context is
    /// checked by the retry policy after every attempt and raced against both
    /// the dispatch and the wait between attempts.
    pub async fn execute(&self, request: &Request) -> Result<HttpResponse, Error> {
        let uri = redact_uri_for_logs(&request.uri().to_string());
        let span = info_span!(
            "retryhttp.request",
            method = %request.method(),
            uri = %uri,
            retry_max = self.config.retry_max
        );
        self.run(request, &uri).instrument(span).await
    }

    async fn run(&self, request: &Request, uri: &str) -> Result<HttpResponse, Error> {
        let _close_idle = CloseIdleOnDrop(self.transport.as_ref());
        if let Some(logger) = self.logger.as_deref() {
            logger.debug(format_args!("performing request {} {uri}", request.method()));
        }

        let mut attempt = 0_usize;
        loop {
            match self.attempt(request, uri, attempt).await {
                LoopControl::Return(result) => return result,
                LoopControl::Continue => attempt += 1,
                LoopControl::Exhausted(outcome) => {
                    return self.give_up(request, uri, outcome, attempt + 1);
                }
            }
        }
    }

    async fn attempt(&self, request: &Request, uri: &str, attempt: usize) -> LoopControl {
        let context = request.context();
        let method = request.method();
        let logger = self.logger.as_deref();

        let outgoing = match request.build_attempt() {
            Ok(outgoing) => outgoing,
            Err(error) => {
                self.transport.close_idle_connections();
                return LoopControl::Return(Err(error));
            }
        };

        if let Some(hook) = &self.request_log_hook {
            hook(logger, &outgoing, attempt);
        }

        let mut outcome = tokio::select! {
            biased;
            error = context.done() => AttemptOutcome::Cancelled(error),
            result = self.transport.send(outgoing) => match result {
                Ok(response) => AttemptOutcome::Response(response),
                Err(error) => AttemptOutcome::Transport(error),
            },
        };

        let decision = self.check_retry.check_retry(context, &outcome);

        if let AttemptOutcome::Transport(error) = &outcome
            && let Some(logger) = logger
        {
            logger.error(format_args!("{method} {uri} request failed: {error}"));
        }

        if decision.is_ok()
            && let Some(hook) = &self.response_log_hook
            && let Some(response) = outcome.response_mut()
        {
            hook(logger, response);
        }

        match decision {
            Ok(true) => {}
            Ok(false) => return LoopControl::Return(outcome.into_result(method, uri)),
            Err(error) => return LoopControl::Return(Err(error)),
        }

        let remaining = self.config.retry_max.saturating_sub(attempt);
        if remaining == 0 {
            return LoopControl::Exhausted(outcome);
        }

        if let Some(response) = outcome.response_mut() {
            let drained = tokio::select! {
                biased;
                error = context.done() => {
                    self.transport.close_idle_connections();
                    return LoopControl::Return(Err(Error::Context { source: error }));
                }
                drained = drain_body(response.body_mut(), RESPONSE_DRAIN_LIMIT) => drained,
            };
            if let Err(error) = drained
                && let Some(logger) = logger
            {
                logger.error(format_args!("error reading response body: {error}"));
            }
        }

        let wait = self.backoff.backoff(
            self.config.retry_wait_min,
            self.config.retry_wait_max,
            attempt,
            outcome.response(),
        );
        if let Some(logger) = logger {
            match outcome.status() {
                Some(status) => logger.debug(format_args!(
                    "{method} {uri} (status: {status}): retrying in {wait:?} ({remaining} left)"
                )),
                None => logger.debug(format_args!(
                    "{method} {uri}: retrying in {wait:?} ({remaining} left)"
                )),
            }
        }
        drop(outcome);

        tokio::select! {
            biased;
            error = context.done() => {
                self.transport.close_idle_connections();
                LoopControl::Return(Err(Error::Context { source: error }))
            }
            () = tokio::time::sleep(wait) => LoopControl::Continue,
        }
    }

    fn give_up(
        &self,
        request: &Request,
        uri: &str,
        outcome: AttemptOutcome,
        attempts: usize,
    ) -> Result<HttpResponse, Error> {
        if let Some(handler) = &self.error_handler {
            return handler.handle(request, outcome, attempts);
        }

        drop(outcome);
        Err(Error::RetriesExhausted {
            method: request.method().clone(),
            uri: uri.to_owned(),
            attempts,
        })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("config", &self.config)
            .field("error_handler", &self.error_handler.is_some())
            .field("logger", &self.logger.is_some())
            .field("request_log_hook", &self.request_log_hook.is_some())
            .field("response_log_hook", &self.response_log_hook.is_some())
            .finish_non_exhaustive()
    }
}
