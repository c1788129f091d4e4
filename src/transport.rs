use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{Error, TransportError, TransportErrorKind};
use crate::response::{HttpResponse, ResponseBody};
use crate::util::{
    classify_transport_error, is_http_scheme, is_redirect_status, lock_unpoisoned,
    redirect_method, redirect_target, same_origin, strip_headers_for_redirect,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Executes one fully formed request. Implementations must be safe to share
/// across concurrent `execute` calls.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Bytes>) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;

    /// Releases pooled connections that are not currently in use.
    fn close_idle_connections(&self) {}
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn send(&self, request: Request<Bytes>) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        (**self).send(request)
    }

    fn close_idle_connections(&self) {
        (**self).close_idle_connections();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectPolicy {
    enabled: bool,
    max_redirects: usize,
}

impl RedirectPolicy {
    pub const fn none() -> Self {
        Self {
            enabled: false,
            max_redirects: 0,
        }
    }

    pub const fn limited(max_redirects: usize) -> Self {
        Self {
            enabled: true,
            max_redirects,
        }
    }

    pub const fn follow() -> Self {
        Self::limited(DEFAULT_MAX_REDIRECTS)
    }

    pub const fn enabled(self) -> bool {
        self.enabled
    }

    pub const fn max_redirects(self) -> usize {
        if self.enabled { self.max_redirects } else { 0 }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::follow()
    }
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;
type PooledClient = HyperClient<HttpsConnector, Full<Bytes>>;

pub struct HyperTransportBuilder {
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    redirect_policy: RedirectPolicy,
}

impl HyperTransportBuilder {
    fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            redirect_policy: RedirectPolicy::default(),
        }
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Bounds each dispatch, redirects included. Unset by default.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn redirect_policy(mut self, redirect_policy: RedirectPolicy) -> Self {
        self.redirect_policy = redirect_policy;
        self
    }

    pub fn try_build(self) -> Result<HyperTransport, Error> {
        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|source| Error::TlsConfig {
            message: source.to_string(),
        })?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.connect_timeout));
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let pool = PoolSettings {
            idle_timeout: self.pool_idle_timeout,
            max_idle_per_host: self.pool_max_idle_per_host,
        };
        let client = pool.build_client(connector.clone());

        Ok(HyperTransport {
            inner: Arc::new(HyperTransportInner {
                connector,
                pool,
                client: Mutex::new(client),
                request_timeout: self.request_timeout,
                redirect_policy: self.redirect_policy,
            }),
        })
    }

    #[track_caller]
    pub fn build(self) -> HyperTransport {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build retryhttp transport: {error}; use try_build() to handle configuration errors")
        })
    }
}

#[derive(Clone, Copy)]
struct PoolSettings {
    idle_timeout: Duration,
    max_idle_per_host: usize,
}

impl PoolSettings {
    fn build_client(self, connector: HttpsConnector) -> PooledClient {
        HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .build(connector)
    }
}

struct HyperTransportInner {
    connector: HttpsConnector,
    pool: PoolSettings,
    client: Mutex<PooledClient>,
    request_timeout: Option<Duration>,
    redirect_policy: RedirectPolicy,
}

/// Pooled HTTP/1.1 + HTTP/2 transport over rustls that follows redirects.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Arc<HyperTransportInner>,
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    fn client(&self) -> PooledClient {
        lock_unpoisoned(&self.inner.client).clone()
    }

    async fn dispatch(&self, request: Request<Bytes>) -> Result<HttpResponse, TransportError> {
        match self.inner.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.follow_redirects(request))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::new(
                        TransportErrorKind::Timeout,
                        format!("request timed out after {}ms", limit.as_millis()),
                    ))
                }),
            None => self.follow_redirects(request).await,
        }
    }

    async fn follow_redirects(
        &self,
        request: Request<Bytes>,
    ) -> Result<HttpResponse, TransportError> {
        let client = self.client();
        let max_redirects = self.inner.redirect_policy.max_redirects();
        let (mut parts, mut body) = request.into_parts();
        let mut redirect_count = 0_usize;

        loop {
            if !is_http_scheme(&parts.uri) {
                return Err(TransportError::new(
                    TransportErrorKind::UnsupportedScheme,
                    format!(
                        "unsupported protocol scheme {:?}",
                        parts.uri.scheme_str().unwrap_or_default()
                    ),
                ));
            }

            let mut outgoing = Request::new(Full::new(body.clone()));
            *outgoing.method_mut() = parts.method.clone();
            *outgoing.uri_mut() = parts.uri.clone();
            *outgoing.version_mut() = parts.version;
            *outgoing.headers_mut() = parts.headers.clone();

            let response = client.request(outgoing).await.map_err(|source| {
                let kind = classify_transport_error(&source);
                TransportError::new(kind, source)
            })?;

            let status = response.status();
            if !self.inner.redirect_policy.enabled() || !is_redirect_status(status) {
                return Ok(response.map(box_incoming));
            }
            let Some(next_uri) = redirect_target(&parts.uri, response.headers()) else {
                return Ok(response.map(box_incoming));
            };
            if redirect_count >= max_redirects {
                return Err(TransportError::new(
                    TransportErrorKind::RedirectLimitExceeded,
                    format!("stopped after {max_redirects} redirects"),
                ));
            }
            drop(response);

            let next_method = redirect_method(&parts.method, status);
            let drop_body = status == StatusCode::SEE_OTHER
                || (next_method == Method::GET && parts.method != Method::GET);
            strip_headers_for_redirect(
                &mut parts.headers,
                drop_body,
                same_origin(&parts.uri, &next_uri),
            );
            if drop_body {
                body = Bytes::new();
            }
            debug!(
                status = status.as_u16(),
                location = %next_uri,
                redirect_count = redirect_count + 1,
                "following redirect"
            );
            parts.method = next_method;
            parts.uri = next_uri;
            redirect_count += 1;
        }
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Bytes>) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.dispatch(request))
    }

    /// Swaps in a fresh pool. The previous pool, and its idle sockets, is
    /// released once requests still holding it complete.
    fn close_idle_connections(&self) {
        let fresh = self.inner.pool.build_client(self.inner.connector.clone());
        *lock_unpoisoned(&self.inner.client) = fresh;
    }
}

fn box_incoming(body: hyper::body::Incoming) -> ResponseBody {
    body.map_err(|error| Box::new(error) as crate::error::BoxError)
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::RedirectPolicy;

    #[test]
    fn redirect_policy_limits() {
        assert_eq!(RedirectPolicy::none().max_redirects(), 0);
        assert!(!RedirectPolicy::none().enabled());
        assert_eq!(RedirectPolicy::limited(3).max_redirects(), 3);
        assert_eq!(RedirectPolicy::default().max_redirects(), 10);
    }
}
