use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};

use crate::body::{Body, BodyFactory, materialize};
use crate::context::Context;
use crate::error::Error;

/// An HTTP request whose body can be replayed on every attempt.
///
/// Cloning is shallow: clones share the body factory.
#[derive(Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Option<BodyFactory>,
    content_length: Option<u64>,
    context: Context,
}

impl Request {
    pub fn new<M>(method: M, url: &str, body: impl Into<Body>) -> Result<Self, Error>
    where
        M: TryInto<Method>,
        M::Error: Into<http::Error>,
    {
        let method = method
            .try_into()
            .map_err(|source| Error::RequestBuild {
                source: source.into(),
            })?;
        let uri = url.parse::<Uri>().map_err(|_| Error::InvalidUri {
            uri: url.to_owned(),
        })?;
        let replayable = body.into().into_replayable()?;

        Ok(Self {
            method,
            uri,
            version: Version::default(),
            headers: HeaderMap::new(),
            body: replayable.factory,
            content_length: replayable.content_length,
            context: Context::background(),
        })
    }

    /// Wraps an existing `http::Request`, keeping its method, URI, version and
    /// headers.
    pub fn from_request<B>(request: http::Request<B>) -> Result<Self, Error>
    where
        B: Into<Body>,
    {
        let (parts, body) = request.into_parts();
        let replayable = body.into().into_replayable()?;

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: replayable.factory,
            content_length: replayable.content_length,
            context: Context::background(),
        })
    }

    /// Returns a copy bound to `context`. `self` is left untouched.
    pub fn with_context(&self, context: Context) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let name = name
            .parse::<HeaderName>()
            .map_err(|source| Error::RequestBuild {
                source: source.into(),
            })?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|source| Error::RequestBuild {
                source: source.into(),
            })?;
        Ok(self.header(name, value))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Length of the payload when it could be derived at construction.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Materializes a copy of the body without consuming it. Must not run
    /// concurrently with an `execute` of the same request when the body is a
    /// seekable stream.
    pub fn body_bytes(&self) -> Result<Option<Bytes>, Error> {
        let Some(factory) = &self.body else {
            return Ok(None);
        };
        materialize(factory)
            .map(Some)
            .map_err(|source| Error::RewindBody { source })
    }

    /// Rewinds the body and assembles the transport request for one attempt.
    pub(crate) fn build_attempt(&self) -> Result<http::Request<Bytes>, Error> {
        let body = self.body_bytes()?.unwrap_or_default();
        let mut request = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .version(self.version)
            .body(body)?;
        *request.headers_mut() = self.headers.clone();
        if let Some(length) = self.content_length
            && !request.headers().contains_key(CONTENT_LENGTH)
        {
            request
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Ok(request)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("content_length", &self.content_length)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use http::{HeaderValue, Method, Version};
    use tokio_util::sync::CancellationToken;

    use super::Request;
    use crate::body::Body;
    use crate::context::Context;
    use crate::error::{Error, ErrorCode};

    #[test]
    fn body_bytes_is_stable_across_attempts() {
        let request = Request::new(Method::POST, "http://example.com/items", "hello")
            .expect("request should build");
        let before = request.body_bytes().expect("read body");

        for _ in 0..5 {
            let attempt = request.build_attempt().expect("rewind body");
            assert_eq!(attempt.body(), "hello");
        }

        assert_eq!(request.body_bytes().expect("read body"), before);
        assert_eq!(before.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn seekable_body_is_rewound_for_each_attempt() {
        let request = Request::new(
            "PUT",
            "http://example.com/upload",
            Body::seekable(Cursor::new(b"0123456789".to_vec())),
        )
        .expect("request should build");

        let first = request.build_attempt().expect("first rewind");
        let second = request.build_attempt().expect("second rewind");
        assert_eq!(first.body(), second.body());
        assert_eq!(
            second.headers().get(CONTENT_LENGTH),
            Some(&HeaderValue::from(10_u64))
        );
    }

    #[test]
    fn missing_body_yields_none() {
        let request =
            Request::new(Method::GET, "http://example.com/", ()).expect("request should build");
        assert!(!request.has_body());
        assert_eq!(request.body_bytes().expect("no body"), None);

        let attempt = request.build_attempt().expect("build attempt");
        assert!(attempt.body().is_empty());
        assert!(!attempt.headers().contains_key(CONTENT_LENGTH));
    }

    #[test]
    fn malformed_method_and_uri_fail_fast() {
        let error = Request::new("BAD METHOD", "http://example.com/", ())
            .expect_err("method with a space is invalid");
        assert_eq!(error.code(), ErrorCode::RequestBuild);

        let error = Request::new(Method::GET, "http://exa mple.com/", ())
            .expect_err("uri with a space is invalid");
        match error {
            Error::InvalidUri { uri } => assert_eq!(uri, "http://exa mple.com/"),
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn with_context_leaves_original_untouched() {
        let original = Request::new(Method::GET, "http://example.com/", ())
            .expect("request should build");
        let token = CancellationToken::new();
        let bound = original.with_context(Context::with_cancellation(token.clone()));

        token.cancel();
        assert!(bound.context().err().is_some());
        assert!(original.context().err().is_none());
        assert!(original.context().cancellation_token().is_none());
    }

    #[test]
    fn from_request_keeps_parts_and_body() {
        let source = http::Request::builder()
            .method(Method::PATCH)
            .uri("http://example.com/items/1")
            .version(Version::HTTP_11)
            .header(CONTENT_TYPE, "application/json")
            .body(br#"{"name":"demo"}"#.to_vec())
            .expect("http request should build");

        let request = Request::from_request(source).expect("wrap request");
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.uri(), "http://example.com/items/1");
        assert_eq!(
            request.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert_eq!(request.content_length(), Some(15));

        let attempt = request.build_attempt().expect("build attempt");
        assert_eq!(attempt.body(), &br#"{"name":"demo"}"#[..]);
    }

    #[test]
    fn try_header_rejects_invalid_names() {
        let request =
            Request::new(Method::GET, "http://example.com/", ()).expect("request should build");
        let error = request
            .try_header("bad header", "value")
            .expect_err("space in header name is invalid");
        assert_eq!(error.code(), ErrorCode::RequestBuild);
    }
}
