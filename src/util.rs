use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderName, LOCATION, RETRY_AFTER,
};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::error::TransportErrorKind;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strips userinfo, query and fragment so URIs can be logged and embedded in
/// error messages.
pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn is_http_scheme(uri: &Uri) -> bool {
    uri.scheme_str().is_some_and(|scheme| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    })
}

/// `Retry-After` as delta-seconds or an HTTP date. Dates in the past yield zero.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    match raw.parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => httpdate::parse_http_date(raw)
            .ok()
            .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO)),
    }
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 301, 302 and 303 turn every method except GET and HEAD into GET; 307 and
/// 308 keep it.
pub(crate) fn redirect_method(method: &Method, status: StatusCode) -> Method {
    let rewrites = matches!(status.as_u16(), 301..=303);
    if rewrites && *method != Method::GET && *method != Method::HEAD {
        Method::GET
    } else {
        method.clone()
    }
}

/// Resolves the `Location` header against the URI that produced it.
pub(crate) fn redirect_target(current_uri: &Uri, headers: &HeaderMap) -> Option<Uri> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let base = url::Url::parse(&current_uri.to_string()).ok()?;
    base.join(location).ok()?.as_str().parse().ok()
}

fn origin(uri: &Uri) -> (String, String, Option<u16>) {
    let scheme = uri.scheme_str().unwrap_or_default().to_ascii_lowercase();
    let host = uri.host().unwrap_or_default().to_ascii_lowercase();
    let port = uri.port_u16().or(match scheme.as_str() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    });
    (scheme, host, port)
}

pub(crate) fn same_origin(left: &Uri, right: &Uri) -> bool {
    origin(left) == origin(right)
}

/// Drops entity headers along with a dropped body, and credentials when the
/// redirect leaves the origin.
pub(crate) fn strip_headers_for_redirect(
    headers: &mut HeaderMap,
    body_dropped: bool,
    same_origin_redirect: bool,
) {
    let entity: &[HeaderName] = if body_dropped {
        &[CONTENT_LENGTH, CONTENT_TYPE]
    } else {
        &[]
    };
    let credentials: &[HeaderName] = if same_origin_redirect {
        &[]
    } else {
        &[AUTHORIZATION, COOKIE]
    };
    for name in entity.iter().chain(credentials) {
        headers.remove(name);
    }
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if is_unknown_issuer(error) {
        return TransportErrorKind::UntrustedCertificate;
    }

    if error.is_connect() {
        let text = error_chain_text(error);
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error_chain_text(error);
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(current) = source {
        text.push_str(": ");
        text.push_str(&current.to_string());
        source = current.source();
    }
    text.to_ascii_lowercase()
}

/// Walks the source chain looking for a rustls unknown-issuer failure. rustls
/// errors surface wrapped in `std::io::Error`, whose `source()` skips the
/// wrapped value, so each io error is unwrapped with `get_ref()` as well.
fn is_unknown_issuer(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(error) = current {
        if matches_unknown_issuer(error) {
            return true;
        }
        if let Some(io_error) = error.downcast_ref::<std::io::Error>()
            && let Some(inner) = io_error.get_ref()
            && matches_unknown_issuer(inner)
        {
            return true;
        }
        current = error.source();
    }
    false
}

fn matches_unknown_issuer(error: &(dyn std::error::Error + 'static)) -> bool {
    matches!(
        error.downcast_ref::<rustls::Error>(),
        Some(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer
        ))
    )
}
