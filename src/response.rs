use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::{BoxError, Error};

pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

pub type HttpResponse = http::Response<ResponseBody>;

/// Upper bound on bytes read while discarding a body ahead of a retry.
pub(crate) const RESPONSE_DRAIN_LIMIT: usize = 4096;

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

pub fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}

pub fn full_body(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}

/// Collects the whole response body into memory.
pub async fn read_body(response: HttpResponse) -> Result<Bytes, Error> {
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|source| Error::ReadBody { source })?;
    Ok(collected.to_bytes())
}

/// Reads and discards at most `limit` bytes so the connection can go back to
/// the pool. Returns the number of bytes discarded.
pub(crate) async fn drain_body(body: &mut ResponseBody, limit: usize) -> Result<usize, BoxError> {
    let mut discarded = 0_usize;
    while discarded < limit {
        let Some(frame) = body.frame().await else {
            break;
        };
        if let Some(data) = frame?.data_ref() {
            discarded = discarded.saturating_add(data.len());
        }
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::stream;
    use http_body::Frame;
    use http_body_util::{BodyExt, StreamBody};

    use super::{ResponseBody, drain_body, full_body, read_body};
    use crate::error::BoxError;

    fn chunked_body(chunks: usize, chunk_len: usize) -> ResponseBody {
        let frames = (0..chunks)
            .map(move |_| Ok::<_, BoxError>(Frame::data(Bytes::from(vec![b'x'; chunk_len]))));
        StreamBody::new(stream::iter(frames)).boxed_unsync()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drain_stops_at_limit() {
        let mut body = chunked_body(10, 1024);
        let discarded = drain_body(&mut body, 4096).await.expect("drain body");
        assert_eq!(discarded, 4096);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drain_consumes_short_bodies_entirely() {
        let mut body = full_body("short");
        let discarded = drain_body(&mut body, 4096).await.expect("drain body");
        assert_eq!(discarded, 5);
        assert!(body.frame().await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drain_reports_read_errors() {
        let frames = vec![
            Ok(Frame::data(Bytes::from_static(b"ok"))),
            Err::<Frame<Bytes>, BoxError>("connection reset".into()),
        ];
        let mut body = StreamBody::new(stream::iter(frames)).boxed_unsync();
        let error = drain_body(&mut body, 4096).await.expect_err("read error");
        assert_eq!(error.to_string(), "connection reset");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn read_body_collects_all_frames() {
        let response = http::Response::new(chunked_body(3, 2));
        let bytes = read_body(response).await.expect("read body");
        assert_eq!(bytes.len(), 6);
    }
}
