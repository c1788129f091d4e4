use std::any::Any;
use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::util::lock_unpoisoned;

/// Produces a fresh reader over the request payload on every call.
pub type BodyFactory = Arc<dyn Fn() -> std::io::Result<Box<dyn Read + Send>> + Send + Sync>;

pub trait ReadSeek: Read + Seek + Send {}

impl<T> ReadSeek for T where T: Read + Seek + Send {}

/// Payload shapes accepted when building a [`Request`](crate::Request).
///
/// Every shape is normalized into a [`BodyFactory`] so the payload can be sent
/// again, byte for byte, on each attempt.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Seekable(Box<dyn ReadSeek>),
    Reader(Box<dyn Read + Send>),
    Factory(BodyFactory),
}

impl Body {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        Self::Seekable(Box::new(reader))
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::Reader(Box::new(reader))
    }

    pub fn factory<F, R>(factory: F) -> Self
    where
        F: Fn() -> std::io::Result<R> + Send + Sync + 'static,
        R: Read + Send + 'static,
    {
        Self::Factory(Arc::new(move || {
            factory().map(|reader| Box::new(reader) as Box<dyn Read + Send>)
        }))
    }

    /// Dispatches on the runtime type of `value`. Unknown types are rejected
    /// with [`Error::UnsupportedBody`].
    pub fn from_value<T>(value: T) -> Result<Self, Error>
    where
        T: Any + Send,
    {
        downcast_body(Box::new(value), std::any::type_name::<T>())
    }

    pub fn from_any(value: Box<dyn Any + Send>) -> Result<Self, Error> {
        downcast_body(value, "dyn Any")
    }
}

fn downcast_body(value: Box<dyn Any + Send>, type_name: &'static str) -> Result<Body, Error> {
    let value = match value.downcast::<Body>() {
        Ok(body) => return Ok(*body),
        Err(value) => value,
    };
    let value = match value.downcast::<Bytes>() {
        Ok(bytes) => return Ok(Body::Bytes(*bytes)),
        Err(value) => value,
    };
    let value = match value.downcast::<BytesMut>() {
        Ok(buffer) => return Ok(Body::from(*buffer)),
        Err(value) => value,
    };
    let value = match value.downcast::<Vec<u8>>() {
        Ok(bytes) => return Ok(Body::from(*bytes)),
        Err(value) => value,
    };
    let value = match value.downcast::<String>() {
        Ok(text) => return Ok(Body::from(*text)),
        Err(value) => value,
    };
    let value = match value.downcast::<&'static str>() {
        Ok(text) => return Ok(Body::from(*text)),
        Err(value) => value,
    };
    let value = match value.downcast::<&'static [u8]>() {
        Ok(bytes) => return Ok(Body::from(*bytes)),
        Err(value) => value,
    };
    let value = match value.downcast::<Cursor<Vec<u8>>>() {
        Ok(cursor) => return Ok(Body::seekable(*cursor)),
        Err(value) => value,
    };
    match value.downcast::<()>() {
        Ok(_) => Ok(Body::Empty),
        Err(_) => Err(Error::UnsupportedBody { type_name }),
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Body::Empty"),
            Self::Bytes(bytes) => formatter
                .debug_struct("Body::Bytes")
                .field("len", &bytes.len())
                .finish(),
            Self::Seekable(_) => formatter.write_str("Body::Seekable"),
            Self::Reader(_) => formatter.write_str("Body::Reader"),
            Self::Factory(_) => formatter.write_str("Body::Factory"),
        }
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<BytesMut> for Body {
    fn from(buffer: BytesMut) -> Self {
        Self::Bytes(buffer.freeze())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl<T> From<Option<T>> for Body
where
    T: Into<Body>,
{
    fn from(body: Option<T>) -> Self {
        body.map(Into::into).unwrap_or_default()
    }
}

pub(crate) struct ReplayableBody {
    pub(crate) factory: Option<BodyFactory>,
    pub(crate) content_length: Option<u64>,
}

impl Body {
    pub(crate) fn into_replayable(self) -> Result<ReplayableBody, Error> {
        match self {
            Self::Empty => Ok(ReplayableBody {
                factory: None,
                content_length: None,
            }),
            Self::Bytes(bytes) => Ok(replay_bytes(bytes)),
            Self::Reader(mut reader) => {
                let mut buffer = Vec::new();
                reader
                    .read_to_end(&mut buffer)
                    .map_err(|source| Error::RewindBody { source })?;
                Ok(replay_bytes(Bytes::from(buffer)))
            }
            Self::Seekable(mut reader) => {
                let length = stream_length(&mut reader)
                    .map_err(|source| Error::RewindBody { source })?;
                let reader = Arc::new(Mutex::new(reader));
                let factory: BodyFactory = Arc::new(move || {
                    let mut reader = lock_unpoisoned(&reader);
                    reader.seek(SeekFrom::Start(0))?;
                    let mut buffer = Vec::new();
                    reader.read_to_end(&mut buffer)?;
                    Ok(Box::new(Cursor::new(buffer)) as Box<dyn Read + Send>)
                });
                Ok(ReplayableBody {
                    factory: Some(factory),
                    content_length: Some(length),
                })
            }
            Self::Factory(factory) => {
                // Call once so a broken factory fails at construction.
                drop(factory().map_err(|source| Error::RewindBody { source })?);
                Ok(ReplayableBody {
                    factory: Some(factory),
                    content_length: None,
                })
            }
        }
    }
}

fn replay_bytes(bytes: Bytes) -> ReplayableBody {
    let content_length = Some(bytes.len() as u64);
    let factory: BodyFactory = Arc::new(move || {
        Ok(Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>)
    });
    ReplayableBody {
        factory: Some(factory),
        content_length,
    }
}

fn stream_length(reader: &mut Box<dyn ReadSeek>) -> std::io::Result<u64> {
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(end)
}

pub(crate) fn materialize(factory: &BodyFactory) -> std::io::Result<Bytes> {
    let mut reader = factory()?;
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    Ok(Bytes::from(buffer))
}
