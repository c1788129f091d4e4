use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use tracing::Level;

use crate::response::HttpResponse;

/// Leveled sink used by the retry loop and handed to the log hooks.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: fmt::Arguments<'_>);

    fn debug(&self, message: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: fmt::Arguments<'_>) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: fmt::Arguments<'_>) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: fmt::Arguments<'_>) {
        self.log(Level::ERROR, message);
    }
}

impl<F> Logger for F
where
    F: Fn(Level, fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        self(level, message);
    }
}

/// Forwards every message to `tracing` under the `retryhttp` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!(target: "retryhttp", "{message}"),
            Level::WARN => tracing::warn!(target: "retryhttp", "{message}"),
            Level::INFO => tracing::info!(target: "retryhttp", "{message}"),
            Level::DEBUG => tracing::debug!(target: "retryhttp", "{message}"),
            _ => tracing::trace!(target: "retryhttp", "{message}"),
        }
    }
}

/// Runs before every attempt with the outgoing request and the attempt index
/// (0 for the initial try).
pub type RequestLogHook = Arc<dyn Fn(Option<&dyn Logger>, &Request<Bytes>, usize) + Send + Sync>;

/// Runs after every attempt that produced a response, whether or not a retry
/// follows. Reading or replacing the body here changes what the caller gets.
pub type ResponseLogHook = Arc<dyn Fn(Option<&dyn Logger>, &mut HttpResponse) + Send + Sync>;
