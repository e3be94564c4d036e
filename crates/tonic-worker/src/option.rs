//! Construction-time options for a [`GrpcWorker`](crate::GrpcWorker).
//!
//! Each [`WorkerOption`] is one deferred mutation of the worker under
//! construction. Options are applied strictly in the order they are supplied,
//! before the engine is built; afterwards the interceptor chains and engine
//! settings are sealed.

use crate::{Interceptor, InterceptorChain, Interceptors, SharedInterceptor};
use core::{fmt, time::Duration};
use std::sync::Arc;

/// One configuration step applied while constructing a worker.
#[derive(Clone)]
pub enum WorkerOption {
    /// Append an interceptor to the unary chain.
    UnaryInterceptor(SharedInterceptor),
    /// Append an interceptor to the streaming chain.
    StreamInterceptor(SharedInterceptor),
    /// Per-request timeout enforced by the engine.
    Timeout(Duration),
    /// Maximum number of concurrent requests per connection.
    ConcurrencyLimit(usize),
    /// Toggle HTTP/2 adaptive flow-control windows.
    Http2AdaptiveWindow(bool),
    /// Accept HTTP/1.1 connections in addition to HTTP/2.
    AcceptHttp1(bool),
}

pub fn with_unary_interceptor(interceptor: impl Interceptor) -> WorkerOption {
    WorkerOption::UnaryInterceptor(Arc::new(interceptor))
}

pub fn with_stream_interceptor(interceptor: impl Interceptor) -> WorkerOption {
    WorkerOption::StreamInterceptor(Arc::new(interceptor))
}

pub const fn with_timeout(timeout: Duration) -> WorkerOption {
    WorkerOption::Timeout(timeout)
}

pub const fn with_concurrency_limit(limit: usize) -> WorkerOption {
    WorkerOption::ConcurrencyLimit(limit)
}

pub const fn with_http2_adaptive_window(enabled: bool) -> WorkerOption {
    WorkerOption::Http2AdaptiveWindow(enabled)
}

pub const fn with_accept_http1(enabled: bool) -> WorkerOption {
    WorkerOption::AcceptHttp1(enabled)
}

impl fmt::Debug for WorkerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnaryInterceptor(_) => f.write_str("UnaryInterceptor(..)"),
            Self::StreamInterceptor(_) => f.write_str("StreamInterceptor(..)"),
            Self::Timeout(timeout) => f.debug_tuple("Timeout").field(timeout).finish(),
            Self::ConcurrencyLimit(limit) => f.debug_tuple("ConcurrencyLimit").field(limit).finish(),
            Self::Http2AdaptiveWindow(enabled) => {
                f.debug_tuple("Http2AdaptiveWindow").field(enabled).finish()
            }
            Self::AcceptHttp1(enabled) => f.debug_tuple("AcceptHttp1").field(enabled).finish(),
        }
    }
}

/// Engine tuning collected from options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerSettings {
    pub timeout: Option<Duration>,
    pub concurrency_limit: Option<usize>,
    pub http2_adaptive_window: Option<bool>,
    pub accept_http1: bool,
}

/// Accumulates options until the engine is built.
#[derive(Default)]
pub(crate) struct Settings {
    unary: Vec<SharedInterceptor>,
    stream: Vec<SharedInterceptor>,
    server: ServerSettings,
}

impl Settings {
    pub(crate) fn from_options(options: impl IntoIterator<Item = WorkerOption>) -> Self {
        let mut settings = Self::default();
        for option in options {
            settings.apply(option);
        }
        settings
    }

    fn apply(&mut self, option: WorkerOption) {
        match option {
            WorkerOption::UnaryInterceptor(interceptor) => self.unary.push(interceptor),
            WorkerOption::StreamInterceptor(interceptor) => self.stream.push(interceptor),
            WorkerOption::Timeout(timeout) => self.server.timeout = Some(timeout),
            WorkerOption::ConcurrencyLimit(limit) => self.server.concurrency_limit = Some(limit),
            WorkerOption::Http2AdaptiveWindow(enabled) => {
                self.server.http2_adaptive_window = Some(enabled);
            }
            WorkerOption::AcceptHttp1(enabled) => self.server.accept_http1 = enabled,
        }
    }

    /// Seals the collected interceptors into immutable chains.
    pub(crate) fn seal(self) -> (Interceptors, ServerSettings) {
        let interceptors = Interceptors::new(
            InterceptorChain::new(self.unary),
            InterceptorChain::new(self.stream),
        );
        (interceptors, self.server)
    }
}
