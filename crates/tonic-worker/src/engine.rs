//! Single-use wrapper around the tonic server.
//!
//! The [`Engine`] is built exactly once per worker from the sealed settings
//! and interceptor chains. It then moves through a small set of stages:
//!
//! ```text
//! Configured --register--> Registered --start--> Serving --serve returns--> Stopped
//! ```
//!
//! Graceful shutdown is signalled through a [`CancellationToken`] that doubles
//! as tonic's shutdown future, so it can be triggered from any task, before or
//! during `serve`.

use crate::{
    Error, InterceptLayer, Interceptors, Listener, Result, ServiceDescriptor,
    option::ServerSettings,
};
use core::convert::Infallible;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    body::Body,
    server::NamedService,
    transport::{Server, server::Router},
};
use tower::{
    Service,
    layer::util::{Identity, Stack},
};

type Layered = Stack<InterceptLayer, Identity>;

enum Stage {
    Configured(Server<Layered>),
    Registered(Router<Layered>),
    Serving,
    Stopped,
}

pub(crate) struct Engine {
    descriptor: Arc<ServiceDescriptor>,
    stage: Mutex<Stage>,
    shutdown: CancellationToken,
}

impl Engine {
    pub(crate) fn new(
        settings: &ServerSettings,
        descriptor: Arc<ServiceDescriptor>,
        interceptors: Interceptors,
    ) -> Self {
        let mut builder = Server::builder()
            .accept_http1(settings.accept_http1)
            .http2_adaptive_window(settings.http2_adaptive_window);

        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(limit) = settings.concurrency_limit {
            builder = builder.concurrency_limit_per_connection(limit);
        }

        let server = builder.layer(InterceptLayer::new(Arc::clone(&descriptor), interceptors));

        Self {
            descriptor,
            stage: Mutex::new(Stage::Configured(server)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers the single service this engine serves.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompatibleService`] if `S::NAME` differs from the
    ///   descriptor's name.
    /// - [`Error::InvalidDescriptor`] if the descriptor cannot route calls.
    /// - [`Error::AlreadyRegistered`] on any call after the first success.
    pub(crate) fn register<S>(&self, service: S) -> Result<()>
    where
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let mut stage = self.stage.lock();
        let Stage::Configured(server) = &mut *stage else {
            return Err(Error::AlreadyRegistered {
                service: self.descriptor.name().to_owned(),
            });
        };

        if S::NAME != self.descriptor.name() {
            return Err(Error::IncompatibleService {
                expected: self.descriptor.name().to_owned(),
                found: S::NAME.to_owned(),
            });
        }
        self.descriptor.validate()?;

        let router = server.add_service(service);
        *stage = Stage::Registered(router);
        Ok(())
    }

    pub(crate) fn is_registered(&self) -> bool {
        !matches!(*self.stage.lock(), Stage::Configured(_))
    }

    /// Claims the registered router for serving. Only succeeds once.
    pub(crate) fn start(&self) -> Result<Router<Layered>> {
        let mut stage = self.stage.lock();
        match core::mem::replace(&mut *stage, Stage::Serving) {
            Stage::Registered(router) => Ok(router),
            Stage::Configured(server) => {
                *stage = Stage::Configured(server);
                Err(Error::NotRegistered)
            }
            previous @ (Stage::Serving | Stage::Stopped) => {
                *stage = previous;
                Err(Error::AlreadyStarted)
            }
        }
    }

    /// Serves `router` on `listener` until [`Engine::graceful_stop`] is called
    /// or the transport fails.
    pub(crate) async fn serve(&self, router: Router<Layered>, listener: Listener) -> Result<()> {
        let signal = self.shutdown.clone().cancelled_owned();
        let result = match listener {
            Listener::Tcp(listener) => {
                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                    .await
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                use tokio_stream::wrappers::UnixListenerStream;
                router
                    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                    .await
            }
        };
        self.finish();
        result.map_err(Error::from)
    }

    /// Marks the engine as done without serving.
    pub(crate) fn finish(&self) {
        *self.stage.lock() = Stage::Stopped;
    }

    /// Stops accepting connections and lets in-flight calls drain.
    pub(crate) fn graceful_stop(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
