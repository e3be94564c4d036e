//! Host-managed lifecycle for a single gRPC service.
//!
//! [`GrpcWorker`] adapts a tonic server into the [`Worker`] contract used by
//! an orchestration host: `init` once, `run` on a dedicated task until the
//! server stops, and `terminate` from anywhere to request a graceful stop.
//!
//! ```text
//! Created --init--> Initialized --run--> Running --terminate--> Terminated
//! ```
//!
//! Service registration happens in `init`, never in the constructor, and is
//! guarded so that a second attempt fails instead of double-registering.

use crate::{
    Error, Interceptor, Interceptors, ListenAddr, Listener, Result, ServiceDescriptor,
    WorkerOption,
    engine::Engine,
    option::{self, Settings},
};
use core::{convert::Infallible, time::Duration};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tonic::{body::Body, server::NamedService};
use tower::Service;
use tracing::{Instrument, Span};

/// Lifecycle capability an orchestration host drives.
///
/// Hosts call `init` once, then `run` on its own task (it only returns when
/// the worker stops), and finally `terminate` from a different task to make
/// `run` return.
#[tonic::async_trait]
pub trait Worker: Send + Sync {
    fn init(&self, logger: &Span) -> Result<()>;

    async fn run(&self) -> Result<()>;

    fn terminate(&self) -> Result<()>;
}

/// A [`Worker`] serving exactly one tonic service on a pre-bound listener.
///
/// `S` is the generated tonic server type (e.g. `GreeterServer<MyGreeter>`),
/// or anything else that routes gRPC requests and names its service.
pub struct GrpcWorker<S> {
    logger: RwLock<Span>,
    listener: Mutex<Option<Listener>>,
    service: S,
    descriptor: Arc<ServiceDescriptor>,
    interceptors: Interceptors,
    engine: Engine,
}

impl<S> GrpcWorker<S> {
    /// Wires up a worker.
    ///
    /// Options are applied in order, then the engine is built with the
    /// resulting unary and streaming chains. No sockets are opened and the
    /// service is not registered until [`Worker::init`].
    pub fn new(
        logger: Span,
        listener: impl Into<Listener>,
        service: S,
        descriptor: ServiceDescriptor,
        options: impl IntoIterator<Item = WorkerOption>,
    ) -> Self {
        let (interceptors, settings) = Settings::from_options(options).seal();
        let descriptor = Arc::new(descriptor);
        let engine = Engine::new(&settings, Arc::clone(&descriptor), interceptors.clone());

        Self {
            logger: RwLock::new(logger),
            listener: Mutex::new(Some(listener.into())),
            service,
            descriptor,
            interceptors,
            engine,
        }
    }

    pub fn builder(
        logger: Span,
        listener: impl Into<Listener>,
        service: S,
        descriptor: ServiceDescriptor,
    ) -> GrpcWorkerBuilder<S> {
        GrpcWorkerBuilder {
            logger,
            listener: listener.into(),
            service,
            descriptor,
            options: Vec::new(),
        }
    }

    /// The current logging span. Replaced by a `grpc_worker` child span in
    /// `init`.
    pub fn logger(&self) -> Span {
        self.logger.read().clone()
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    /// Address of the listener this worker will serve on.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] once `run` has taken the listener.
    /// - [`Error::Listener`] if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<ListenAddr> {
        match self.listener.lock().as_ref() {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(Error::AlreadyStarted),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.engine.is_registered()
    }
}

#[tonic::async_trait]
impl<S> Worker for GrpcWorker<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
        + NamedService
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    fn init(&self, logger: &Span) -> Result<()> {
        let span = tracing::info_span!(
            parent: logger,
            "grpc_worker",
            service = self.descriptor.name()
        );
        self.engine.register(self.service.clone())?;
        *self.logger.write() = span.clone();

        tracing::debug!(
            parent: &span,
            unary_interceptors = self.interceptors.unary().len(),
            stream_interceptors = self.interceptors.stream().len(),
            "registered grpc service"
        );
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let span = self.logger();
        // Looked up before the engine is claimed so a failure leaves the
        // worker runnable.
        let address = self.local_addr()?;
        let router = self.engine.start()?;
        let Some(listener) = self.listener.lock().take() else {
            return Err(Error::AlreadyStarted);
        };

        if self.engine.is_stopping() {
            tracing::info!(parent: &span, "grpc server terminated before serving");
            self.engine.finish();
            return Ok(());
        }

        tracing::info!(parent: &span, %address, "starting grpc server");

        match self
            .engine
            .serve(router, listener)
            .instrument(span.clone())
            .await
        {
            Ok(()) => {
                tracing::info!(parent: &span, "grpc server stopped");
                Ok(())
            }
            Err(err) => {
                tracing::error!(parent: &span, error = %err, "grpc server failed");
                Err(err)
            }
        }
    }

    fn terminate(&self) -> Result<()> {
        tracing::info!(parent: &self.logger(), "terminating grpc server");
        self.engine.graceful_stop();
        Ok(())
    }
}

/// Chained alternative to [`GrpcWorker::new`].
pub struct GrpcWorkerBuilder<S> {
    logger: Span,
    listener: Listener,
    service: S,
    descriptor: ServiceDescriptor,
    options: Vec<WorkerOption>,
}

impl<S> GrpcWorkerBuilder<S> {
    pub fn option(mut self, option: WorkerOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn unary_interceptor(self, interceptor: impl Interceptor) -> Self {
        self.option(option::with_unary_interceptor(interceptor))
    }

    pub fn stream_interceptor(self, interceptor: impl Interceptor) -> Self {
        self.option(option::with_stream_interceptor(interceptor))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.option(option::with_timeout(timeout))
    }

    pub fn concurrency_limit(self, limit: usize) -> Self {
        self.option(option::with_concurrency_limit(limit))
    }

    pub fn http2_adaptive_window(self, enabled: bool) -> Self {
        self.option(option::with_http2_adaptive_window(enabled))
    }

    pub fn accept_http1(self, enabled: bool) -> Self {
        self.option(option::with_accept_http1(enabled))
    }

    pub fn build(self) -> GrpcWorker<S> {
        GrpcWorker::new(
            self.logger,
            self.listener,
            self.service,
            self.descriptor,
            self.options,
        )
    }
}
