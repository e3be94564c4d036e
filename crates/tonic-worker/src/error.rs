//! Error types for the gRPC worker.
//!
//! This module defines the central `Error` enum returned by construction,
//! descriptor decoding and the worker lifecycle hooks. The taxonomy is shallow
//! on purpose: anything that happens inside an individual call belongs to the
//! engine or to an interceptor and is reported to the client as a
//! [`tonic::Status`], never through this type.
//!
//! ## Error Cases
//! - `AlreadyRegistered`: the service was registered on the engine twice.
//! - `IncompatibleService`: the handler does not serve the described service.
//! - `InvalidDescriptor`: the service descriptor cannot route any call.
//! - `Decode`: an encoded file descriptor set could not be decoded.
//! - `NotRegistered`: `run` was called before a successful `init`.
//! - `AlreadyStarted`: `run` was called on an engine that already served.
//! - `Listener`: the listener could not report its bound address.
//! - `Serve`: the engine stopped serving for a reason other than `terminate`.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the gRPC worker.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A service was already registered on this engine.
    #[error("service `{service}` is already registered")]
    AlreadyRegistered { service: String },

    /// The handler's service name does not match the descriptor.
    #[error("handler serves `{found}` but descriptor describes `{expected}`")]
    IncompatibleService { expected: String, found: String },

    /// The descriptor is malformed or does not describe the requested service.
    #[error("invalid service descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    /// An encoded `FileDescriptorSet` could not be decoded.
    #[error("could not decode file descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    /// `run` was invoked before the service was registered.
    #[error("no service registered; call `init` before `run`")]
    NotRegistered,

    /// `run` was invoked on an engine that has already served.
    #[error("grpc server has already been started")]
    AlreadyStarted,

    /// The listener failed to report its local address.
    #[error("listener error: {0}")]
    Listener(#[from] std::io::Error),

    /// The engine stopped serving without a graceful shutdown.
    #[error("could not serve grpc server: {0}")]
    Serve(#[from] tonic::transport::Error),
}
