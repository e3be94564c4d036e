#![doc = include_str!("../README.md")]

mod descriptor;
mod engine;
mod error;
pub mod interceptor;
mod listener;
pub mod option;
mod worker;

pub use descriptor::{MethodDescriptor, MethodKind, ServiceDescriptor};
pub use error::{Error, Result};
pub use interceptor::{
    CallInfo, Interceptor, InterceptorChain, Interceptors, SharedInterceptor,
    layer::{Intercept, InterceptLayer},
};
pub use listener::{ListenAddr, Listener};
pub use option::{
    ServerSettings, WorkerOption, with_accept_http1, with_concurrency_limit,
    with_http2_adaptive_window, with_stream_interceptor, with_timeout, with_unary_interceptor,
};
pub use worker::{GrpcWorker, GrpcWorkerBuilder, Worker};
