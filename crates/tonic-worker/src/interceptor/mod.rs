//! Unary and streaming interceptor chains.
//!
//! An [`Interceptor`] runs before a call reaches the registered handler. It
//! sees the call's [`CallInfo`] and the request metadata and extensions, and
//! either passes the (possibly modified) request on or rejects the call with a
//! [`Status`].
//!
//! The worker keeps two independent, ordered chains: one for unary methods
//! and one for every streaming shape. Within a chain, interceptors run in the
//! order they were registered, so the first one registered is the outermost.
//!
//! ## Structure
//!
//! - [`layer`] - tower layer that classifies requests and runs the chains.

pub mod layer;

use crate::MethodKind;
use std::sync::Arc;
use tonic::{Request, Status};

/// Identity of the method an inbound call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallInfo {
    full_method: String,
    service: String,
    method: String,
    kind: MethodKind,
}

impl CallInfo {
    pub fn new(service: &str, method: &str, kind: MethodKind) -> Self {
        Self {
            full_method: format!("/{service}/{method}"),
            service: service.to_owned(),
            method: method.to_owned(),
            kind,
        }
    }

    /// The request path, `/package.Service/Method`.
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub const fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// Middleware run before every call of the matching kind.
///
/// Implemented for any `Fn(&CallInfo, Request<()>) -> Result<Request<()>,
/// Status>` closure. Annotate the `&CallInfo` parameter when writing the
/// closure inline so it is inferred as higher-ranked.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status>;
}

impl<F> Interceptor for F
where
    F: Fn(&CallInfo, Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
{
    fn intercept(&self, call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status> {
        self(call, request)
    }
}

pub type SharedInterceptor = Arc<dyn Interceptor>;

/// Immutable, ordered sequence of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Arc<[SharedInterceptor]>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<SharedInterceptor>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedInterceptor> {
        self.interceptors.iter()
    }

    /// Runs every interceptor in registration order, stopping at the first
    /// rejection.
    pub fn intercept(&self, call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status> {
        self.interceptors
            .iter()
            .try_fold(request, |request, interceptor| interceptor.intercept(call, request))
    }
}

impl core::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.len())
            .finish()
    }
}

/// The unary and streaming chains of one worker.
#[derive(Clone, Debug, Default)]
pub struct Interceptors {
    unary: InterceptorChain,
    stream: InterceptorChain,
}

impl Interceptors {
    pub const fn new(unary: InterceptorChain, stream: InterceptorChain) -> Self {
        Self { unary, stream }
    }

    pub const fn unary(&self) -> &InterceptorChain {
        &self.unary
    }

    pub const fn stream(&self) -> &InterceptorChain {
        &self.stream
    }

    /// Picks the chain for a method: unary methods use the unary chain, every
    /// streaming shape uses the streaming chain.
    pub const fn chain_for(&self, kind: MethodKind) -> &InterceptorChain {
        if kind.is_unary() {
            &self.unary
        } else {
            &self.stream
        }
    }

    pub fn intercept(&self, call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status> {
        self.chain_for(call.kind()).intercept(call, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tonic::Code;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> SharedInterceptor {
        let log = Arc::clone(log);
        Arc::new(move |_call: &CallInfo, request: Request<()>| -> Result<_, Status> {
            log.lock().push(label);
            Ok(request)
        })
    }

    #[test]
    fn empty_chain_passes_request_through() {
        let chain = InterceptorChain::default();
        let call = CallInfo::new("svc.v1.Svc", "Get", MethodKind::Unary);

        let mut request = Request::new(());
        request.metadata_mut().insert("x-id", "7".parse().unwrap());

        let out = chain.intercept(&call, request).unwrap();
        assert!(chain.is_empty());
        assert_eq!(out.metadata().get("x-id").unwrap(), "7");
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recorder(&log, "first"),
            recorder(&log, "second"),
            recorder(&log, "third"),
        ]);
        let call = CallInfo::new("svc.v1.Svc", "Get", MethodKind::Unary);

        chain.intercept(&call, Request::new(())).unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn rejection_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reject: SharedInterceptor = Arc::new(
            |_call: &CallInfo, _request: Request<()>| -> Result<Request<()>, Status> {
                Err(Status::permission_denied("nope"))
            },
        );
        let chain = InterceptorChain::new(vec![
            recorder(&log, "before"),
            reject,
            recorder(&log, "after"),
        ]);
        let call = CallInfo::new("svc.v1.Svc", "Get", MethodKind::Unary);

        let status = chain.intercept(&call, Request::new(())).unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(*log.lock(), vec!["before"]);
    }

    #[test]
    fn later_interceptors_see_earlier_mutations() {
        let stamp: SharedInterceptor = Arc::new(
            |call: &CallInfo, mut request: Request<()>| -> Result<_, Status> {
                let value = call.method().parse().unwrap();
                request.metadata_mut().insert("x-method", value);
                Ok(request)
            },
        );
        let require: SharedInterceptor = Arc::new(
            |_call: &CallInfo, request: Request<()>| -> Result<_, Status> {
                match request.metadata().get("x-method") {
                    Some(_) => Ok(request),
                    None => Err(Status::internal("missing stamp")),
                }
            },
        );
        let chain = InterceptorChain::new(vec![stamp, require]);
        let call = CallInfo::new("svc.v1.Svc", "Get", MethodKind::Unary);

        let out = chain.intercept(&call, Request::new(())).unwrap();
        assert_eq!(out.metadata().get("x-method").unwrap(), "Get");
    }

    #[test]
    fn streaming_kinds_use_the_stream_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors = Interceptors::new(
            InterceptorChain::new(vec![recorder(&log, "unary")]),
            InterceptorChain::new(vec![recorder(&log, "stream")]),
        );

        for kind in [
            MethodKind::Unary,
            MethodKind::ClientStreaming,
            MethodKind::ServerStreaming,
            MethodKind::BidiStreaming,
        ] {
            let call = CallInfo::new("svc.v1.Svc", "M", kind);
            interceptors.intercept(&call, Request::new(())).unwrap();
        }

        assert_eq!(*log.lock(), vec!["unary", "stream", "stream", "stream"]);
    }

    #[test]
    fn call_info_builds_full_method() {
        let call = CallInfo::new("pkg.Svc", "Do", MethodKind::BidiStreaming);
        assert_eq!(call.full_method(), "/pkg.Svc/Do");
        assert_eq!(call.service(), "pkg.Svc");
        assert_eq!(call.method(), "Do");
    }
}
