//! Tower layer that applies the interceptor chains to inbound HTTP requests.
//!
//! The layer sits in front of the engine's routes. For each request it looks
//! the path up in the worker's [`ServiceDescriptor`]; known methods run through
//! the unary or streaming chain before the call is forwarded. Methods of the
//! served service that the descriptor does not list are answered with
//! `Unimplemented`, so no call reaches the handler without its chain. Paths of
//! other services are forwarded untouched for the router to answer.

use crate::{Interceptors, ServiceDescriptor};
use core::task::{Context, Poll};
use futures::future::{self, Either, Ready};
use std::sync::Arc;
use tonic::{Status, body::Body, metadata::MetadataMap};
use tower::{Layer, Service};

/// Layer produced once per engine from the sealed interceptor chains.
#[derive(Clone, Debug)]
pub struct InterceptLayer {
    descriptor: Arc<ServiceDescriptor>,
    interceptors: Interceptors,
}

impl InterceptLayer {
    pub const fn new(descriptor: Arc<ServiceDescriptor>, interceptors: Interceptors) -> Self {
        Self {
            descriptor,
            interceptors,
        }
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = Intercept<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Intercept {
            inner,
            descriptor: Arc::clone(&self.descriptor),
            interceptors: self.interceptors.clone(),
        }
    }
}

/// Service wrapper created by [`InterceptLayer`].
#[derive(Clone, Debug)]
pub struct Intercept<S> {
    inner: S,
    descriptor: Arc<ServiceDescriptor>,
    interceptors: Interceptors,
}

impl<S, B> Service<http::Request<B>> for Intercept<S>
where
    S: Service<http::Request<B>, Response = http::Response<Body>>,
{
    type Response = http::Response<Body>;
    type Error = S::Error;
    type Future = Either<Ready<Result<Self::Response, Self::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path();
        let call = match self.descriptor.resolve(path) {
            Some(call) => call,
            None if self.descriptor.owns(path) => {
                tracing::debug!(path, "call to undescribed method");
                return reject(Status::unimplemented(format!("unknown method {path}")));
            }
            None => return Either::Right(self.inner.call(req)),
        };
        if self.interceptors.chain_for(call.kind()).is_empty() {
            return Either::Right(self.inner.call(req));
        }

        let (mut parts, body) = req.into_parts();
        let request = tonic::Request::from_parts(
            MetadataMap::from_headers(core::mem::take(&mut parts.headers)),
            core::mem::take(&mut parts.extensions),
            (),
        );

        match self.interceptors.intercept(&call, request) {
            Ok(request) => {
                let (metadata, extensions, ()) = request.into_parts();
                parts.headers = metadata.into_headers();
                parts.extensions = extensions;
                Either::Right(self.inner.call(http::Request::from_parts(parts, body)))
            }
            Err(status) => {
                tracing::debug!(
                    method = call.full_method(),
                    code = ?status.code(),
                    "call rejected by interceptor"
                );
                reject(status)
            }
        }
    }
}

fn reject<F, E>(status: Status) -> Either<Ready<Result<http::Response<Body>, E>>, F> {
    let response = status.into_http::<()>().map(|()| Body::empty());
    Either::Left(future::ready(Ok(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallInfo, InterceptorChain, MethodDescriptor, SharedInterceptor};
    use core::convert::Infallible;
    use parking_lot::Mutex;
    use tonic::Request;
    use tower::ServiceExt;

    /// Echoes back whether the request reached it and with which metadata.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    impl Service<http::Request<Body>> for Recorder {
        type Response = http::Response<Body>;
        type Error = Infallible;
        type Future = Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<Body>) -> Self::Future {
            let tag = req
                .headers()
                .get("x-tag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            self.seen.lock().push((req.uri().path().to_owned(), tag));
            future::ready(Ok(http::Response::new(Body::empty())))
        }
    }

    fn descriptor() -> Arc<ServiceDescriptor> {
        Arc::new(
            ServiceDescriptor::new("echo.v1.Echo")
                .with_method(MethodDescriptor::unary("Say"))
                .with_method(MethodDescriptor::bidi_streaming("Chat")),
        )
    }

    fn tagger(tag: &'static str) -> SharedInterceptor {
        Arc::new(
            move |_call: &CallInfo, mut request: Request<()>| -> Result<_, Status> {
                request.metadata_mut().insert("x-tag", tag.parse().unwrap());
                Ok(request)
            },
        )
    }

    fn request(path: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(format!("http://localhost{path}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn unary_and_stream_paths_use_their_own_chain() {
        let recorder = Recorder::default();
        let layer = InterceptLayer::new(
            descriptor(),
            Interceptors::new(
                InterceptorChain::new(vec![tagger("unary")]),
                InterceptorChain::new(vec![tagger("stream")]),
            ),
        );
        let svc = layer.layer(recorder.clone());

        svc.clone().oneshot(request("/echo.v1.Echo/Say")).await.unwrap();
        svc.clone().oneshot(request("/echo.v1.Echo/Chat")).await.unwrap();
        svc.oneshot(request("/other.v1.Other/Say")).await.unwrap();

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                ("/echo.v1.Echo/Say".to_owned(), Some("unary".to_owned())),
                ("/echo.v1.Echo/Chat".to_owned(), Some("stream".to_owned())),
                ("/other.v1.Other/Say".to_owned(), None),
            ]
        );
    }

    #[tokio::test]
    async fn undescribed_methods_are_unimplemented_even_with_empty_chains() {
        let recorder = Recorder::default();
        let layer = InterceptLayer::new(
            Arc::new(ServiceDescriptor::new("echo.v1.Echo")),
            Interceptors::default(),
        );

        let response = layer
            .layer(recorder.clone())
            .oneshot(request("/echo.v1.Echo/Say"))
            .await
            .unwrap();

        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn rejected_calls_never_reach_the_inner_service() {
        let recorder = Recorder::default();
        let deny: SharedInterceptor = Arc::new(
            |_call: &CallInfo, _request: Request<()>| -> Result<Request<()>, Status> {
                Err(Status::unauthenticated("no token"))
            },
        );
        let layer = InterceptLayer::new(
            descriptor(),
            Interceptors::new(InterceptorChain::new(vec![deny]), InterceptorChain::default()),
        );

        let response = layer
            .layer(recorder.clone())
            .oneshot(request("/echo.v1.Echo/Say"))
            .await
            .unwrap();

        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "no token");
        assert!(recorder.seen.lock().is_empty());
    }
}
