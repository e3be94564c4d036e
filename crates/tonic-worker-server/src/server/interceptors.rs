//! Interceptors installed on both chains of the served worker.
//!
//! They are registered in this order:
//!
//! 1. [`track_calls`] - counts and logs every call.
//! 2. [`BearerAuth`] - rejects calls without the configured token (optional).
//! 3. [`RequestId`] - stamps `x-request-id` on calls that lack one.

use super::telemetry::{increment_calls, increment_rejected_calls};
use core::sync::atomic::{AtomicU64, Ordering};
use tonic::{
    Request, Status,
    metadata::{AsciiMetadataValue, MetadataValue},
};
use tonic_worker::{CallInfo, Interceptor, MethodKind};

pub const AUTHORIZATION: &str = "authorization";
pub const REQUEST_ID: &str = "x-request-id";

const fn chain_label(kind: MethodKind) -> &'static str {
    if kind.is_unary() { "unary" } else { "stream" }
}

pub fn track_calls(call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status> {
    increment_calls(chain_label(call.kind()));
    tracing::debug!(method = call.full_method(), kind = ?call.kind(), "inbound call");
    Ok(request)
}

/// Requires `authorization: Bearer <token>` to match exactly.
#[derive(Clone, Debug)]
pub struct BearerAuth {
    expected: AsciiMetadataValue,
}

impl BearerAuth {
    pub const fn new(expected: AsciiMetadataValue) -> Self {
        Self { expected }
    }
}

impl Interceptor for BearerAuth {
    fn intercept(&self, call: &CallInfo, request: Request<()>) -> Result<Request<()>, Status> {
        let reason = match request.metadata().get(AUTHORIZATION) {
            Some(token) if *token == self.expected => return Ok(request),
            Some(_) => "invalid bearer token",
            None => "missing bearer token",
        };

        increment_rejected_calls(chain_label(call.kind()));
        tracing::warn!(method = call.full_method(), reason, "rejected call");
        Err(Status::unauthenticated(reason))
    }
}

/// Assigns a process-unique request id to calls that arrive without one.
/// Ids supplied by the client are kept.
#[derive(Debug)]
pub struct RequestId {
    prefix: String,
    next: AtomicU64,
}

impl RequestId {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Interceptor for RequestId {
    fn intercept(&self, _call: &CallInfo, mut request: Request<()>) -> Result<Request<()>, Status> {
        if request.metadata().contains_key(REQUEST_ID) {
            return Ok(request);
        }

        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let value = MetadataValue::try_from(format!("{}-{id}", self.prefix))
            .map_err(|_| Status::internal("request id prefix is not valid metadata"))?;
        request.metadata_mut().insert(REQUEST_ID, value);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn call(kind: MethodKind) -> CallInfo {
        CallInfo::new("grpc.health.v1.Health", "Check", kind)
    }

    fn with_header(name: &'static str, value: &str) -> Request<()> {
        let mut request = Request::new(());
        request.metadata_mut().insert(name, value.parse().unwrap());
        request
    }

    fn auth() -> BearerAuth {
        BearerAuth::new("Bearer s3cret".parse().unwrap())
    }

    #[test]
    fn track_calls_passes_requests_through() {
        let request = with_header(REQUEST_ID, "abc");
        let request = track_calls(&call(MethodKind::ServerStreaming), request).unwrap();
        assert_eq!(request.metadata().get(REQUEST_ID).unwrap(), "abc");
    }

    #[test]
    fn bearer_auth_accepts_matching_token() {
        let request = with_header(AUTHORIZATION, "Bearer s3cret");
        assert!(auth().intercept(&call(MethodKind::Unary), request).is_ok());
    }

    #[test]
    fn bearer_auth_rejects_missing_token() {
        let status = auth()
            .intercept(&call(MethodKind::Unary), Request::new(()))
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "missing bearer token");
    }

    #[test]
    fn bearer_auth_rejects_wrong_token() {
        let request = with_header(AUTHORIZATION, "Bearer nope");
        let status = auth()
            .intercept(&call(MethodKind::BidiStreaming), request)
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "invalid bearer token");
    }

    #[test]
    fn request_ids_are_sequential() {
        let ids = RequestId::new("node-a");
        let first = ids.intercept(&call(MethodKind::Unary), Request::new(())).unwrap();
        let second = ids.intercept(&call(MethodKind::Unary), Request::new(())).unwrap();
        assert_eq!(first.metadata().get(REQUEST_ID).unwrap(), "node-a-1");
        assert_eq!(second.metadata().get(REQUEST_ID).unwrap(), "node-a-2");
    }

    #[test]
    fn client_request_id_is_kept() {
        let ids = RequestId::new("node-a");
        let request = ids
            .intercept(&call(MethodKind::Unary), with_header(REQUEST_ID, "client-7"))
            .unwrap();
        assert_eq!(request.metadata().get(REQUEST_ID).unwrap(), "client-7");

        let next = ids.intercept(&call(MethodKind::Unary), Request::new(())).unwrap();
        assert_eq!(next.metadata().get(REQUEST_ID).unwrap(), "node-a-1");
    }

    #[test]
    fn unprintable_prefix_rejects_the_call() {
        let ids = RequestId::new("bad\nprefix");
        let status = ids
            .intercept(&call(MethodKind::Unary), Request::new(()))
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }
}
