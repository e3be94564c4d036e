//! Service metadata used to classify inbound calls.
//!
//! A [`ServiceDescriptor`] names one gRPC service and lists its methods with
//! their streaming shape. The engine uses it for two things: checking that the
//! registered handler actually serves the described service, and deciding
//! whether an inbound call goes through the unary or the streaming interceptor
//! chain.
//!
//! Descriptors are either assembled by hand or decoded from the encoded
//! `FileDescriptorSet` that `tonic-build` emits next to the generated code.

use crate::{CallInfo, Error, Result};
use prost::Message;
use prost_types::FileDescriptorSet;
use std::collections::HashSet;

/// Streaming shape of a gRPC method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

impl MethodKind {
    pub const fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => Self::Unary,
            (true, false) => Self::ClientStreaming,
            (false, true) => Self::ServerStreaming,
            (true, true) => Self::BidiStreaming,
        }
    }

    /// Returns `true` when neither side of the call streams.
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Unary)
    }
}

/// One RPC method of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    kind: MethodKind,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, client_streaming: bool, server_streaming: bool) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::from_flags(client_streaming, server_streaming),
        }
    }

    pub fn unary(name: impl Into<String>) -> Self {
        Self::new(name, false, false)
    }

    pub fn client_streaming(name: impl Into<String>) -> Self {
        Self::new(name, true, false)
    }

    pub fn server_streaming(name: impl Into<String>) -> Self {
        Self::new(name, false, true)
    }

    pub fn bidi_streaming(name: impl Into<String>) -> Self {
        Self::new(name, true, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// Metadata enumerating the methods a handler must implement.
///
/// The `name` is the fully qualified protobuf service name
/// (`package.Service`), which is also what tonic exposes as
/// [`NamedService::NAME`](tonic::server::NamedService::NAME) on the generated
/// server type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Creates a descriptor with no methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Decodes `service` out of an encoded [`FileDescriptorSet`].
    ///
    /// `service` is matched against `package.Service` for every service in
    /// every file of the set.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] if `bytes` is not a valid `FileDescriptorSet`.
    /// - [`Error::InvalidDescriptor`] if no file declares `service`.
    pub fn from_file_descriptor_set(bytes: &[u8], service: &str) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;

        for file in &set.file {
            let package = file.package();
            for proto in &file.service {
                let full_name = if package.is_empty() {
                    proto.name().to_owned()
                } else {
                    format!("{package}.{}", proto.name())
                };
                if full_name != service {
                    continue;
                }

                let methods = proto
                    .method
                    .iter()
                    .map(|m| {
                        MethodDescriptor::new(m.name(), m.client_streaming(), m.server_streaming())
                    })
                    .collect();

                return Ok(Self {
                    name: full_name,
                    methods,
                });
            }
        }

        Err(Error::InvalidDescriptor {
            reason: format!("service `{service}` not found in file descriptor set"),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Checks that the descriptor can be used to route calls.
    ///
    /// An empty method list is accepted. Duplicate method names are not,
    /// since a path could then resolve to two different streaming shapes.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidDescriptor {
                reason: "service name is empty".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.methods.len());
        for method in &self.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(Error::InvalidDescriptor {
                    reason: format!("method `{}` is declared more than once", method.name),
                });
            }
        }
        Ok(())
    }

    /// Returns `true` when `path` targets this service, whether or not the
    /// method is listed.
    pub fn owns(&self, path: &str) -> bool {
        path.strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(service, _)| service == self.name)
    }

    /// Resolves a request path of the form `/package.Service/Method`.
    ///
    /// Returns `None` for malformed paths, other services, and methods this
    /// descriptor does not list.
    pub fn resolve(&self, path: &str) -> Option<CallInfo> {
        let (service, method) = path.strip_prefix('/')?.split_once('/')?;
        if service != self.name {
            return None;
        }
        let descriptor = self.method(method)?;
        Some(CallInfo::new(service, descriptor.name(), descriptor.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto};

    fn health() -> ServiceDescriptor {
        ServiceDescriptor::new("grpc.health.v1.Health")
            .with_method(MethodDescriptor::unary("Check"))
            .with_method(MethodDescriptor::server_streaming("Watch"))
    }

    fn encoded_set() -> Vec<u8> {
        let method = |name: &str, client: bool, server: bool| MethodDescriptorProto {
            name: Some(name.to_string()),
            client_streaming: Some(client),
            server_streaming: Some(server),
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("chat.proto".to_string()),
            package: Some("chat.v1".to_string()),
            service: vec![ServiceDescriptorProto {
                name: Some("Chat".to_string()),
                method: vec![
                    method("Send", false, false),
                    method("Upload", true, false),
                    method("Subscribe", false, true),
                    method("Converse", true, true),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        FileDescriptorSet { file: vec![file] }.encode_to_vec()
    }

    #[test]
    fn method_kind_flags() {
        assert_eq!(MethodKind::from_flags(false, false), MethodKind::Unary);
        assert_eq!(MethodKind::from_flags(true, false), MethodKind::ClientStreaming);
        assert_eq!(MethodKind::from_flags(false, true), MethodKind::ServerStreaming);
        assert_eq!(MethodKind::from_flags(true, true), MethodKind::BidiStreaming);
        assert!(MethodKind::Unary.is_unary());
        assert!(!MethodKind::BidiStreaming.is_unary());
    }

    #[test]
    fn resolves_known_paths() {
        let desc = health();

        let check = desc.resolve("/grpc.health.v1.Health/Check").unwrap();
        assert_eq!(check.full_method(), "/grpc.health.v1.Health/Check");
        assert_eq!(check.service(), "grpc.health.v1.Health");
        assert_eq!(check.method(), "Check");
        assert_eq!(check.kind(), MethodKind::Unary);

        let watch = desc.resolve("/grpc.health.v1.Health/Watch").unwrap();
        assert_eq!(watch.kind(), MethodKind::ServerStreaming);
    }

    #[test]
    fn ignores_foreign_and_malformed_paths() {
        let desc = health();
        assert!(desc.resolve("/grpc.health.v1.Health/Missing").is_none());
        assert!(desc.resolve("/other.Service/Check").is_none());
        assert!(desc.resolve("grpc.health.v1.Health/Check").is_none());
        assert!(desc.resolve("/grpc.health.v1.Health").is_none());
        assert!(desc.resolve("").is_none());
    }

    #[test]
    fn owns_every_path_of_its_service() {
        let desc = health();
        assert!(desc.owns("/grpc.health.v1.Health/Check"));
        assert!(desc.owns("/grpc.health.v1.Health/Missing"));
        let empty = ServiceDescriptor::new("grpc.health.v1.Health");
        assert!(empty.owns("/grpc.health.v1.Health/Check"));
        assert!(!desc.owns("/other.Service/Check"));
        assert!(!desc.owns("/grpc.health.v1.Health"));
        assert!(!desc.owns(""));
    }

    #[test]
    fn validate_rejects_duplicates_and_empty_names() {
        assert!(health().validate().is_ok());
        assert!(ServiceDescriptor::new("empty.v1.Empty").validate().is_ok());

        let dup = health().with_method(MethodDescriptor::unary("Check"));
        assert!(matches!(
            dup.validate(),
            Err(Error::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            ServiceDescriptor::new("").validate(),
            Err(Error::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn decodes_file_descriptor_set() {
        let desc = ServiceDescriptor::from_file_descriptor_set(&encoded_set(), "chat.v1.Chat")
            .unwrap();

        assert_eq!(desc.name(), "chat.v1.Chat");
        let kinds: Vec<_> = desc.methods().iter().map(|m| (m.name(), m.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                ("Send", MethodKind::Unary),
                ("Upload", MethodKind::ClientStreaming),
                ("Subscribe", MethodKind::ServerStreaming),
                ("Converse", MethodKind::BidiStreaming),
            ]
        );
    }

    #[test]
    fn unknown_service_in_set_is_rejected() {
        let err = ServiceDescriptor::from_file_descriptor_set(&encoded_set(), "chat.v1.Missing")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = ServiceDescriptor::from_file_descriptor_set(&[0xff, 0xff], "chat.v1.Chat")
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
