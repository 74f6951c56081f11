//! Request kinds and dispatch.
//!
//! Decrypted requests are JSON objects whose `type` names one of a closed
//! set of kinds. The server resolves the kind and hands the request to a
//! [`RequestHandler`]; whatever the handler returns is encrypted back to
//! the client.

use std::{fmt, str::FromStr};

use secim_core::Certificate;
use serde_json::{Value, json};

/// Every request kind the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// List all message boxes of a user
    All,
    /// List users
    List,
    /// List new messages of a user
    New,
    /// Send a message
    Send,
    /// Receive a message
    Recv,
    /// Create a user message box
    Create,
    /// Acknowledge receipt of a message
    Receipt,
    /// Receipt status of a sent message
    Status,
    /// Public keys and certificates of users
    Resource,
    /// Synthetic request produced by a bootstrap
    Init,
}

impl RequestKind {
    /// All kinds, in protocol order.
    pub const ALL: [Self; 10] = [
        Self::All,
        Self::List,
        Self::New,
        Self::Send,
        Self::Recv,
        Self::Create,
        Self::Receipt,
        Self::Status,
        Self::Resource,
        Self::Init,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::List => "list",
            Self::New => "new",
            Self::Send => "send",
            Self::Recv => "recv",
            Self::Create => "create",
            Self::Receipt => "receipt",
            Self::Status => "status",
            Self::Resource => "resource",
            Self::Init => "init",
        }
    }
}

impl FromStr for RequestKind {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RouteError::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request could not be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Request is not a JSON object
    NotAnObject,
    /// Object has no string `type`
    MissingType,
    /// `type` names no known kind
    UnknownKind(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "request is not an object"),
            Self::MissingType => write!(f, "request has no type field"),
            Self::UnknownKind(kind) => write!(f, "unknown request type {kind:?}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Resolve the kind of a decrypted request.
pub fn route(request: &Value) -> Result<RequestKind, RouteError> {
    let object = request.as_object().ok_or(RouteError::NotAnObject)?;
    let kind = object.get("type").and_then(Value::as_str).ok_or(RouteError::MissingType)?;
    kind.parse()
}

/// Application logic behind the secure channel.
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer one request from a client presenting `peer`.
    fn handle(&self, kind: RequestKind, request: &Value, peer: Option<&Certificate>) -> Value;
}

/// Handler that completes handshakes and refuses everything else.
///
/// Message boxes and users live outside this server; deployments plug in
/// their own [`RequestHandler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeOnly;

impl RequestHandler for HandshakeOnly {
    fn handle(&self, kind: RequestKind, _request: &Value, _peer: Option<&Certificate>) -> Value {
        match kind {
            RequestKind::Init => json!({"message": ""}),
            other => json!({"error": format!("{other} requests are not served")}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_every_kind() {
        for kind in RequestKind::ALL {
            assert_eq!(route(&json!({"type": kind.as_str()})), Ok(kind));
        }
    }

    #[test]
    fn routing_failures() {
        assert_eq!(route(&json!(["type"])), Err(RouteError::NotAnObject));
        assert_eq!(route(&json!({"id": 1})), Err(RouteError::MissingType));
        assert_eq!(route(&json!({"type": 7})), Err(RouteError::MissingType));
        assert_eq!(
            route(&json!({"type": "delete"})),
            Err(RouteError::UnknownKind("delete".to_string()))
        );
    }

    #[test]
    fn handshake_only_answers_init() {
        let handler = HandshakeOnly;
        assert_eq!(
            handler.handle(RequestKind::Init, &json!({"type": "init"}), None),
            json!({"message": ""})
        );
        assert_eq!(
            handler.handle(RequestKind::Send, &json!({"type": "send"}), None),
            json!({"error": "send requests are not served"})
        );
    }
}
