//! # Remote API Seam
//!
//! The transport the adapters call through. Session login/logout, XML-RPC
//! encoding and HTTP live behind [`RemoteApi`]; adapters only build
//! [`RemoteCall`]s and interpret the JSON answers.
//!
//! ## Call Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1.7  RemoteCall { method: "sales_order_invoice.create",               │
//! │                    args: Positional(["145000008", {"598": 1.0}, ...]) }│
//! │                                                                         │
//! │  2.0  RemoteCall { method: "order/145000008/invoice",                  │
//! │                    args: Rest { method: Post, query: {}, body: {...} } }│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use magento_core::FieldMap;

/// HTTP verb of a 2.0 call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Arguments of a remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallArgs {
    /// 1.7: positional RPC arguments.
    Positional(Vec<Value>),

    /// 2.0: REST request parts.
    Rest {
        method: HttpMethod,
        query: FieldMap,
        body: Option<Value>,
    },
}

/// One call to the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// RPC method (`catalog_category.info`) or REST path (`categories/3`).
    pub method: String,
    pub args: CallArgs,
}

impl RemoteCall {
    pub fn positional(method: impl Into<String>, args: Vec<Value>) -> Self {
        RemoteCall {
            method: method.into(),
            args: CallArgs::Positional(args),
        }
    }

    pub fn get(path: impl Into<String>, query: FieldMap) -> Self {
        RemoteCall {
            method: path.into(),
            args: CallArgs::Rest {
                method: HttpMethod::Get,
                query,
                body: None,
            },
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        RemoteCall {
            method: path.into(),
            args: CallArgs::Rest {
                method: HttpMethod::Post,
                query: FieldMap::new(),
                body: Some(body),
            },
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        RemoteCall {
            method: path.into(),
            args: CallArgs::Rest {
                method: HttpMethod::Put,
                query: FieldMap::new(),
                body: Some(body),
            },
        }
    }

    /// Positional arguments, empty for REST calls.
    pub fn positional_args(&self) -> &[Value] {
        match &self.args {
            CallArgs::Positional(args) => args,
            CallArgs::Rest { .. } => &[],
        }
    }
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            CallArgs::Positional(_) => write!(f, "{}", self.method),
            CallArgs::Rest { method, .. } => write!(f, "{} {}", method, self.method),
        }
    }
}

/// Failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFault {
    /// 1.7 API fault with its numeric code.
    Fault { code: i64, message: String },

    /// 2.0 HTTP error status.
    Http { status: u16, body: String },

    /// Connection, timeout or decoding failure.
    Transport(String),
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFault::Fault { code, message } => write!(f, "fault {}: {}", code, message),
            RemoteFault::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            RemoteFault::Transport(msg) => write!(f, "transport: {}", msg),
        }
    }
}

impl std::error::Error for RemoteFault {}

/// Transport to one remote platform.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Performs one call and returns the decoded JSON answer.
    async fn call(&self, call: RemoteCall) -> Result<Value, RemoteFault>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_display() {
        let rpc = RemoteCall::positional("catalog_category.info", vec![json!("3")]);
        assert_eq!(rpc.to_string(), "catalog_category.info");
        assert_eq!(rpc.positional_args(), &[json!("3")]);

        let rest = RemoteCall::post("order/145000008/invoice", json!({}));
        assert_eq!(rest.to_string(), "POST order/145000008/invoice");
        assert!(rest.positional_args().is_empty());
    }
}
