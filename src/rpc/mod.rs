//! Remote procedure call seam.
//!
//! The dispatcher and monitor only see [`RpcTransport`]; [`XmlRpcClient`] is the production
//! implementation that talks XML-RPC over HTTP to `http://host:port/RPC2`.

mod codec;
mod xmlrpc;

use crate::error::RpcError;
use crate::model::Address;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub(crate) use xmlrpc::XmlRpcClient;

/// Scalar argument of a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcValue {
    Str(String),
    Int(i64),
}

impl fmt::Display for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::Str(s) => f.write_str(s),
            RpcValue::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Synchronous-style call with a per-call timeout. Any scalar return value is rendered to a
/// string; faults and transport problems come back as [`RpcError`].
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(
        &self,
        address: &Address,
        method: &str,
        args: &[RpcValue],
        timeout: Duration,
    ) -> Result<String, RpcError>;
}
