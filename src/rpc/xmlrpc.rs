use super::codec::{decode_response, encode_call};
use super::{RpcTransport, RpcValue};
use crate::error::RpcError;
use crate::model::Address;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// XML-RPC over HTTP, one POST per call to `http://host:port/RPC2`.
#[derive(Clone)]
pub(crate) struct XmlRpcClient {
    http: reqwest::Client,
}

impl XmlRpcClient {
    pub fn new() -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("daqctl/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RpcTransport for XmlRpcClient {
    async fn call(
        &self,
        address: &Address,
        method: &str,
        args: &[RpcValue],
        timeout: Duration,
    ) -> Result<String, RpcError> {
        let body = encode_call(method, args);
        debug!(%address, method, timeout_ms = timeout.as_millis() as u64, "xml-rpc call");

        let resp = self
            .http
            .post(address.rpc_url())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }
        let text = resp.text().await.map_err(|e| map_reqwest(e, timeout))?;
        decode_response(&text)
    }
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout(timeout)
    } else {
        RpcError::Http(err)
    }
}
