//! aria2 JSON-RPC client.
//!
//! Every call is a single HTTP POST. Responses decode into a typed envelope;
//! a reply with neither `result` nor `error`, or with a foreign `id`, is
//! rejected as malformed.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::traits::{ActiveJob, FetchEngine, FetchRequest, JobHandle};
use super::EngineError;
use crate::utils::http_client::build_rpc_client;

const RPC_ID: &str = "hls-accel";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[serde(default)]
    id: Option<Value>,
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    fn into_result(self) -> Result<T, EngineError> {
        if let Some(id) = &self.id
            && id.as_str() != Some(RPC_ID)
        {
            return Err(EngineError::MalformedResponse(format!(
                "unexpected response id {id}"
            )));
        }
        if let Some(err) = self.error {
            return Err(EngineError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| EngineError::MalformedResponse("missing result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    gid: String,
    #[serde(default)]
    dir: String,
}

/// Client for an aria2 daemon started with `--enable-rpc`.
pub struct Aria2Client {
    client: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(rpc_url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Self {
        Self {
            client: build_rpc_client(timeout),
            rpc_url: rpc_url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, EngineError> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(Value::String(format!("token:{secret}")));
        }
        all_params.extend(params);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: RPC_ID,
            method,
            params: all_params,
        };

        trace!(method, "aria2 RPC call");
        let response = self.client.post(&self.rpc_url).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        // aria2 reports RPC errors with a 4xx status and a JSON body, so try
        // the envelope before looking at the status code.
        match serde_json::from_slice::<RpcResponse<T>>(&body) {
            Ok(envelope) => envelope.into_result(),
            Err(_) if !status.is_success() => Err(EngineError::HttpStatus {
                status: status.as_u16(),
            }),
            Err(e) => Err(EngineError::MalformedResponse(e.to_string())),
        }
    }
}

/// Options object for `aria2.addUri`.
fn add_uri_options(request: &FetchRequest) -> Value {
    let mut options = json!({
        "dir": request.target_dir.to_string_lossy(),
        "out": request.target_filename,
    });
    if !request.headers.is_empty() {
        let header: Vec<String> = request
            .headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        options["header"] = json!(header);
    }
    options
}

#[async_trait]
impl FetchEngine for Aria2Client {
    async fn submit(&self, request: &FetchRequest) -> Result<JobHandle, EngineError> {
        let gid: String = self
            .call(
                "aria2.addUri",
                vec![json!([request.url]), add_uri_options(request)],
            )
            .await?;
        debug!(gid = %gid, url = %request.url, out = %request.target_filename, "Submitted fetch");
        Ok(JobHandle(gid))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let _: String = self
            .call("aria2.forceRemove", vec![json!(handle.as_str())])
            .await?;
        Ok(())
    }

    async fn forget_result(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let _: String = self
            .call("aria2.removeDownloadResult", vec![json!(handle.as_str())])
            .await?;
        Ok(())
    }

    async fn active_jobs(&self) -> Result<Vec<ActiveJob>, EngineError> {
        let statuses: Vec<StatusInfo> = self
            .call("aria2.tellActive", vec![json!(["gid", "dir"])])
            .await?;
        Ok(statuses
            .into_iter()
            .map(|s| ActiveJob {
                handle: JobHandle(s.gid),
                dir: s.dir.into(),
            })
            .collect())
    }

    async fn version(&self) -> Result<String, EngineError> {
        let info: VersionInfo = self.call("aria2.getVersion", vec![]).await?;
        Ok(info.version)
    }
}
