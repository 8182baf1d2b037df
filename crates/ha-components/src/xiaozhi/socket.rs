//! Request/response exchange with the local loader over a Unix socket
//!
//! The request is written in full, the write half is shut down, and the
//! reply is read until the loader closes the connection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};

use super::error::{XiaozhiError, XiaozhiResult};

/// Replies larger than this are truncated
pub const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Reply from the loader
///
/// `{"success":false,"statusCode":500,"message":"上报失败","error":"update error"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SockResponse {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    devices: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// Client for the loader socket
#[derive(Debug, Clone)]
pub struct LoaderClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl LoaderClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send the entity list and the API token
    ///
    /// A reply with `success: false` is an error.
    pub async fn upload(
        &self,
        entities: &[String],
        api_key: Option<&str>,
    ) -> XiaozhiResult<SockResponse> {
        let request = UploadRequest {
            devices: entities.join(";"),
            api_key,
        };
        let message = serde_json::to_vec(&request).map_err(XiaozhiError::Encode)?;
        info!("Uploading {} entities", entities.len());

        let response = self.send(&message).await?;
        if !response.success {
            return Err(XiaozhiError::Rejected {
                status_code: response.status_code,
                message: response
                    .error
                    .or(response.message)
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(response)
    }

    /// One request/response exchange, bounded by the client timeout
    pub async fn send(&self, message: &[u8]) -> XiaozhiResult<SockResponse> {
        let raw = tokio::time::timeout(self.timeout, self.exchange(message))
            .await
            .map_err(|_| XiaozhiError::Timeout(self.timeout))??;

        debug!("Loader replied: {}", String::from_utf8_lossy(&raw));
        serde_json::from_slice(&raw).map_err(XiaozhiError::InvalidResponse)
    }

    async fn exchange(&self, message: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(message).await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut reply)
            .await?;
        Ok(reply)
    }
}
