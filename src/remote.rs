//! Client for the managed remote transcoding service.
//!
//! Submission copies a source URL into the service and returns a job handle
//! plus a playback manifest URL right away; the transcode itself finishes
//! later and is observed through [`RemoteTranscoder::status`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::error::{PipelineError, Result};
use crate::job::VideoMetadata;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubmission {
    pub handle: String,
    pub manifest_url: Option<String>,
    /// Raw response body kept for diagnostics
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Pending,
    Ready { manifest_url: Option<String> },
    Failed { reason: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTranscoder: Send + Sync {
    async fn submit(&self, source_url: &str, metadata: &VideoMetadata) -> Result<RemoteSubmission>;

    async fn status(&self, handle: &str) -> Result<RemoteStatus>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    uid: String,
    #[serde(default, rename = "readyToStream")]
    ready_to_stream: bool,
    #[serde(default)]
    status: Option<ResourceStatus>,
    #[serde(default)]
    playback: Option<Playback>,
}

#[derive(Debug, Deserialize)]
struct ResourceStatus {
    #[serde(default)]
    state: String,
    #[serde(default, rename = "errorReasonText")]
    error_reason_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Playback {
    hls: Option<String>,
}

impl VideoResource {
    fn manifest_url(&self) -> Option<String> {
        self.playback.as_ref().and_then(|p| p.hls.clone())
    }
}

/// HTTP implementation of the remote transcoding API
pub struct HttpRemoteTranscoder {
    client: Client,
    endpoint: String,
    api_token: String,
}

impl HttpRemoteTranscoder {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("Remote transcoding endpoint is not set".to_string()))?;
        let api_token = config
            .api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("Remote transcoding API token is not set".to_string()))?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    fn api_errors(errors: &[ApiMessage]) -> String {
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        if messages.is_empty() {
            "no error details".to_string()
        } else {
            messages.join("; ")
        }
    }
}

#[async_trait]
impl RemoteTranscoder for HttpRemoteTranscoder {
    async fn submit(&self, source_url: &str, metadata: &VideoMetadata) -> Result<RemoteSubmission> {
        let url = format!("{}/copy", self.endpoint);
        let mut meta = json!({ "extra": metadata.extra });
        if let Some(title) = &metadata.title {
            meta["name"] = json!(title);
        }
        let body = json!({ "url": source_url, "meta": meta });

        debug!("Submitting {} to {}", source_url, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Remote(format!("Submission request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Remote(format!(
                "Submission rejected with {}: {}",
                status, error_text
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Remote(format!("Malformed submission response: {}", e)))?;
        let envelope: Envelope<VideoResource> = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::Remote(format!("Malformed submission response: {}", e)))?;

        if envelope.success == Some(false) {
            return Err(PipelineError::Remote(format!(
                "Submission reported failure: {}",
                Self::api_errors(&envelope.errors)
            )));
        }

        let resource = envelope
            .result
            .filter(|r| !r.uid.is_empty())
            .ok_or_else(|| PipelineError::Remote("Submission response has no job handle".to_string()))?;

        info!("Remote service accepted {} as {}", source_url, resource.uid);

        Ok(RemoteSubmission {
            manifest_url: resource.manifest_url(),
            handle: resource.uid,
            response: raw,
        })
    }

    async fn status(&self, handle: &str) -> Result<RemoteStatus> {
        let url = format!("{}/{}", self.endpoint, handle);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| PipelineError::Remote(format!("Status request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(RemoteStatus::Failed {
                reason: format!("Remote job {} not found", handle),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Remote(format!(
                "Status check failed with {}: {}",
                status, error_text
            )));
        }

        let envelope: Envelope<VideoResource> = response
            .json()
            .await
            .map_err(|e| PipelineError::Remote(format!("Malformed status response: {}", e)))?;
        let resource = envelope
            .result
            .ok_or_else(|| PipelineError::Remote(format!(
                "Status response has no result: {}",
                Self::api_errors(&envelope.errors)
            )))?;

        let state = resource.status.as_ref().map(|s| s.state.as_str()).unwrap_or("");
        if state == "error" {
            let reason = resource
                .status
                .as_ref()
                .and_then(|s| s.error_reason_text.clone())
                .unwrap_or_else(|| "remote transcoding failed".to_string());
            return Ok(RemoteStatus::Failed { reason });
        }

        if resource.ready_to_stream || state == "ready" {
            return Ok(RemoteStatus::Ready {
                manifest_url: resource.manifest_url(),
            });
        }

        debug!("Remote job {} still {}", handle, if state.is_empty() { "pending" } else { state });
        Ok(RemoteStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpRemoteTranscoder {
        HttpRemoteTranscoder::new(&RemoteConfig {
            endpoint: Some(format!("{}/stream", server.uri())),
            api_token: Some("token".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_credentials() {
        let config = RemoteConfig {
            endpoint: Some("https://api.example.com/stream".to_string()),
            ..Default::default()
        };
        assert!(matches!(HttpRemoteTranscoder::new(&config), Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_returns_handle_and_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream/copy"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {
                    "uid": "ea95132c",
                    "readyToStream": false,
                    "playback": { "hls": "https://cdn.example/ea95132c/manifest/video.m3u8" }
                }
            })))
            .mount(&server)
            .await;

        let submission = client_for(&server)
            .await
            .submit("https://storage.example/raw/1.mp4", &VideoMetadata::default())
            .await
            .unwrap();
        assert_eq!(submission.handle, "ea95132c");
        assert_eq!(
            submission.manifest_url.as_deref(),
            Some("https://cdn.example/ea95132c/manifest/video.m3u8")
        );
    }

    #[tokio::test]
    async fn test_submit_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream/copy"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .await
            .submit("https://storage.example/raw/1.mp4", &VideoMetadata::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Remote(msg)) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_submit_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream/copy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .await
            .submit("https://storage.example/raw/1.mp4", &VideoMetadata::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Remote(_))));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream/ready1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {
                    "uid": "ready1",
                    "readyToStream": true,
                    "status": { "state": "ready" },
                    "playback": { "hls": "https://cdn.example/ready1.m3u8" }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stream/busy1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": { "uid": "busy1", "readyToStream": false, "status": { "state": "inprogress" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stream/bad1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {
                    "uid": "bad1",
                    "readyToStream": false,
                    "status": { "state": "error", "errorReasonText": "codec unsupported" }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stream/gone1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(
            client.status("ready1").await.unwrap(),
            RemoteStatus::Ready {
                manifest_url: Some("https://cdn.example/ready1.m3u8".to_string())
            }
        );
        assert_eq!(client.status("busy1").await.unwrap(), RemoteStatus::Pending);
        assert_eq!(
            client.status("bad1").await.unwrap(),
            RemoteStatus::Failed {
                reason: "codec unsupported".to_string()
            }
        );
        assert!(matches!(client.status("gone1").await.unwrap(), RemoteStatus::Failed { .. }));
    }
}
