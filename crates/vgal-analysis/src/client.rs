//! Analysis service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use vgal_models::{Entity, JobHandle, JobKind, JobPoll, MediaRef, SentimentAnalysis};

use crate::error::{AnalysisError, AnalysisResult};
use crate::service::{JobClient, TextAnalyzer};
use crate::types::{
    decode_payload, require_result, EntitiesResponse, JobStatusResponse,
    KeyPhrasesResponse, RemoteJobStatus, SentimentResponse, SubmitJobRequest, SubmitJobResponse,
    TextRequest,
};

/// Configuration for the analysis client.
#[derive(Debug, Clone)]
pub struct AnalysisClientConfig {
    /// Base URL of the analysis gateway
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries per request
    pub max_retries: u32,
}

impl Default for AnalysisClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

impl AnalysisClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ANALYSIS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("ANALYSIS_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("ANALYSIS_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Stateless HTTP adapter for the job and text analysis gateway.
pub struct HttpAnalysisClient {
    http: Client,
    config: AnalysisClientConfig,
}

impl HttpAnalysisClient {
    pub fn new(config: AnalysisClientConfig) -> AnalysisResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AnalysisError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> AnalysisResult<Self> {
        Self::new(AnalysisClientConfig::from_env())
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> AnalysisResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("POST {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(e))?;
                check_status(response, path).await
            })
            .await?;

        Ok(response.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AnalysisResult<T> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("GET {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(e))?;
                check_status(response, path).await
            })
            .await?;

        Ok(response.json().await?)
    }

    fn map_send_error(&self, e: reqwest::Error) -> AnalysisError {
        if e.is_timeout() {
            AnalysisError::Timeout(self.config.timeout.as_secs())
        } else {
            AnalysisError::Network(e)
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> AnalysisResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AnalysisResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Analysis request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AnalysisError::request_failed("Unknown error")))
    }
}

async fn check_status(response: Response, path: &str) -> AnalysisResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => AnalysisError::JobNotFound(path.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            AnalysisError::ServiceUnavailable(format!("{} returned {}", path, status))
        }
        s if s.is_server_error() => {
            AnalysisError::ServiceUnavailable(format!("{} returned {}: {}", path, s, body))
        }
        s => AnalysisError::request_failed(format!("{} returned {}: {}", path, s, body)),
    })
}

#[async_trait]
impl JobClient for HttpAnalysisClient {
    async fn submit(
        &self,
        kind: JobKind,
        media: &MediaRef,
        job_name: &str,
    ) -> AnalysisResult<JobHandle> {
        let request = SubmitJobRequest::for_kind(kind, media, job_name);
        let response: SubmitJobResponse =
            self.post_json(&format!("/jobs/{}", kind), &request).await?;

        if response.job_id.is_empty() {
            return Err(AnalysisError::invalid_response(format!(
                "{} submission returned an empty job id",
                kind
            )));
        }

        debug!(kind = %kind, job_id = %response.job_id, "Analysis job submitted");
        Ok(JobHandle::new(response.job_id))
    }

    async fn poll(&self, kind: JobKind, handle: &JobHandle) -> AnalysisResult<JobPoll> {
        let response: JobStatusResponse = self
            .get_json(&format!("/jobs/{}/{}", kind, handle))
            .await?;

        match response.status {
            RemoteJobStatus::InProgress => Ok(JobPoll::Pending),
            RemoteJobStatus::Failed => Ok(JobPoll::Failed {
                reason: response
                    .status_message
                    .unwrap_or_else(|| format!("{} job failed", kind)),
            }),
            RemoteJobStatus::Succeeded => {
                let result = require_result(kind, response.result)?;
                Ok(JobPoll::Succeeded(decode_payload(kind, result)?))
            }
        }
    }
}

#[async_trait]
impl TextAnalyzer for HttpAnalysisClient {
    async fn sentiment(&self, text: &str) -> AnalysisResult<SentimentAnalysis> {
        let response: SentimentResponse =
            self.post_json("/text/sentiment", &TextRequest::new(text)).await?;
        Ok(response)
    }

    async fn key_phrases(&self, text: &str) -> AnalysisResult<Vec<String>> {
        let response: KeyPhrasesResponse = self
            .post_json("/text/key-phrases", &TextRequest::new(text))
            .await?;
        Ok(response.key_phrases)
    }

    async fn entities(&self, text: &str) -> AnalysisResult<Vec<Entity>> {
        let response: EntitiesResponse =
            self.post_json("/text/entities", &TextRequest::new(text)).await?;
        Ok(response.entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vgal_models::JobPayload;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, max_retries: u32) -> HttpAnalysisClient {
        HttpAnalysisClient::new(AnalysisClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = AnalysisClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[tokio::test]
    async fn test_submit_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/transcription"))
            .and(body_partial_json(json!({
                "job_name": "transcribe-v1-100",
                "language_code": "en-US",
                "media_format": "mp4"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "tr-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let handle = client
            .submit_transcription(&MediaRef::from("s3://b/v1.mp4"), "transcribe-v1-100")
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "tr-1");
    }

    #[tokio::test]
    async fn test_poll_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/face_detection/f-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "IN_PROGRESS"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/content_moderation/m-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "FAILED",
                "status_message": "unsupported codec"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/label_detection/l-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCEEDED",
                "result": {"labels": {"Dog": {"confidence": 95.0}}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);

        let poll = client.poll_face_detection(&JobHandle::from("f-1")).await.unwrap();
        assert_eq!(poll, JobPoll::Pending);

        let poll = client
            .poll_content_moderation(&JobHandle::from("m-1"))
            .await
            .unwrap();
        assert_eq!(
            poll,
            JobPoll::Failed {
                reason: "unsupported codec".to_string()
            }
        );

        let poll = client.poll_label_detection(&JobHandle::from("l-1")).await.unwrap();
        match poll {
            JobPoll::Succeeded(JobPayload::Labels(labels)) => {
                assert_eq!(labels["Dog"].confidence, 95.0)
            }
            other => panic!("Expected labels, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_succeeded_without_result_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/transcription/tr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let err = client
            .poll_transcription(&JobHandle::from("tr-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/face_detection/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/face_detection/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/jobs/label_detection"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad media uri"))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);

        let err = client.poll_face_detection(&JobHandle::from("gone")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::JobNotFound(_)));
        assert!(!err.is_retryable());

        let err = client.poll_face_detection(&JobHandle::from("busy")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(_)));
        assert!(err.is_retryable());

        let err = client
            .submit_label_detection(&MediaRef::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RequestFailed(ref m) if m.contains("bad media uri")));
    }

    #[tokio::test]
    async fn test_retries_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/text/key-phrases"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/text/key-phrases"))
            .and(body_partial_json(json!({"language_code": "en"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"key_phrases": ["red ball"]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 1);
        let phrases = client.key_phrases("a red ball").await.unwrap();
        assert_eq!(phrases, vec!["red ball".to_string()]);
    }

    #[tokio::test]
    async fn test_text_analysis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/text/sentiment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sentiment": "POSITIVE",
                "scores": {"positive": 0.9, "negative": 0.02, "neutral": 0.07, "mixed": 0.01}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/text/entities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"text": "Paris", "type": "LOCATION", "score": 0.99}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);

        let sentiment = client.sentiment("great trip").await.unwrap();
        assert_eq!(sentiment.sentiment, "POSITIVE");

        let entities = client.entities("great trip to Paris").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "LOCATION");
    }
}
