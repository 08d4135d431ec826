//! Gemini REST client over `reqwest::blocking`.
//!
//! The native path goes through the File API: a resumable upload, a poll until
//! the file is `ACTIVE`, one `generateContent` call referencing the file, and a
//! best-effort delete.

use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::ModelError;

use super::provider::{DocumentUpload, GenerativeModel, ModelResponse};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const TEMPERATURE: f64 = 0.1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Serialize)]
struct UploadStart<'a> {
    file: UploadStartFile<'a>,
}

#[derive(Debug, Serialize)]
struct UploadStartFile<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

impl RemoteFile {
    fn is_processing(&self) -> bool {
        self.state.as_deref() == Some("PROCESSING")
    }

    fn is_failed(&self) -> bool {
        self.state.as_deref() == Some("FAILED")
    }
}

/// Time budget for one model call, shared by every request the call makes.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    end: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            end: Instant::now() + budget,
            budget,
        }
    }

    fn remaining(&self) -> Result<Duration, ModelError> {
        self.end
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(ModelError::Timeout {
                seconds: self.budget.as_secs(),
            })
    }
}

/// Holds only an immutable HTTP client and its settings.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    api_base: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_seconds: u64,
    ) -> Result<Self, ModelError> {
        let timeout = Duration::from_secs(timeout_seconds);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ModelError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout,
        })
    }

    /// Client for `config.model_name` with the configured request timeout.
    pub fn from_config(
        api_key: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self, ModelError> {
        Self::new(
            api_key,
            config.model_name.clone(),
            config.request_timeout_seconds,
        )
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send(&self, request: RequestBuilder, deadline: &Deadline) -> Result<Response, ModelError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(deadline.remaining()?)
            .send()
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(status_error(status, body))
    }

    fn transport_error(&self, error: reqwest::Error) -> ModelError {
        if error.is_timeout() {
            ModelError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            ModelError::Transport(error.to_string())
        }
    }

    fn upload(
        &self,
        document: DocumentUpload<'_>,
        deadline: &Deadline,
    ) -> Result<RemoteFile, ModelError> {
        let start = self.send(
            self.http
                .post(format!("{}/upload/v1beta/files", self.api_base))
                .header("X-Goog-Upload-Protocol", "resumable")
                .header("X-Goog-Upload-Command", "start")
                .header(
                    "X-Goog-Upload-Header-Content-Length",
                    document.bytes.len().to_string(),
                )
                .header("X-Goog-Upload-Header-Content-Type", document.mime_type)
                .json(&UploadStart {
                    file: UploadStartFile {
                        display_name: document.display_name,
                    },
                }),
            deadline,
        )?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or_else(|| ModelError::Upload("upload session returned no upload URL".to_string()))?;

        let finished = self.send(
            self.http
                .post(upload_url)
                .header("X-Goog-Upload-Offset", "0")
                .header("X-Goog-Upload-Command", "upload, finalize")
                .body(document.bytes.to_vec()),
            deadline,
        )?;

        let uploaded: UploadResponse = finished
            .json()
            .map_err(|error| ModelError::Upload(format!("invalid upload response: {error}")))?;
        debug!(
            file = %uploaded.file.name,
            bytes = document.bytes.len(),
            "uploaded document"
        );

        self.wait_until_active(uploaded.file, deadline)
    }

    fn wait_until_active(
        &self,
        mut file: RemoteFile,
        deadline: &Deadline,
    ) -> Result<RemoteFile, ModelError> {
        while file.is_processing() {
            thread::sleep(FILE_POLL_INTERVAL.min(deadline.remaining()?));
            file = self
                .send(
                    self.http
                        .get(format!("{}/v1beta/{}", self.api_base, file.name)),
                    deadline,
                )?
                .json()
                .map_err(|error| ModelError::Upload(format!("invalid file status: {error}")))?;
        }

        if file.is_failed() {
            return Err(ModelError::Upload(format!(
                "file {} failed server-side processing",
                file.name
            )));
        }
        if file.uri.is_empty() {
            return Err(ModelError::Upload(format!("file {} has no URI", file.name)));
        }

        Ok(file)
    }

    fn delete(&self, file: &RemoteFile) {
        let result = self.send(
            self.http
                .delete(format!("{}/v1beta/{}", self.api_base, file.name)),
            &Deadline::after(self.timeout),
        );
        if let Err(error) = result {
            warn!(file = %file.name, error = %error, "failed to delete uploaded file");
        }
    }

    fn generate(
        &self,
        parts: Vec<Part<'_>>,
        deadline: &Deadline,
    ) -> Result<ModelResponse, ModelError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let response: GenerateContentResponse = self
            .send(
                self.http
                    .post(generate_content_url(&self.api_base, &self.model))
                    .json(&request),
                deadline,
            )?
            .json()
            .map_err(|error| ModelError::Transport(format!("invalid generateContent response: {error}")))?;

        model_response(response)
    }
}

impl GenerativeModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate_from_document(
        &self,
        prompt: &str,
        document: DocumentUpload<'_>,
    ) -> Result<ModelResponse, ModelError> {
        let deadline = Deadline::after(self.timeout);
        let file = self.upload(document, &deadline)?;
        let mime_type = file.mime_type.as_deref().unwrap_or(document.mime_type);

        let result = self.generate(
            vec![
                Part::Text { text: prompt },
                Part::File {
                    file_data: FileData {
                        mime_type,
                        file_uri: &file.uri,
                    },
                },
            ],
            &deadline,
        );

        self.delete(&file);
        result
    }

    fn generate_from_text(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        self.generate(
            vec![Part::Text { text: prompt }],
            &Deadline::after(self.timeout),
        )
    }
}

fn generate_content_url(api_base: &str, model: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    format!("{api_base}/v1beta/models/{model}:generateContent")
}

fn status_error(status: StatusCode, body: String) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::Quota(body)
    } else {
        ModelError::Service {
            status: status.as_u16(),
            body,
        }
    }
}

fn model_response(response: GenerateContentResponse) -> Result<ModelResponse, ModelError> {
    let text = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect::<Vec<String>>()
        .join("");

    if text.trim().is_empty() {
        return Err(ModelError::EmptyResponse);
    }

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(ModelResponse {
        text,
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spent_deadline_reports_the_whole_call_budget() {
        let deadline = Deadline::after(Duration::from_secs(300));
        let left = deadline.remaining().expect("budget left");
        assert!(left <= Duration::from_secs(300));

        let spent = Deadline {
            end: Instant::now(),
            budget: Duration::from_secs(300),
        };
        assert!(matches!(
            spent.remaining(),
            Err(ModelError::Timeout { seconds: 300 })
        ));
    }

    #[test]
    fn generate_url_strips_models_prefix() {
        assert_eq!(
            generate_content_url(DEFAULT_API_BASE, "models/gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            generate_content_url("http://localhost:9", "gemini-1.5-pro"),
            "http://localhost:9/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn rate_limit_maps_to_quota() {
        let error = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert_eq!(error.kind(), "quota");

        let error = status_error(StatusCode::BAD_GATEWAY, String::new());
        assert!(matches!(error, ModelError::Service { status: 502, .. }));
    }

    #[test]
    fn request_body_uses_file_data_and_temperature() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: "prompt" },
                    Part::File {
                        file_data: FileData {
                            mime_type: "application/pdf",
                            file_uri: "https://files/abc",
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(value["generationConfig"]["temperature"], 0.1);
        assert_eq!(value["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(
            value["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://files/abc"
        );
    }

    #[test]
    fn response_text_and_usage_are_collected() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [{"content": {"parts": [{"text": "[{\"a\""}, {"text": ": 1}]"}]}}],
                "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 80, "totalTokenCount": 1280}
            }"#,
        )
        .expect("response should deserialize");

        let response = model_response(response).expect("text present");
        assert_eq!(response.text, "[{\"a\": 1}]");
        assert_eq!(response.prompt_tokens, 1200);
        assert_eq!(response.completion_tokens, 80);
    }

    #[test]
    fn blank_candidates_are_an_empty_response() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"content": {"parts": [{"text": "  "}]}}]}"#)
                .expect("response should deserialize");
        assert!(matches!(
            model_response(response),
            Err(ModelError::EmptyResponse)
        ));
    }

    #[test]
    fn remote_file_state_checks() {
        let file: RemoteFile = serde_json::from_str(
            r#"{"name": "files/abc", "uri": "https://files/abc", "state": "PROCESSING", "mimeType": "application/pdf"}"#,
        )
        .expect("file should deserialize");
        assert!(file.is_processing());
        assert!(!file.is_failed());
    }
}
