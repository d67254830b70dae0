//! Inference backend seam.
//!
//! Model weights never live in this process. A [`CaptionBackend`] loads a
//! vision-language model and turns (image, prompt) into generated text; the
//! default implementation talks to a local inference server over HTTP.
//!
//! ## Server API
//!
//! - `/health`      server health check
//! - `/api/devices` CUDA and bitsandbytes availability
//! - `/api/load`    load a model on a device
//! - `/api/unload`  free the loaded model
//! - `/api/generate` caption one image

use super::models::ResolvedDevice;
use super::prompt::ModelType;
use super::settings::GenerationParameters;
use crate::config::{AppConfig, NetworkConfig};
use crate::{CaptionKitError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

fn net_err(msg: String) -> CaptionKitError {
    CaptionKitError::Network {
        message: msg,
        cause: None,
    }
}

/// What to load and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLoadRequest {
    /// Hub id or absolute local directory.
    pub model_id: String,
    pub model_type: ModelType,
    pub device: ResolvedDevice,
    pub load_in_4_bit: bool,
}

/// One image to caption with the currently loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub image_path: PathBuf,
    pub model_type: ModelType,
    /// Text passed to the processor with the image.
    pub text: String,
    /// CogVLM conversation template including the caption start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_prompt: Option<String>,
    /// Groups of alternative words, at least one of each group must appear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_words: Option<Vec<Vec<String>>>,
    pub generation_parameters: GenerationParameters,
}

/// Capabilities reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub cuda_available: bool,
    #[serde(default)]
    pub bitsandbytes_available: bool,
}

/// Executes captioning models.
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Whether the backend is reachable and ready.
    async fn health_check(&self) -> Result<bool>;

    async fn capabilities(&self) -> Result<DeviceCapabilities>;

    async fn cuda_available(&self) -> Result<bool> {
        Ok(self.capabilities().await?.cuda_available)
    }

    /// Whether 4-bit quantised loading is possible.
    async fn supports_4_bit(&self) -> Result<bool> {
        Ok(self.capabilities().await?.bitsandbytes_available)
    }

    async fn load_model(&self, request: &ModelLoadRequest) -> Result<()>;

    async fn unload_model(&self) -> Result<()>;

    /// Generate and decode text for one image.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
}

/// HTTP client for a running inference server.
pub struct RemoteCaptionBackend {
    base_url: String,
    client: reqwest::Client,
    /// Client with extended timeout for model loading.
    load_client: reqwest::Client,
    generate_client: reqwest::Client,
}

impl RemoteCaptionBackend {
    /// Create a client for `base_url`, or the default local server.
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(NetworkConfig::DEFAULT_INFERENCE_URL)
            .trim_end_matches('/')
            .to_string();

        let build = |timeout| {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(AppConfig::USER_AGENT)
                .build()
                .map_err(|e| net_err(format!("Failed to build HTTP client: {}", e)))
        };

        Ok(Self {
            client: build(NetworkConfig::REQUEST_TIMEOUT)?,
            load_client: build(NetworkConfig::MODEL_LOAD_TIMEOUT)?,
            generate_client: build(NetworkConfig::GENERATE_TIMEOUT)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body: String = response.text().await.unwrap_or_default();
        Err(CaptionKitError::Inference {
            message: format!("{} returned {}: {}", what, status, body),
        })
    }
}

#[async_trait]
impl CaptionBackend for RemoteCaptionBackend {
    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        debug!("Inference health check: {}", url);

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await.map_err(|e| {
                    net_err(format!("Failed to parse health response: {}", e))
                })?;
                Ok(health.status == "ok")
            }
            Ok(_) | Err(_) => Ok(false),
        }
    }

    async fn capabilities(&self) -> Result<DeviceCapabilities> {
        let url = format!("{}/api/devices", self.base_url);
        debug!("Querying inference devices from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            net_err(format!("Failed to connect to inference server at {}: {}", url, e))
        })?;
        let response = Self::check_status(response, "Devices API").await?;

        response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse devices response: {}", e)))
    }

    async fn load_model(&self, request: &ModelLoadRequest) -> Result<()> {
        let url = format!("{}/api/load", self.base_url);
        info!(
            "Loading {} on {} (4-bit: {})",
            request.model_id,
            request.device.as_server_str(),
            request.load_in_4_bit
        );

        let body = serde_json::json!({
            "model_id": request.model_id,
            "model_type": request.model_type,
            "device": request.device.as_server_str(),
            "load_in_4_bit": request.load_in_4_bit,
        });

        let response = self
            .load_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send load request: {}", e)))?;
        Self::check_status(response, "Load").await?;

        info!("Model {} loaded", request.model_id);
        Ok(())
    }

    async fn unload_model(&self) -> Result<()> {
        let url = format!("{}/api/unload", self.base_url);
        info!("Unloading captioning model");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send unload request: {}", e)))?;
        Self::check_status(response, "Unload").await?;
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!("Generating caption for {}", request.image_path.display());

        let response = self
            .generate_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send generate request: {}", e)))?;
        let response = Self::check_status(response, "Generate").await?;

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse generate response: {}", e)))?;
        Ok(generated.generated_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nothing listens on port 9 (discard) in the test environment.
    const DEAD_URL: &str = "http://127.0.0.1:9";

    #[test]
    fn test_base_url_normalised() {
        let backend = RemoteCaptionBackend::new(Some("http://localhost:8400/")).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8400");
        let default = RemoteCaptionBackend::new(None).unwrap();
        assert_eq!(default.base_url(), NetworkConfig::DEFAULT_INFERENCE_URL);
    }

    #[tokio::test]
    async fn test_health_check_unreachable_is_false() {
        let backend = RemoteCaptionBackend::new(Some(DEAD_URL)).unwrap();
        assert!(!backend.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_unreachable_is_network_error() {
        let backend = RemoteCaptionBackend::new(Some(DEAD_URL)).unwrap();
        let request = ModelLoadRequest {
            model_id: "Salesforce/blip2-opt-2.7b".to_string(),
            model_type: ModelType::Other,
            device: ResolvedDevice::Cpu,
            load_in_4_bit: false,
        };
        let err = backend.load_model(&request).await.unwrap_err();
        assert!(matches!(err, CaptionKitError::Network { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_generation_request_wire_format() {
        let request = GenerationRequest {
            image_path: PathBuf::from("/data/cat.png"),
            model_type: ModelType::Cogvlm,
            text: "Describe".to_string(),
            conversation_prompt: Some("Question: Describe Answer:".to_string()),
            forced_words: None,
            generation_parameters: GenerationParameters::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model_type"], "cogvlm");
        assert_eq!(json["generation_parameters"]["max_new_tokens"], 100);
        assert!(json.get("forced_words").is_none());
    }

    #[test]
    fn test_capabilities_deserialization() {
        let caps: DeviceCapabilities = serde_json::from_str(r#"{"cuda_available": true}"#).unwrap();
        assert!(caps.cuda_available);
        assert!(!caps.bitsandbytes_available);
    }
}
