use serde_json::Value;

use crate::auth::credentials::{self, CredentialMaterial};
use crate::auth::token::{ServiceAccountMinter, TokenSource};
use crate::config::VertexConfig;
use crate::error::GatewayError;

/// The multimodal embedding model behind the image tools. Produces
/// 1408-dimensional vectors for both image and text inputs.
pub const MULTIMODAL_MODEL: &str = "multimodalembedding@001";

enum VertexAuth {
    /// Static API key, sent as `x-goog-api-key`.
    ApiKey(String),
    /// Minted bearer token.
    Bearer(String),
}

pub enum EmbeddingInput<'a> {
    ImageBase64(&'a str),
    Text(&'a str),
}

/// One-shot client for the Vertex prediction endpoint; built per tool
/// invocation, same as a database connection.
pub struct VertexEmbedder {
    http: reqwest::Client,
    region: String,
    project: String,
    auth: VertexAuth,
}

impl VertexEmbedder {
    /// Resolve credentials and auth for the configured mode. The project id
    /// always comes from the credential material; the static key only
    /// replaces the auth header.
    pub async fn for_config(vertex: &VertexConfig) -> Result<Self, GatewayError> {
        let material = credentials::resolve(vertex)?;
        let project = material
            .project_id()
            .ok_or_else(|| {
                GatewayError::AuthProvider("credentials carry no project id".to_string())
            })?
            .to_string();

        let auth = match &vertex.api_key {
            Some(key) => VertexAuth::ApiKey(key.clone()),
            None => {
                let token = ServiceAccountMinter::new(material).mint().await?;
                VertexAuth::Bearer(token.token)
            }
        };

        Ok(VertexEmbedder {
            http: reqwest::Client::new(),
            region: vertex.region.clone(),
            project,
            auth,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn predict_url(&self) -> String {
        format!(
            "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:predict",
            region = self.region,
            project = self.project,
            model = MULTIMODAL_MODEL,
        )
    }

    pub async fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>, GatewayError> {
        let instance = match input {
            EmbeddingInput::ImageBase64(b64) => {
                serde_json::json!({"image": {"bytesBase64Encoded": b64}})
            }
            EmbeddingInput::Text(text) => serde_json::json!({"text": text}),
        };

        let mut request = self
            .http
            .post(self.predict_url())
            .json(&serde_json::json!({"instances": [instance]}));
        request = match &self.auth {
            VertexAuth::ApiKey(key) => request.header("x-goog-api-key", key),
            VertexAuth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await.map_err(GatewayError::auth)?;
        let status = response.status();
        let body: Value = response.json().await.map_err(GatewayError::auth)?;
        if !status.is_success() {
            return Err(GatewayError::AuthProvider(format!(
                "vertex predict returned {}: {}",
                status, body
            )));
        }
        extract_embedding(&body)
    }
}

/// Pull the first prediction's embedding out of a predict response; image
/// and text inputs come back under different keys.
fn extract_embedding(body: &Value) -> Result<Vec<f32>, GatewayError> {
    let prediction = body
        .get("predictions")
        .and_then(|p| p.as_array())
        .and_then(|p| p.first())
        .ok_or_else(|| GatewayError::AuthProvider("vertex predict returned no predictions".into()))?;
    let values = prediction
        .get("imageEmbedding")
        .or_else(|| prediction.get("textEmbedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| GatewayError::AuthProvider("vertex prediction has no embedding".into()))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| GatewayError::AuthProvider("non-numeric embedding value".into()))
        })
        .collect()
}

/// Reference to the credential material for diagnostics, without minting.
pub fn describe_credentials(vertex: &VertexConfig) -> Result<CredentialMaterial, GatewayError> {
    credentials::resolve(vertex)
}
