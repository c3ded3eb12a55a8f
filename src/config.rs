use crate::error::GatewayError;

/// Vertex-side configuration. None of these are required: without them the
/// gateway still serves every plain Weaviate tool.
#[derive(Debug, Clone, Default)]
pub struct VertexConfig {
    /// Inline service-account JSON (`VERTEX_CREDENTIALS_JSON`).
    pub credentials_json: Option<String>,
    /// Path to a service-account JSON file (`GOOGLE_APPLICATION_CREDENTIALS`).
    pub credentials_file: Option<String>,
    /// Static API key; takes precedence over minted tokens.
    pub api_key: Option<String>,
    pub region: String,
    /// Opt-in flag for the background token refresher.
    pub token_refresh: bool,
}

impl VertexConfig {
    /// True when any credential source is configured at all.
    pub fn any_credentials(&self) -> bool {
        self.api_key.is_some()
            || self.credentials_json.is_some()
            || self.credentials_file.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub weaviate_url: String,
    pub weaviate_api_key: String,
    pub vertex: VertexConfig,
    pub port: u16,
    pub mcp_path: String,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, GatewayError> {
        let weaviate_url = env_opt("WEAVIATE_CLUSTER_URL")
            .or_else(|| env_opt("WEAVIATE_URL"))
            .ok_or(GatewayError::ConfigurationMissing(
                "WEAVIATE_URL or WEAVIATE_CLUSTER_URL",
            ))?;
        let weaviate_api_key = env_opt("WEAVIATE_API_KEY")
            .ok_or(GatewayError::ConfigurationMissing("WEAVIATE_API_KEY"))?;

        let port = match env_opt("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| GatewayError::ConfigurationMissing("PORT (not a number)"))?,
            None => 10000,
        };

        let vertex = VertexConfig {
            credentials_json: env_opt("VERTEX_CREDENTIALS_JSON"),
            credentials_file: env_opt("GOOGLE_APPLICATION_CREDENTIALS"),
            api_key: env_opt("VERTEX_API_KEY"),
            region: env_opt("VERTEX_REGION").unwrap_or_else(|| "us-central1".to_string()),
            token_refresh: matches!(
                env_opt("VERTEX_TOKEN_REFRESH").as_deref(),
                Some("1") | Some("true") | Some("yes")
            ),
        };

        Ok(Config {
            weaviate_url,
            weaviate_api_key,
            vertex,
            port,
            mcp_path: env_opt("MCP_PATH").unwrap_or_else(|| "/mcp".to_string()),
        })
    }

    /// Cluster URL with a scheme; Weaviate Cloud consoles hand out bare hosts.
    pub fn weaviate_base_url(&self) -> String {
        let url = self.weaviate_url.trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }
}
