/// Error taxonomy for the gateway.
///
/// `NotFound` and `Connectivity` are surfaced to MCP callers as an `error`
/// field inside an otherwise ordinary JSON result, never as a protocol-level
/// failure. `AuthProvider` is recovered inside the refresher loop and only
/// reaches a caller through the `diagnose_vertex` tool.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing configuration: {0}")]
    ConfigurationMissing(&'static str),

    #[error("weaviate connection failed: {0}")]
    Connectivity(String),

    #[error("Collection '{0}' not found")]
    NotFound(String),

    #[error("vertex auth provider: {0}")]
    AuthProvider(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl GatewayError {
    pub fn connectivity(e: impl std::fmt::Display) -> Self {
        GatewayError::Connectivity(e.to_string())
    }

    pub fn auth(e: impl std::fmt::Display) -> Self {
        GatewayError::AuthProvider(e.to_string())
    }
}
