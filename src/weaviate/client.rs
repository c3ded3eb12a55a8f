use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::credentials;
use crate::auth::headers::{self, HeaderSet, PublishedHeaders};
use crate::auth::refresher::RefresherState;
use crate::auth::token::{ServiceAccountMinter, TokenSource};
use crate::config::Config;
use crate::error::GatewayError;

/// Capability interface for a session's outgoing rpc metadata store. The
/// factory depends on this instead of probing session internals; a session
/// type that has no such store supplies a sink that refuses inserts and the
/// connection is handed out in degraded mode.
pub trait MetadataSink: Send + Sync {
    fn contains(&self, key: &str) -> bool;
    fn insert(&mut self, key: &str, value: &str) -> Result<(), GatewayError>;
}

/// The standard metadata store: a plain map pre-seeded with the cluster's
/// own authorization entry.
pub struct GrpcMetadata {
    entries: BTreeMap<String, String>,
}

impl GrpcMetadata {
    pub fn with_authorization(access_key: &str) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            headers::RPC_AUTHORIZATION_KEY.to_string(),
            format!("Bearer {}", access_key),
        );
        GrpcMetadata { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl MetadataSink for GrpcMetadata {
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Copy the rpc header map into the sink, returning the keys actually
/// added. Pre-existing entries are never overwritten; in particular the
/// seeded authorization metadata survives every injection.
pub fn inject_rpc_metadata(
    sink: &mut dyn MetadataSink,
    rpc: &BTreeMap<String, String>,
) -> Result<Vec<String>, GatewayError> {
    let mut added = Vec::new();
    for (key, value) in rpc {
        if sink.contains(key) {
            log::debug!("rpc metadata key {} already present, keeping it", key);
            continue;
        }
        sink.insert(key, value)?;
        added.push(key.clone());
    }
    Ok(added)
}

type SinkFactory = Arc<dyn Fn(&str) -> Box<dyn MetadataSink> + Send + Sync>;

/// Opens one scoped `Connection` per tool invocation. Headers are snapshot
/// at open time; a later refresh publish only affects future connections.
#[derive(Clone)]
pub struct ConnectionFactory {
    config: Arc<Config>,
    published: PublishedHeaders,
    refresher: RefresherState,
    sink_factory: SinkFactory,
}

impl ConnectionFactory {
    pub fn new(config: Arc<Config>, published: PublishedHeaders, refresher: RefresherState) -> Self {
        ConnectionFactory {
            config,
            published,
            refresher,
            sink_factory: Arc::new(|access_key| {
                Box::new(GrpcMetadata::with_authorization(access_key)) as Box<dyn MetadataSink>
            }),
        }
    }

    /// Swap the metadata sink implementation; used when the session type
    /// cannot expose a metadata store.
    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    /// Vertex headers as of now: the latest published set while the
    /// refresher runs, otherwise composed on the spot. A composition
    /// failure degrades the connection instead of blocking the database
    /// path.
    async fn vertex_headers(&self) -> (Option<HeaderSet>, bool) {
        if self.refresher.is_running() {
            if let Some(set) = self.published.latest() {
                return (Some((*set).clone()), false);
            }
            // First publish has not landed yet; fall through and compose.
        }
        let vertex = &self.config.vertex;
        if let Some(key) = &vertex.api_key {
            return (Some(headers::compose_static(key)), false);
        }
        if vertex.credentials_json.is_none() && vertex.credentials_file.is_none() {
            return (None, false);
        }
        let composed = match credentials::resolve(vertex) {
            Ok(material) => ServiceAccountMinter::new(material)
                .mint()
                .await
                .map(|token| headers::compose_bearer(&token)),
            Err(e) => Err(e),
        };
        match composed {
            Ok(set) => (Some(set), false),
            Err(e) => {
                log::warn!("vertex headers unavailable, continuing without: {}", e);
                (None, true)
            }
        }
    }

    pub async fn open(&self) -> Result<Connection, GatewayError> {
        if self.config.weaviate_url.is_empty() || self.config.weaviate_api_key.is_empty() {
            return Err(GatewayError::Connectivity(
                "weaviate endpoint or access key not configured".to_string(),
            ));
        }

        let (vertex_headers, mut degraded) = self.vertex_headers().await;

        let mut header_map = HeaderMap::new();
        header_map.insert(
            reqwest::header::AUTHORIZATION,
            bearer_value(&self.config.weaviate_api_key)?,
        );
        if let Some(set) = &vertex_headers {
            for (name, value) in &set.rest {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(GatewayError::connectivity)?;
                let value = HeaderValue::from_str(value).map_err(GatewayError::connectivity)?;
                header_map.insert(name, value);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(GatewayError::connectivity)?;

        let mut metadata = (self.sink_factory)(&self.config.weaviate_api_key);
        if let Some(set) = &vertex_headers {
            match inject_rpc_metadata(metadata.as_mut(), &set.rpc) {
                Ok(added) => {
                    log::debug!("injected rpc metadata keys: {:?}", added);
                }
                Err(e) => {
                    log::warn!("rpc metadata injection skipped: {}", e);
                    degraded = true;
                }
            }
        }

        Ok(Connection {
            http,
            base_url: self.config.weaviate_base_url(),
            metadata,
            degraded,
        })
    }
}

fn bearer_value(key: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(&format!("Bearer {}", key)).map_err(GatewayError::connectivity)
}

/// A scoped session to the cluster, opened and dropped within one tool
/// invocation. Carries its own headers snapshot.
pub struct Connection {
    http: reqwest::Client,
    base_url: String,
    #[allow(dead_code)]
    metadata: Box<dyn MetadataSink>,
    degraded: bool,
}

impl Connection {
    /// True when an optional auth/header step was skipped at open time.
    /// Non-Vertex operations are unaffected.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub async fn is_ready(&self) -> Result<bool, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/.well-known/ready", self.base_url))
            .send()
            .await
            .map_err(GatewayError::connectivity)?;
        Ok(response.status().is_success())
    }

    /// Full cluster schema.
    pub async fn schema(&self) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/schema", self.base_url))
            .send()
            .await
            .map_err(GatewayError::connectivity)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Connectivity(format!(
                "schema request returned {}",
                status
            )));
        }
        response.json().await.map_err(GatewayError::connectivity)
    }

    /// Schema of one collection; `NotFound` when the cluster has no such
    /// class. Every handler validates through this before querying.
    pub async fn collection_schema(
        &self,
        collection: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/schema/{}", self.base_url, collection))
            .send()
            .await
            .map_err(GatewayError::connectivity)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(collection.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::Connectivity(format!(
                "schema request for '{}' returned {}",
                collection, status
            )));
        }
        response.json().await.map_err(GatewayError::connectivity)
    }

    /// Run one GraphQL query and return its `data` payload.
    pub async fn graphql(&self, query: &str) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/graphql", self.base_url))
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(GatewayError::connectivity)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Connectivity(format!(
                "graphql request returned {}",
                status
            )));
        }
        let mut body: serde_json::Value =
            response.json().await.map_err(GatewayError::connectivity)?;
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(GatewayError::Connectivity(format!(
                    "graphql error: {}",
                    message
                )));
            }
        }
        Ok(body.get_mut("data").map(serde_json::Value::take).unwrap_or_default())
    }

    /// Insert one object, optionally under a named target vector. Returns
    /// the object uuid.
    pub async fn insert_object(
        &self,
        collection: &str,
        properties: serde_json::Value,
        vector: &[f32],
        target_vector: Option<&str>,
    ) -> Result<String, GatewayError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut body = serde_json::json!({
            "class": collection,
            "id": id,
            "properties": properties,
        });
        match target_vector {
            Some(name) => {
                let mut vectors = serde_json::Map::new();
                vectors.insert(name.to_string(), serde_json::json!(vector));
                body["vectors"] = serde_json::Value::Object(vectors);
            }
            None => body["vector"] = serde_json::json!(vector),
        }

        let response = self
            .http
            .post(format!("{}/v1/objects", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::connectivity)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Connectivity(format!(
                "object insert returned {}: {}",
                status, detail
            )));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::headers::{RPC_AUTHORIZATION_KEY, TOKEN_RPC_HEADER};
    use crate::auth::token::AccessToken;
    use crate::config::VertexConfig;

    fn test_config(vertex: VertexConfig) -> Arc<Config> {
        Arc::new(Config {
            weaviate_url: "demo.weaviate.network".to_string(),
            weaviate_api_key: "wv-secret".to_string(),
            vertex,
            port: 10000,
            mcp_path: "/mcp".to_string(),
        })
    }

    fn bearer_token() -> AccessToken {
        AccessToken {
            token: "ya29.minted".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(3600),
        }
    }

    #[test]
    fn test_connection_is_shareable_across_tasks() {
        // Handlers hold a Connection across awaits inside Send futures.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Connection>();
    }

    #[test]
    fn test_injection_keeps_preexisting_authorization() {
        let mut sink = GrpcMetadata::with_authorization("wv-secret");
        let set = headers::compose_bearer(&bearer_token());

        let added = inject_rpc_metadata(&mut sink, &set.rpc).unwrap();

        assert_eq!(added, vec![TOKEN_RPC_HEADER.to_string()]);
        assert!(!added.iter().any(|k| k == RPC_AUTHORIZATION_KEY));
        assert_eq!(
            sink.entries().get(RPC_AUTHORIZATION_KEY).map(String::as_str),
            Some("Bearer wv-secret")
        );
    }

    struct RejectingSink;

    impl MetadataSink for RejectingSink {
        fn contains(&self, _key: &str) -> bool {
            false
        }

        fn insert(&mut self, _key: &str, _value: &str) -> Result<(), GatewayError> {
            Err(GatewayError::Connectivity(
                "session exposes no metadata store".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_open_with_static_key() {
        let config = test_config(VertexConfig {
            api_key: Some("AIza-static".to_string()),
            ..VertexConfig::default()
        });
        let factory =
            ConnectionFactory::new(config, PublishedHeaders::default(), RefresherState::Disabled);
        let conn = factory.open().await.unwrap();
        assert!(!conn.degraded());
    }

    #[tokio::test]
    async fn test_open_without_vertex_config() {
        let factory = ConnectionFactory::new(
            test_config(VertexConfig::default()),
            PublishedHeaders::default(),
            RefresherState::Disabled,
        );
        let conn = factory.open().await.unwrap();
        assert!(!conn.degraded());
    }

    #[tokio::test]
    async fn test_rejecting_sink_degrades_but_still_connects() {
        let config = test_config(VertexConfig {
            api_key: Some("AIza-static".to_string()),
            ..VertexConfig::default()
        });
        let factory =
            ConnectionFactory::new(config, PublishedHeaders::default(), RefresherState::Disabled)
                .with_sink_factory(Arc::new(|_| Box::new(RejectingSink) as Box<dyn MetadataSink>));
        let conn = factory.open().await.unwrap();
        assert!(conn.degraded());
    }

    #[tokio::test]
    async fn test_refresher_snapshot_is_used() {
        let published = PublishedHeaders::default();
        published.publish(headers::compose_bearer(&bearer_token()));
        let factory = ConnectionFactory::new(
            test_config(VertexConfig::default()),
            published,
            RefresherState::Running,
        );
        let conn = factory.open().await.unwrap();
        assert!(!conn.degraded());
        // The published snapshot reached the rpc metadata store.
        assert!(conn.metadata.contains(TOKEN_RPC_HEADER));
        assert!(conn.metadata.contains(RPC_AUTHORIZATION_KEY));
    }

    #[tokio::test]
    async fn test_unset_endpoint_is_a_connectivity_error() {
        let mut config = (*test_config(VertexConfig::default())).clone();
        config.weaviate_api_key = String::new();
        let factory = ConnectionFactory::new(
            Arc::new(config),
            PublishedHeaders::default(),
            RefresherState::Disabled,
        );
        let err = factory.open().await.err().unwrap();
        assert!(matches!(err, GatewayError::Connectivity(_)));
    }
}
