use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::auth::token::{AccessToken, TokenSource};
use crate::config::VertexConfig;
use crate::error::GatewayError;

/// Legacy header names a static API key is published under on the REST
/// transport; older Weaviate module versions each read a different one.
pub const STATIC_KEY_REST_HEADERS: [&str; 4] = [
    "X-Goog-Api-Key",
    "X-Goog-Studio-Api-Key",
    "X-Google-Api-Key",
    "X-Palm-Api-Key",
];

/// Canonical header for a minted token, per transport casing.
pub const TOKEN_REST_HEADER: &str = "X-Goog-Vertex-Api-Key";
pub const TOKEN_RPC_HEADER: &str = "x-goog-vertex-api-key";

/// The rpc transport's own authorization metadata key. It carries the
/// Weaviate access key and this module must never write it.
pub const RPC_AUTHORIZATION_KEY: &str = "authorization";

/// Case-sensitive header maps for the two Weaviate transports. Rebuilt as a
/// whole on every refresh; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pub rest: BTreeMap<String, String>,
    pub rpc: BTreeMap<String, String>,
}

/// A composed set plus the expiry that should drive the next refresh.
/// Static keys do not expire.
#[derive(Debug, Clone)]
pub struct ComposedHeaders {
    pub set: HeaderSet,
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn compose_static(api_key: &str) -> HeaderSet {
    let mut set = HeaderSet::default();
    for name in STATIC_KEY_REST_HEADERS {
        set.rest.insert(name.to_string(), api_key.to_string());
        set.rpc.insert(name.to_lowercase(), api_key.to_string());
    }
    set
}

pub fn compose_bearer(token: &AccessToken) -> HeaderSet {
    let mut set = HeaderSet::default();
    set.rest
        .insert(TOKEN_REST_HEADER.to_string(), token.token.clone());
    set.rest.insert(
        "Authorization".to_string(),
        format!("Bearer {}", token.token),
    );
    // The rpc map carries the canonical key only. Its authorization slot
    // belongs to the Weaviate access key and is left alone.
    set.rpc
        .insert(TOKEN_RPC_HEADER.to_string(), token.token.clone());
    set
}

/// Compose the header set for the configured auth mode. A static API key
/// always wins and skips minting entirely; otherwise one token is minted
/// from `source`.
pub async fn compose(
    vertex: &VertexConfig,
    source: &dyn TokenSource,
) -> Result<ComposedHeaders, GatewayError> {
    if let Some(key) = &vertex.api_key {
        return Ok(ComposedHeaders {
            set: compose_static(key),
            expires_at: None,
        });
    }
    let token = source.mint().await?;
    Ok(ComposedHeaders {
        expires_at: Some(token.expires_at),
        set: compose_bearer(&token),
    })
}

/// Process-wide published header state. Written only by the background
/// refresher, read everywhere else; publishing swaps the whole `Arc` so a
/// reader sees either the old set or the new one, never a mix.
#[derive(Clone, Default)]
pub struct PublishedHeaders {
    inner: Arc<RwLock<Option<Arc<HeaderSet>>>>,
}

impl PublishedHeaders {
    pub fn publish(&self, set: HeaderSet) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(set));
    }

    pub fn latest(&self) -> Option<Arc<HeaderSet>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct CountingSource {
        pub mints: AtomicUsize,
        pub fail: bool,
    }

    impl CountingSource {
        pub(crate) fn new(fail: bool) -> Self {
            CountingSource {
                mints: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenSource for CountingSource {
        async fn mint(&self) -> Result<AccessToken, GatewayError> {
            self.mints.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::AuthProvider("unavailable".into()));
            }
            Ok(AccessToken {
                token: "ya29.minted".to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(3600),
            })
        }
    }

    #[tokio::test]
    async fn test_static_key_never_mints() {
        let vertex = VertexConfig {
            api_key: Some("AIza-static".to_string()),
            ..VertexConfig::default()
        };
        let source = CountingSource::new(false);
        let composed = compose(&vertex, &source).await.unwrap();

        assert_eq!(source.mints.load(Ordering::SeqCst), 0);
        assert!(composed.expires_at.is_none());
        for name in STATIC_KEY_REST_HEADERS {
            assert_eq!(composed.set.rest.get(name).map(String::as_str), Some("AIza-static"));
            assert_eq!(
                composed.set.rpc.get(&name.to_lowercase()).map(String::as_str),
                Some("AIza-static")
            );
        }
    }

    #[tokio::test]
    async fn test_token_path_headers() {
        let vertex = VertexConfig::default();
        let source = CountingSource::new(false);
        let composed = compose(&vertex, &source).await.unwrap();

        assert_eq!(source.mints.load(Ordering::SeqCst), 1);
        assert!(composed.expires_at.is_some());
        assert_eq!(
            composed.set.rest.get(TOKEN_REST_HEADER).map(String::as_str),
            Some("ya29.minted")
        );
        assert_eq!(
            composed.set.rest.get("Authorization").map(String::as_str),
            Some("Bearer ya29.minted")
        );
        assert_eq!(
            composed.set.rpc.get(TOKEN_RPC_HEADER).map(String::as_str),
            Some("ya29.minted")
        );
        // The rpc authorization slot is reserved for the database key.
        assert!(!composed.set.rpc.contains_key(RPC_AUTHORIZATION_KEY));
        assert_eq!(composed.set.rpc.len(), 1);
    }

    #[tokio::test]
    async fn test_mint_failure_propagates() {
        let source = CountingSource::new(true);
        let err = compose(&VertexConfig::default(), &source).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthProvider(_)));
    }

    fn marked_set(marker: usize) -> HeaderSet {
        let mut set = HeaderSet::default();
        for name in STATIC_KEY_REST_HEADERS {
            set.rest.insert(name.to_string(), marker.to_string());
            set.rpc.insert(name.to_lowercase(), marker.to_string());
        }
        set
    }

    #[test]
    fn test_publish_is_atomic() {
        let published = PublishedHeaders::default();
        published.publish(marked_set(0));

        let writer_state = published.clone();
        let writer = std::thread::spawn(move || {
            for marker in 1..500usize {
                writer_state.publish(marked_set(marker));
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = published.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let set = state.latest().unwrap();
                        // All entries in one snapshot carry the same marker.
                        let mut values = set.rest.values().chain(set.rpc.values());
                        let first = values.next().unwrap().clone();
                        assert!(values.all(|v| *v == first), "torn header set observed");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
