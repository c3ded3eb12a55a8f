use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::auth::credentials;
use crate::auth::headers::{self, PublishedHeaders};
use crate::auth::token::{ServiceAccountMinter, TokenSource};
use crate::config::VertexConfig;

/// Refresh this long before token expiry.
const REFRESH_MARGIN_SECS: i64 = 300;
/// Never refresh more often than this.
const REFRESH_FLOOR: Duration = Duration::from_secs(300);
/// Refresh interval when the expiry is unknown.
const REFRESH_DEFAULT: Duration = Duration::from_secs(55 * 60);
/// Fixed wait after a failed mint.
const MINT_BACKOFF: Duration = Duration::from_secs(60);

static STARTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherState {
    Disabled,
    Running,
}

impl RefresherState {
    pub fn is_running(&self) -> bool {
        matches!(self, RefresherState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefresherState::Disabled => "disabled",
            RefresherState::Running => "running",
        }
    }
}

/// How long to sleep before the next refresh cycle.
fn refresh_delay(now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Duration {
    match expires_at {
        None => REFRESH_DEFAULT,
        Some(expiry) => {
            let secs = (expiry - now).num_seconds() - REFRESH_MARGIN_SECS;
            REFRESH_FLOOR.max(Duration::from_secs(secs.max(0) as u64))
        }
    }
}

/// Start the background refresher if it is opted in and credentials resolve.
/// Runs at most once per process; every other outcome leaves it `Disabled`
/// for the process lifetime (logged, not fatal).
pub fn start(vertex: &VertexConfig, published: PublishedHeaders) -> RefresherState {
    if !vertex.token_refresh {
        log::info!("vertex token refresher disabled (VERTEX_TOKEN_REFRESH not set)");
        return RefresherState::Disabled;
    }
    if STARTED.swap(true, Ordering::SeqCst) {
        return RefresherState::Running;
    }
    let material = match credentials::resolve(vertex) {
        Ok(material) => material,
        Err(e) => {
            log::warn!("vertex token refresher disabled: {}", e);
            // Nothing was spawned; release the guard so the state stays
            // truthful for any later query.
            STARTED.store(false, Ordering::SeqCst);
            return RefresherState::Disabled;
        }
    };
    log::info!(
        "starting vertex token refresher (credentials from {}, project {:?})",
        material.source.as_str(),
        material.project_id()
    );
    let vertex = vertex.clone();
    tokio::spawn(async move {
        run(ServiceAccountMinter::new(material), vertex, published).await;
    });
    RefresherState::Running
}

/// The refresh loop. Mint, compose, publish, sleep until shortly before
/// expiry; on failure log and retry after a fixed backoff. This loop never
/// returns and never lets an error escape to tool callers.
async fn run(source: impl TokenSource, vertex: VertexConfig, published: PublishedHeaders) {
    loop {
        match headers::compose(&vertex, &source).await {
            Ok(composed) => {
                published.publish(composed.set);
                let delay = refresh_delay(Utc::now(), composed.expires_at);
                log::info!("vertex headers refreshed, next refresh in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!(
                    "vertex token refresh failed, retrying in {:?}: {}",
                    MINT_BACKOFF,
                    e
                );
                tokio::time::sleep(MINT_BACKOFF).await;
            }
        }
    }
}
