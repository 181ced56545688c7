//! Meilisearch mirror of the persistence layer.
//!
//! Three indices (messages, periods, kv) are kept as a best-effort projection:
//! upserts retry a bounded number of times with a per-attempt timeout and
//! failures are logged, never propagated. When the daemon is unreachable the
//! memory facade falls back to SQL scans.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use muse_core::config::MeilisearchSettings;

pub const MESSAGES_INDEX: &str = "messages";
pub const PERIODS_INDEX: &str = "periods";
pub const KV_INDEX: &str = "kv";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const UPSERT_RETRIES: u32 = 2;
const REINDEX_CHUNK: usize = 500;
const STARTUP_PROBES: u32 = 20;
const STARTUP_PROBE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search daemon error ({status}): {message}")]
    Daemon { status: u16, message: String },

    #[error("Search daemon unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub q: String,
    pub filter: Option<String>,
    pub sort: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

pub struct SearchService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    available: AtomicBool,
    settings: MeilisearchSettings,
    /// A daemon process this service spawned itself; externally managed
    /// daemons never land here.
    daemon: Mutex<Option<Child>>,
}

impl SearchService {
    pub fn new(settings: &MeilisearchSettings) -> Self {
        let base_url = if settings.http_addr.starts_with("http") {
            settings.http_addr.clone()
        } else {
            format!("http://{}", settings.http_addr)
        };
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url,
            api_key: settings.api_key.clone(),
            available: AtomicBool::new(false),
            settings: settings.clone(),
            daemon: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Bring the mirror online: probe the configured address first, and when
    /// nothing is listening spawn the bundled daemon if `auto_start` is set,
    /// then poll until it answers. Returns whether the mirror is usable.
    pub async fn start(&self) -> bool {
        if self.init().await {
            return true;
        }
        if !self.settings.auto_start {
            return false;
        }
        let Some(executable) = self.settings.executable_path.clone() else {
            warn!("meilisearch auto_start set but no executable_path configured");
            return false;
        };

        let mut command = Command::new(&executable);
        command
            .arg("--http-addr")
            .arg(&self.settings.http_addr)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(db_path) = &self.settings.db_path {
            command.arg("--db-path").arg(db_path);
        }
        if let Some(key) = &self.api_key {
            command.arg("--master-key").arg(key);
        }

        match command.spawn() {
            Ok(child) => {
                info!(%executable, "spawned search daemon, waiting for readiness");
                *self.daemon.lock().await = Some(child);
            }
            Err(e) => {
                warn!(%executable, error = %e, "failed to spawn search daemon");
                return false;
            }
        }

        for _ in 0..STARTUP_PROBES {
            tokio::time::sleep(STARTUP_PROBE_DELAY).await;
            if self.init().await {
                return true;
            }
        }
        warn!("search daemon did not become ready in time");
        false
    }

    /// Kill a daemon this process spawned. A no-op for external daemons.
    pub async fn stop(&self) {
        if let Some(mut child) = self.daemon.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop search daemon");
            } else {
                info!("stopped search daemon");
            }
            self.available.store(false, Ordering::Relaxed);
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Probe the daemon and push index settings when reachable.
    pub async fn init(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                for (index, settings) in index_settings() {
                    if let Err(e) = self.push_settings(index, &settings).await {
                        warn!(index, error = %e, "failed to push index settings");
                    }
                }
                info!(base_url = %self.base_url, "search mirror online");
                true
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "search daemon unhealthy");
                self.available.store(false, Ordering::Relaxed);
                false
            }
            Err(e) => {
                debug!(error = %e, "search daemon unreachable");
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    async fn push_settings(&self, index: &str, settings: &Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/indexes/{index}/settings"))
            .json(settings)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Upsert documents with bounded retries. Errors are returned so the
    /// caller can decide to log them; they must never abort the primary write.
    pub async fn add_documents(&self, index: &str, documents: &[Value]) -> Result<()> {
        if !self.is_available() {
            return Err(SearchError::Unavailable);
        }
        if documents.is_empty() {
            return Ok(());
        }
        let mut last_error = None;
        for attempt in 1..=UPSERT_RETRIES {
            let result = self
                .request(reqwest::Method::POST, &format!("/indexes/{index}/documents"))
                .json(documents)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let message = resp.text().await.unwrap_or_default();
                    warn!(index, attempt, status, "search upsert rejected");
                    last_error = Some(SearchError::Daemon { status, message });
                }
                Err(e) => {
                    warn!(index, attempt, error = %e, "search upsert failed");
                    last_error = Some(e.into());
                }
            }
        }
        Err(last_error.unwrap_or(SearchError::Unavailable))
    }

    pub async fn add_document(&self, index: &str, document: Value) -> Result<()> {
        self.add_documents(index, std::slice::from_ref(&document)).await
    }

    pub async fn delete_document(&self, index: &str, document_id: &str) -> Result<()> {
        if !self.is_available() {
            return Err(SearchError::Unavailable);
        }
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/indexes/{index}/documents/{document_id}"),
            )
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Delete every mirrored document belonging to one session.
    pub async fn delete_by_session(&self, index: &str, session_id: &str) -> Result<()> {
        if !self.is_available() {
            return Err(SearchError::Unavailable);
        }
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{index}/documents/delete"),
            )
            .json(&json!({ "filter": format!("session_id = '{session_id}'") }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn clear_index(&self, index: &str) -> Result<()> {
        if !self.is_available() {
            return Err(SearchError::Unavailable);
        }
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/indexes/{index}/documents"))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<Value>> {
        if !self.is_available() {
            return Err(SearchError::Unavailable);
        }
        let mut body = json!({
            "q": query.q,
            "limit": query.limit,
            "offset": query.offset,
        });
        if let Some(filter) = &query.filter {
            body["filter"] = json!(filter);
        }
        if !query.sort.is_empty() {
            body["sort"] = json!(query.sort);
        }
        let resp = self
            .request(reqwest::Method::POST, &format!("/indexes/{index}/search"))
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let payload: Value = resp.json().await?;
        Ok(payload
            .get("hits")
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Full rebuild after an archive load: wipe all three indices and replay
    /// the given documents in fixed-size chunks.
    pub async fn reindex_all(
        &self,
        messages: Vec<Value>,
        periods: Vec<Value>,
        kv: Vec<Value>,
    ) -> Result<()> {
        for (index, documents) in [
            (MESSAGES_INDEX, messages),
            (PERIODS_INDEX, periods),
            (KV_INDEX, kv),
        ] {
            self.clear_index(index).await?;
            for chunk in documents.chunks(REINDEX_CHUNK) {
                self.add_documents(index, chunk).await?;
            }
            info!(index, "reindex complete");
        }
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(SearchError::Daemon { status, message })
    }
}

fn index_settings() -> Vec<(&'static str, Value)> {
    vec![
        (
            MESSAGES_INDEX,
            json!({
                "searchableAttributes": ["content", "role", "session_id", "tool_name", "speaker"],
                "filterableAttributes": [
                    "session_id", "role", "category", "created_at",
                    "tool_name", "speaker", "character_ids"
                ],
                "sortableAttributes": ["created_at", "id"],
            }),
        ),
        (
            PERIODS_INDEX,
            json!({
                "searchableAttributes": ["content", "title"],
                "filterableAttributes": ["session_id", "period_id", "period_type", "character_id"],
                "sortableAttributes": ["start_at", "end_at", "created_at"],
            }),
        ),
        (
            KV_INDEX,
            json!({
                "searchableAttributes": ["key", "metadata"],
                "filterableAttributes": ["session_id", "key", "key_type", "character_id"],
                "sortableAttributes": ["created_at", "updated_at"],
            }),
        ),
    ]
}

/// Build the filter expression for message searches: session scope, optional
/// category, optional character visibility (all-visible rows carry an empty
/// `character_ids` array, which the filter admits via IS EMPTY).
pub fn message_filter(
    session_id: &str,
    category: Option<i64>,
    character_id: Option<&str>,
) -> String {
    let mut parts = vec![format!("session_id = '{session_id}'")];
    if let Some(category) = category {
        parts.push(format!("category = {category}"));
    }
    if let Some(character_id) = character_id {
        parts.push(format!(
            "(character_ids IS EMPTY OR character_ids = '{character_id}')"
        ));
    }
    parts.join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_filter_shapes() {
        assert_eq!(message_filter("s1", None, None), "session_id = 's1'");
        assert_eq!(
            message_filter("s1", Some(1), None),
            "session_id = 's1' AND category = 1"
        );
        assert_eq!(
            message_filter("s1", Some(2), Some("char-a")),
            "session_id = 's1' AND category = 2 AND (character_ids IS EMPTY OR character_ids = 'char-a')"
        );
    }

    #[tokio::test]
    async fn unavailable_daemon_reports_unavailable() {
        let settings = MeilisearchSettings {
            executable_path: None,
            db_path: None,
            http_addr: "127.0.0.1:1".to_string(),
            api_key: None,
            auto_start: false,
        };
        let service = SearchService::new(&settings);
        assert!(!service.init().await);
        assert!(matches!(
            service.add_document(MESSAGES_INDEX, serde_json::json!({"id": 1})).await,
            Err(SearchError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn start_without_auto_start_does_not_spawn() {
        let settings = MeilisearchSettings {
            executable_path: Some("/does/not/exist/meilisearch".to_string()),
            db_path: None,
            http_addr: "127.0.0.1:1".to_string(),
            api_key: None,
            auto_start: false,
        };
        let service = SearchService::new(&settings);
        assert!(!service.start().await);
        assert!(service.daemon.lock().await.is_none());
    }

    #[tokio::test]
    async fn auto_start_requires_an_executable_path() {
        let settings = MeilisearchSettings {
            executable_path: None,
            db_path: None,
            http_addr: "127.0.0.1:1".to_string(),
            api_key: None,
            auto_start: true,
        };
        let service = SearchService::new(&settings);
        assert!(!service.start().await);
        assert!(service.daemon.lock().await.is_none());
    }

    #[tokio::test]
    async fn stop_without_spawned_daemon_is_a_no_op() {
        let service = SearchService::new(&MeilisearchSettings::default());
        service.stop().await;
        assert!(service.daemon.lock().await.is_none());
    }
}
