use std::sync::Arc;

use tracing::{info, warn};

use muse_clock::TimeProvider;
use muse_search::SearchService;
use muse_storage::{
    DatabaseManager, FrontendMessageRepository, KvRepository, MessageRepository, PeriodRepository,
    SessionClockRepository, SessionRepository,
};

use crate::docs::{kv_doc, message_doc, period_doc};

/// Injected service bundle shared by every memory instance and handler.
pub struct Stores {
    pub db: Arc<DatabaseManager>,
    pub clock: Arc<TimeProvider>,
    pub search: Arc<SearchService>,
    pub sessions: SessionRepository,
    pub messages: MessageRepository,
    pub periods: PeriodRepository,
    pub kv: KvRepository,
    pub session_clocks: SessionClockRepository,
    pub frontend: FrontendMessageRepository,
}

impl Stores {
    pub fn new(
        db: Arc<DatabaseManager>,
        clock: Arc<TimeProvider>,
        search: Arc<SearchService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionRepository::new(db.clone(), clock.clone()),
            messages: MessageRepository::new(db.clone(), clock.clone()),
            periods: PeriodRepository::new(db.clone(), clock.clone()),
            kv: KvRepository::new(db.clone(), clock.clone()),
            session_clocks: SessionClockRepository::new(db.clone(), clock.clone()),
            frontend: FrontendMessageRepository::new(db.clone(), clock.clone()),
            db,
            clock,
            search,
        })
    }

    /// Rebuild all three search indices from the working database. Invoked
    /// after an archive load or working reset; failures are logged only.
    pub async fn reindex_mirror(&self) {
        if !self.search.init().await {
            warn!("search mirror unavailable, skipping reindex");
            return;
        }
        let messages = match self.messages.all_rows() {
            Ok(rows) => rows
                .iter()
                .map(|(session_id, row)| message_doc(session_id, row))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to dump messages for reindex");
                Vec::new()
            }
        };
        let periods = match self.periods.all_rows() {
            Ok(rows) => rows.iter().map(period_doc).collect(),
            Err(e) => {
                warn!(error = %e, "failed to dump periods for reindex");
                Vec::new()
            }
        };
        let kv = match self.kv.all_rows() {
            Ok(rows) => rows.iter().map(kv_doc).collect(),
            Err(e) => {
                warn!(error = %e, "failed to dump kv for reindex");
                Vec::new()
            }
        };
        match self.search.reindex_all(messages, periods, kv).await {
            Ok(()) => info!("search mirror reindexed"),
            Err(e) => warn!(error = %e, "search reindex failed"),
        }
    }
}
