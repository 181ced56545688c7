//! SQLite persistence for the Muse engine.
//!
//! One working database file serves all conversation-domain reads and writes;
//! named archives are wholesale file copies managed by [`DatabaseManager`].
//! A second settings database holds character and model metadata.

mod clock_repo;
mod db;
mod error;
mod frontend;
mod kv;
mod manager;
mod messages;
mod periods;
mod sessions;
mod settings;

pub use clock_repo::SessionClockRepository;
pub use db::{init_database, init_settings_database};
pub use error::{Result, StorageError};
pub use frontend::{FrontendMessage, FrontendMessageRepository};
pub use kv::{KvEntry, KvRepository};
pub use manager::{ArchiveInfo, DatabaseManager};
pub use messages::{MessageRepository, MessageRow};
pub use periods::{PeriodRepository, PeriodRow, PERIOD_TYPE_EVENT, PERIOD_TYPE_SCENARIO, PERIOD_TYPE_SCHEDULE};
pub use sessions::{SessionRepository, SessionRow};
pub use settings::{CharacterRecord, CharacterRepository, ModelRecord, ModelRepository};
