use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use muse_clock::TimeProvider;
use muse_core::config::MuseConfig;
use muse_llm::LlmRegistry;
use muse_memory::Stores;
use muse_search::SearchService;
use muse_storage::{CharacterRepository, DatabaseManager, ModelRepository};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MuseConfig,
    pub db: Arc<DatabaseManager>,
    pub clock: Arc<TimeProvider>,
    pub search: Arc<SearchService>,
    pub stores: Arc<Stores>,
    pub llms: LlmRegistry,
    pub characters: CharacterRepository,
    pub models: ModelRepository,
}

impl AppState {
    pub fn new(
        config: MuseConfig,
        db: Arc<DatabaseManager>,
        clock: Arc<TimeProvider>,
        search: Arc<SearchService>,
        stores: Arc<Stores>,
    ) -> Self {
        Self {
            llms: LlmRegistry::new(config.clone()),
            characters: CharacterRepository::new(db.clone()),
            models: ModelRepository::new(db.clone()),
            config,
            db,
            clock,
            search,
            stores,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::chat::chat_completions),
        )
        .route(
            "/v1/flow/completions",
            post(crate::http::chat::flow_completions),
        )
        .route("/v1/sessions", get(crate::http::sessions::list_sessions))
        .route(
            "/v1/sessions/{session_id}",
            delete(crate::http::sessions::delete_session),
        )
        .route(
            "/v1/sessions/{session_id}/time",
            get(crate::http::time::get_session_time).put(crate::http::time::update_session_time),
        )
        .route(
            "/v1/sessions/{session_id}/time/seek",
            post(crate::http::time::seek_session_time),
        )
        .route(
            "/v1/sessions/{session_id}/time/nudge",
            post(crate::http::time::nudge_session_time),
        )
        .route(
            "/v1/sessions/{session_id}/time/speed",
            post(crate::http::time::set_session_time_speed),
        )
        .route(
            "/v1/archives",
            get(crate::http::archives::list_archives).post(crate::http::archives::create_archive),
        )
        .route(
            "/v1/archives/reset",
            post(crate::http::archives::reset_working),
        )
        .route(
            "/v1/archives/{name}",
            put(crate::http::archives::overwrite_archive)
                .delete(crate::http::archives::delete_archive),
        )
        .route(
            "/v1/archives/{name}/load",
            post(crate::http::archives::load_archive),
        )
        .route(
            "/v1/search/messages",
            post(crate::http::search::search_messages),
        )
        .route(
            "/v1/search/scenarios",
            post(crate::http::search::search_scenarios),
        )
        .route(
            "/v1/search/schedules",
            post(crate::http::search::search_schedules),
        )
        .route("/v1/memory/messages", get(crate::http::memory::get_messages))
        .route("/v1/memory/schedules", get(crate::http::memory::get_schedules))
        .route("/v1/memory/scenarios", get(crate::http::memory::get_scenarios))
        .route("/v1/memory/events", get(crate::http::memory::get_events))
        .route(
            "/v1/relations",
            get(crate::http::memory::list_relations).post(crate::http::memory::create_relation),
        )
        .route(
            "/v1/relations/{relation_id}",
            put(crate::http::memory::update_relation).delete(crate::http::memory::delete_relation),
        )
        .route(
            "/v1/characters",
            get(crate::http::characters::list_characters)
                .post(crate::http::characters::upsert_character),
        )
        .route(
            "/v1/characters/{character_id}",
            get(crate::http::characters::get_character)
                .delete(crate::http::characters::delete_character),
        )
        .route(
            "/v1/models",
            get(crate::http::models::list_models).post(crate::http::models::upsert_model),
        )
        .route(
            "/v1/models/{model_id}",
            get(crate::http::models::get_model).delete(crate::http::models::delete_model),
        )
        .route(
            "/v1/frontend-messages",
            get(crate::http::frontend::list_frontend_messages)
                .post(crate::http::frontend::upsert_frontend_message)
                .delete(crate::http::frontend::delete_frontend_messages),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
