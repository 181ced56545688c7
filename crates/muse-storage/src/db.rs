use rusqlite::Connection;

use crate::error::Result;

/// Initialise the working database schema. Safe to call on every startup.
pub fn init_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT,
            tool_calls      TEXT,
            tool_name       TEXT,
            speaker         TEXT,
            tool_call_id    TEXT,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            category        INTEGER DEFAULT 0,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session_id
            ON messages(session_id, created_at);

        CREATE TABLE IF NOT EXISTS period (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT NOT NULL,
            period_id       TEXT NOT NULL,
            period_type     TEXT NOT NULL,
            start_at        TIMESTAMP NOT NULL,
            end_at          TIMESTAMP NOT NULL,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            content         TEXT DEFAULT '',
            title           TEXT DEFAULT '',
            character_id    TEXT,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            UNIQUE(period_id)
        );
        CREATE INDEX IF NOT EXISTS idx_period_session_time
            ON period(session_id, start_at, end_at);
        CREATE INDEX IF NOT EXISTS idx_period_session_type
            ON period(session_id, period_type);

        CREATE TABLE IF NOT EXISTS character (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            character_id    TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            roleplay_prompt TEXT,
            avatar          TEXT,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS session_clock (
            session_id      TEXT PRIMARY KEY,
            virtual_base    TEXT,
            real_base       TEXT,
            actions         TEXT DEFAULT '[]',
            updated_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS kv (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT NOT NULL,
            key             TEXT NOT NULL,
            key_type        TEXT DEFAULT '',
            metadata        TEXT NOT NULL,
            character_id    TEXT,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            real_updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            UNIQUE(session_id, key)
        );
        CREATE INDEX IF NOT EXISTS idx_kv_session_key_type
            ON kv(session_id, key_type);

        CREATE TABLE IF NOT EXISTS message_characters (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   INTEGER NOT NULL,
            character_id TEXT NOT NULL,
            created_at   TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
            UNIQUE(message_id, character_id)
        );
        CREATE INDEX IF NOT EXISTS idx_message_characters_message_id
            ON message_characters(message_id);
        CREATE INDEX IF NOT EXISTS idx_message_characters_character_id
            ON message_characters(character_id);

        CREATE TABLE IF NOT EXISTS frontend_messages (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id        TEXT NOT NULL,
            client_message_id TEXT NOT NULL,
            role              TEXT NOT NULL,
            message_kind      TEXT NOT NULL DEFAULT 'text',
            content           TEXT NOT NULL DEFAULT '',
            tool_name         TEXT,
            tool_call_id      TEXT,
            input_mode        TEXT,
            character_id      TEXT,
            display_order     INTEGER NOT NULL DEFAULT 0,
            created_at        TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            UNIQUE(session_id, client_message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_frontend_messages_session_id
            ON frontend_messages(session_id, display_order, created_at);
        ",
    )?;
    Ok(())
}

/// Initialise the settings database (characters and models live here, outside
/// the archive cycle).
pub fn init_settings_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS characters (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            character_id    TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            roleplay_prompt TEXT,
            avatar          TEXT,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS models (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id    TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            provider    TEXT NOT NULL DEFAULT '',
            model       TEXT NOT NULL,
            base_url    TEXT NOT NULL,
            api_key     TEXT NOT NULL DEFAULT '',
            max_tokens  INTEGER NOT NULL DEFAULT 4096,
            temperature REAL NOT NULL DEFAULT 1.0,
            api_type    TEXT NOT NULL DEFAULT 'openai',
            is_default  INTEGER NOT NULL DEFAULT 0,
            created_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;
    Ok(())
}
