//! Settings-database repositories: characters and models live outside the
//! archive cycle so loading an archive never loses credentials.

use std::sync::Arc;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use muse_core::crypto::{decrypt_api_key, encrypt_api_key};

use crate::error::{Result, StorageError};
use crate::manager::DatabaseManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub character_id: String,
    pub name: String,
    #[serde(default)]
    pub roleplay_prompt: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Character metadata CRUD (settings DB) plus the working-DB upsert used when
/// a chat request carries character info.
pub struct CharacterRepository {
    db: Arc<DatabaseManager>,
}

impl CharacterRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, record: &CharacterRecord) -> Result<()> {
        self.db.with_settings_conn(|conn| {
            conn.execute(
                "INSERT INTO characters (character_id, name, roleplay_prompt, avatar)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(character_id) DO UPDATE SET
                   name = excluded.name,
                   roleplay_prompt = excluded.roleplay_prompt,
                   avatar = excluded.avatar,
                   updated_at = CURRENT_TIMESTAMP",
                params![record.character_id, record.name, record.roleplay_prompt, record.avatar],
            )?;
            Ok(())
        })
    }

    /// Record the character in the working DB so archives carry the cast that
    /// appeared in their conversations.
    pub fn upsert_into_archive(&self, record: &CharacterRecord) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO character (character_id, name, roleplay_prompt, avatar)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(character_id) DO UPDATE SET
                   name = excluded.name,
                   roleplay_prompt = excluded.roleplay_prompt,
                   avatar = excluded.avatar,
                   updated_at = CURRENT_TIMESTAMP",
                params![record.character_id, record.name, record.roleplay_prompt, record.avatar],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, character_id: &str) -> Result<Option<CharacterRecord>> {
        self.db
            .with_settings_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT character_id, name, roleplay_prompt, avatar
                     FROM characters WHERE character_id = ?1",
                )?;
                let mut rows = stmt.query_map(params![character_id], row_to_character)?;
                rows.next().transpose()
            })
            .map_err(Into::into)
    }

    pub fn list(&self) -> Result<Vec<CharacterRecord>> {
        self.db
            .with_settings_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT character_id, name, roleplay_prompt, avatar
                     FROM characters ORDER BY name ASC",
                )?;
                let rows = stmt.query_map([], row_to_character)?;
                rows.collect()
            })
            .map_err(Into::into)
    }

    pub fn delete(&self, character_id: &str) -> Result<bool> {
        self.db.with_settings_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM characters WHERE character_id = ?1",
                params![character_id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn row_to_character(row: &rusqlite::Row<'_>) -> rusqlite::Result<CharacterRecord> {
    Ok(CharacterRecord {
        character_id: row.get(0)?,
        name: row.get(1)?,
        roleplay_prompt: row.get(2)?,
        avatar: row.get(3)?,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// Plaintext in memory; enveloped at rest.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_api_type")]
    pub api_type: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    1.0
}

fn default_api_type() -> String {
    "openai".to_string()
}

/// Model metadata CRUD. API keys are sealed with the secret envelope before
/// they touch disk and unsealed on read.
pub struct ModelRepository {
    db: Arc<DatabaseManager>,
}

impl ModelRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, record: &ModelRecord) -> Result<()> {
        let sealed = encrypt_api_key(&record.api_key)
            .map_err(|e| StorageError::Archive(e.to_string()))?;
        self.db.with_settings_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO models (model_id, name, provider, model, base_url, api_key,
                                     max_tokens, temperature, api_type, is_default)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(model_id) DO UPDATE SET
                   name = excluded.name,
                   provider = excluded.provider,
                   model = excluded.model,
                   base_url = excluded.base_url,
                   api_key = excluded.api_key,
                   max_tokens = excluded.max_tokens,
                   temperature = excluded.temperature,
                   api_type = excluded.api_type,
                   is_default = excluded.is_default,
                   updated_at = CURRENT_TIMESTAMP",
                params![
                    record.model_id,
                    record.name,
                    record.provider,
                    record.model,
                    record.base_url,
                    sealed,
                    record.max_tokens,
                    record.temperature,
                    record.api_type,
                    record.is_default as i64,
                ],
            )?;
            if record.is_default {
                tx.execute(
                    "UPDATE models SET is_default = 0 WHERE model_id != ?1",
                    params![record.model_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get(&self, model_id: &str) -> Result<Option<ModelRecord>> {
        let row = self
            .db
            .with_settings_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_MODEL} WHERE model_id = ?1"
                ))?;
                let mut rows = stmt.query_map(params![model_id], row_to_model)?;
                rows.next().transpose()
            })?;
        row.map(unseal_model).transpose()
    }

    pub fn get_default(&self) -> Result<Option<ModelRecord>> {
        let row = self
            .db
            .with_settings_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_MODEL} WHERE is_default = 1 LIMIT 1"
                ))?;
                let mut rows = stmt.query_map([], row_to_model)?;
                rows.next().transpose()
            })?;
        row.map(unseal_model).transpose()
    }

    pub fn list(&self) -> Result<Vec<ModelRecord>> {
        let rows = self.db.with_settings_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_MODEL} ORDER BY name ASC"))?;
            let rows = stmt.query_map([], row_to_model)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        rows.into_iter().map(unseal_model).collect()
    }

    pub fn delete(&self, model_id: &str) -> Result<bool> {
        self.db.with_settings_conn(|conn| {
            let changed =
                conn.execute("DELETE FROM models WHERE model_id = ?1", params![model_id])?;
            Ok(changed > 0)
        })
    }
}

const SELECT_MODEL: &str =
    "SELECT model_id, name, provider, model, base_url, api_key, max_tokens, temperature, api_type, is_default
     FROM models";

fn row_to_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        model_id: row.get(0)?,
        name: row.get(1)?,
        provider: row.get(2)?,
        model: row.get(3)?,
        base_url: row.get(4)?,
        api_key: row.get(5)?,
        max_tokens: row.get::<_, i64>(6)? as u32,
        temperature: row.get(7)?,
        api_type: row.get(8)?,
        is_default: row.get::<_, i64>(9)? != 0,
    })
}

fn unseal_model(mut record: ModelRecord) -> Result<ModelRecord> {
    record.api_key =
        decrypt_api_key(&record.api_key).map_err(|e| StorageError::Archive(e.to_string()))?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<DatabaseManager>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        (dir, db)
    }

    #[test]
    fn model_api_key_is_enveloped_at_rest() {
        let (_dir, db) = setup();
        let repo = ModelRepository::new(db.clone());
        repo.upsert(&ModelRecord {
            model_id: "m1".to_string(),
            name: "GPT".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-plain".to_string(),
            max_tokens: 4096,
            temperature: 1.0,
            api_type: "openai".to_string(),
            is_default: true,
        })
        .unwrap();

        // Raw column must not contain the plaintext.
        let raw: String = db
            .with_settings_conn(|conn| {
                conn.query_row("SELECT api_key FROM models WHERE model_id = 'm1'", [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_ne!(raw, "sk-plain");

        let record = repo.get("m1").unwrap().unwrap();
        assert_eq!(record.api_key, "sk-plain");
        assert!(repo.get_default().unwrap().is_some());
    }

    #[test]
    fn only_one_default_model() {
        let (_dir, db) = setup();
        let repo = ModelRepository::new(db);
        for (id, default) in [("m1", true), ("m2", true)] {
            repo.upsert(&ModelRecord {
                model_id: id.to_string(),
                name: id.to_string(),
                provider: String::new(),
                model: "gpt-4o".to_string(),
                base_url: "https://example.test".to_string(),
                api_key: String::new(),
                max_tokens: 4096,
                temperature: 1.0,
                api_type: "openai".to_string(),
                is_default: default,
            })
            .unwrap();
        }
        let default = repo.get_default().unwrap().unwrap();
        assert_eq!(default.model_id, "m2");
    }

    #[test]
    fn character_crud() {
        let (_dir, db) = setup();
        let repo = CharacterRepository::new(db);
        repo.upsert(&CharacterRecord {
            character_id: "c1".to_string(),
            name: "Lina".to_string(),
            roleplay_prompt: Some("You are Lina.".to_string()),
            avatar: None,
        })
        .unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
        assert!(repo.get("c1").unwrap().is_some());
        assert!(repo.delete("c1").unwrap());
        assert!(repo.get("c1").unwrap().is_none());
    }
}
