use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{init_database, init_settings_database};
use crate::error::{Result, StorageError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

/// Filesystem metadata for one archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub name: String,
    pub size_bytes: u64,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

/// Owns the working database file, the settings database, and the archives
/// directory. Archive operations are wholesale file copies serialised by one
/// process-wide lock; the working database is always the single source of
/// truth.
pub struct DatabaseManager {
    working_db: PathBuf,
    settings_db: PathBuf,
    archives_dir: PathBuf,
    archive_lock: Mutex<()>,
}

impl DatabaseManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let archives_dir = data_dir.join("archives");
        std::fs::create_dir_all(&archives_dir)?;

        let manager = Self {
            working_db: data_dir.join("working.db"),
            settings_db: data_dir.join("settings.db"),
            archives_dir,
            archive_lock: Mutex::new(()),
        };
        manager.ensure_working_db()?;
        manager.ensure_settings_db()?;
        Ok(manager)
    }

    fn ensure_working_db(&self) -> Result<()> {
        if !self.working_db.exists() {
            info!(path = %self.working_db.display(), "initialising working database");
        }
        let conn = self.open(&self.working_db)?;
        init_database(&conn)?;
        Ok(())
    }

    fn ensure_settings_db(&self) -> Result<()> {
        let conn = self.open(&self.settings_db)?;
        init_settings_database(&conn)?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Open a short-lived connection to the working database.
    pub fn connection(&self) -> Result<Connection> {
        if !self.working_db.exists() {
            self.ensure_working_db()?;
        }
        self.open(&self.working_db)
    }

    /// Open a short-lived connection to the settings database.
    pub fn settings_connection(&self) -> Result<Connection> {
        self.open(&self.settings_db)
    }

    /// Run `f` against a fresh working-database connection, retrying with a
    /// short backoff when SQLite reports lock contention. Logical errors are
    /// never retried.
    pub fn with_conn<R>(&self, f: impl Fn(&mut Connection) -> rusqlite::Result<R>) -> Result<R> {
        let mut attempt = 1;
        loop {
            let mut conn = self.connection()?;
            match f(&mut conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_locked(&e) && attempt < MAX_RETRIES => {
                    warn!(attempt, max = MAX_RETRIES, "database locked, retrying");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Same retry discipline against the settings database.
    pub fn with_settings_conn<R>(
        &self,
        f: impl Fn(&mut Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let mut attempt = 1;
        loop {
            let mut conn = self.settings_connection()?;
            match f(&mut conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_locked(&e) && attempt < MAX_RETRIES => {
                    warn!(attempt, max = MAX_RETRIES, "settings database locked, retrying");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn archive_path(&self, name: &str) -> Result<PathBuf> {
        let sanitized = sanitize_filename(name);
        if sanitized.is_empty() {
            return Err(StorageError::Archive("archive name cannot be empty".to_string()));
        }
        Ok(self.archives_dir.join(format!("{sanitized}.db")))
    }

    /// Copy the working database into a new named archive.
    pub fn create_archive(&self, name: &str) -> Result<String> {
        let _guard = self.archive_lock.lock().unwrap();
        let path = self.archive_path(name)?;
        if path.exists() {
            return Err(StorageError::Archive(format!("archive '{name}' already exists")));
        }
        std::fs::copy(&self.working_db, &path)?;
        info!(name, path = %path.display(), "created archive from working database");
        Ok(stem_of(&path))
    }

    /// Create a new archive containing only an initialised empty schema.
    pub fn create_empty_archive(&self, name: &str) -> Result<String> {
        let _guard = self.archive_lock.lock().unwrap();
        let path = self.archive_path(name)?;
        if path.exists() {
            return Err(StorageError::Archive(format!("archive '{name}' already exists")));
        }
        let conn = self.open(&path)?;
        if let Err(e) = init_database(&conn) {
            drop(conn);
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        info!(name, "created empty archive");
        Ok(stem_of(&path))
    }

    /// Replace (or create) an archive with the current working database.
    pub fn overwrite_archive(&self, name: &str) -> Result<String> {
        let _guard = self.archive_lock.lock().unwrap();
        let path = self.archive_path(name)?;
        std::fs::copy(&self.working_db, &path)?;
        info!(name, "overwrote archive with working database");
        Ok(stem_of(&path))
    }

    /// Delete an archive file.
    pub fn delete_archive(&self, name: &str) -> Result<()> {
        let _guard = self.archive_lock.lock().unwrap();
        let path = self.archive_path(name)?;
        if !path.exists() {
            return Err(StorageError::NotFound(format!("archive '{name}'")));
        }
        std::fs::remove_file(&path)?;
        info!(name, "deleted archive");
        Ok(())
    }

    /// Copy an archive over the working database. The caller is expected to
    /// trigger a full search reindex afterwards.
    pub fn load_archive(&self, name: &str) -> Result<()> {
        let _guard = self.archive_lock.lock().unwrap();
        let path = self.archive_path(name)?;
        if !path.exists() {
            return Err(StorageError::NotFound(format!("archive '{name}'")));
        }
        std::fs::copy(&path, &self.working_db)?;
        info!(name, "loaded archive into working database");
        Ok(())
    }

    /// Recreate an empty working database.
    pub fn reset_working(&self) -> Result<()> {
        let _guard = self.archive_lock.lock().unwrap();
        if self.working_db.exists() {
            std::fs::remove_file(&self.working_db)?;
        }
        self.ensure_working_db()?;
        info!("reset working database");
        Ok(())
    }

    /// List archives by filesystem scan, newest modification first.
    pub fn list_archives(&self) -> Result<Vec<ArchiveInfo>> {
        let _guard = self.archive_lock.lock().unwrap();
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(&self.archives_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let metadata = entry.metadata()?;
            archives.push(ArchiveInfo {
                name: stem_of(&path),
                size_bytes: metadata.len(),
                created_at: metadata.created().ok().map(format_system_time),
                modified_at: metadata.modified().ok().map(format_system_time),
            });
        }
        archives.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(archives)
    }

    /// Next free `default_<n>` archive name.
    pub fn generate_default_archive_name(&self) -> Result<String> {
        let existing: Vec<String> = self.list_archives()?.into_iter().map(|a| a.name).collect();
        let mut counter = 1;
        loop {
            let candidate = format!("default_{counter}");
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
            counter += 1;
        }
    }
}

fn is_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.'))
        .collect::<String>()
        .replace(' ', "_")
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn format_system_time(t: std::time::SystemTime) -> String {
    chrono::DateTime::<chrono::Local>::from(t)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, DatabaseManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(dir.path()).unwrap();
        (dir, manager)
    }

    #[test]
    fn create_and_list_archive() {
        let (_dir, manager) = manager();
        manager.create_archive("save one").unwrap();
        let archives = manager.list_archives().unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name, "save_one");
        assert!(archives[0].size_bytes > 0);
    }

    #[test]
    fn duplicate_archive_rejected() {
        let (_dir, manager) = manager();
        manager.create_archive("a").unwrap();
        assert!(matches!(manager.create_archive("a"), Err(StorageError::Archive(_))));
    }

    #[test]
    fn load_replaces_working_content() {
        let (_dir, manager) = manager();
        // Snapshot the empty state, then write a row, then restore.
        manager.create_archive("empty").unwrap();
        manager
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO sessions (id, name) VALUES ('s1', 'Session s1')",
                    [],
                )
            })
            .unwrap();
        manager.load_archive("empty").unwrap();
        let count: i64 = manager
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn delete_missing_archive_is_not_found() {
        let (_dir, manager) = manager();
        assert!(matches!(
            manager.delete_archive("ghost"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn default_archive_names_increment() {
        let (_dir, manager) = manager();
        assert_eq!(manager.generate_default_archive_name().unwrap(), "default_1");
        manager.create_archive("default_1").unwrap();
        assert_eq!(manager.generate_default_archive_name().unwrap(), "default_2");
    }
}
