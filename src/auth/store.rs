//! Admin credential stores.
//!
//! Two sources:
//! - [`StaticCredentialStore`]: one username / hash pair from configuration
//! - [`SqliteCredentialStore`]: the `admins` table, which also records
//!   the time of each successful login

use super::password::is_phc_hash;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::path::Path;

/// Role every seeded admin gets unless told otherwise.
pub const ADMIN_ROLE: &str = "admin";

/// A stored admin credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    /// Argon2 PHC string.
    pub secret_hash: String,
    pub role: String,
    pub last_login: Option<DateTime<Utc>>,
}

/// Lookup of admin credentials by identifier.
pub trait CredentialStore: Send + Sync {
    fn find(&self, identifier: &str) -> Result<Option<Credential>>;

    /// Bookkeeping after a successful login. Sources without persistence
    /// may ignore it.
    fn record_login(&self, identifier: &str, at: DateTime<Utc>) -> Result<()>;
}

/// A single fixed credential, typically from `config.toml` or the environment.
#[derive(Debug, Clone)]
pub struct StaticCredentialStore {
    credential: Credential,
}

impl StaticCredentialStore {
    pub fn new(identifier: &str, secret_hash: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            bail!("Admin username cannot be empty");
        }
        if !is_phc_hash(secret_hash.trim()) {
            bail!("Admin password hash is not a PHC string (use `formdesk hash-password`)");
        }
        Ok(Self {
            credential: Credential {
                identifier: identifier.to_string(),
                secret_hash: secret_hash.trim().to_string(),
                role: ADMIN_ROLE.to_string(),
                last_login: None,
            },
        })
    }
}

impl CredentialStore for StaticCredentialStore {
    fn find(&self, identifier: &str) -> Result<Option<Credential>> {
        Ok(self
            .credential
            .identifier
            .eq_ignore_ascii_case(identifier.trim())
            .then(|| self.credential.clone()))
    }

    fn record_login(&self, _identifier: &str, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// SQLite-backed admin credentials.
pub struct SqliteCredentialStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential table in the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage dir: {}", parent.display()))?;
        }
        let conn = rusqlite::Connection::open(db_path)
            .with_context(|| format!("Failed to open credential DB: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS admins (
                username TEXT PRIMARY KEY COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'admin',
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );",
        )?;
        Ok(())
    }

    /// Add an admin. The hash must already be a PHC string.
    pub fn add(&self, username: &str, secret_hash: &str, role: &str) -> Result<()> {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            bail!("Username cannot be empty");
        }
        if trimmed.len() > 64 {
            bail!("Username too long (max 64 characters)");
        }
        if !is_phc_hash(secret_hash) {
            bail!("Password hash is not a PHC string");
        }

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO admins (username, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![trimmed, secret_hash, role, Utc::now().timestamp()],
        );

        match result {
            Ok(_) => {
                tracing::info!(username = trimmed, role, "Admin credential added");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Username '{}' is already taken", trimmed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count stored admins.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn find(&self, identifier: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT username, password_hash, role, last_login
                 FROM admins WHERE username = ?1",
                rusqlite::params![identifier.trim()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(identifier, secret_hash, role, last_login)| Credential {
            identifier,
            secret_hash,
            role,
            last_login: last_login.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }))
    }

    fn record_login(&self, identifier: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE admins SET last_login = ?1 WHERE username = ?2",
            rusqlite::params![at.timestamp(), identifier],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use tempfile::TempDir;

    #[test]
    fn static_store_matches_case_insensitively() {
        let hash = hash_password("pw").unwrap();
        let store = StaticCredentialStore::new(" Admin ", &hash).unwrap();

        let found = store.find("admin").unwrap().unwrap();
        assert_eq!(found.identifier, "Admin");
        assert_eq!(found.role, ADMIN_ROLE);
        assert!(store.find("someone").unwrap().is_none());
    }

    #[test]
    fn static_store_rejects_plaintext_secret() {
        let err = StaticCredentialStore::new("admin", "hunter2").unwrap_err();
        assert!(err.to_string().contains("PHC"));
    }

    #[test]
    fn sqlite_store_add_and_find() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        let hash = hash_password("pw").unwrap();
        store.add("root", &hash, ADMIN_ROLE).unwrap();

        let found = store.find("ROOT").unwrap().unwrap();
        assert_eq!(found.identifier, "root");
        assert_eq!(found.secret_hash, hash);
        assert!(found.last_login.is_none());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn sqlite_store_rejects_duplicates() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        let hash = hash_password("pw").unwrap();
        store.add("root", &hash, ADMIN_ROLE).unwrap();
        let err = store.add("Root", &hash, ADMIN_ROLE).unwrap_err();
        assert!(err.to_string().contains("already taken"));
    }

    #[test]
    fn sqlite_store_records_last_login() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("formdesk.db");
        let hash = hash_password("pw").unwrap();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.add("root", &hash, ADMIN_ROLE).unwrap();
            store.record_login("root", at).unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(store.find("root").unwrap().unwrap().last_login, Some(at));
    }

    #[test]
    fn sqlite_store_rejects_empty_username() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        let hash = hash_password("pw").unwrap();
        assert!(store.add("   ", &hash, ADMIN_ROLE).is_err());
    }
}
