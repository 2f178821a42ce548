//! Encrypted SQLite storage: users, roles, ACLs, retained messages, and an
//! append-only audit log. Field-level encryption is an explicit
//! encrypt/decrypt pair around the columns that need it, invoked directly
//! from Rust rather than registered as SQL scalar functions.

use std::{fmt::Display, fs, path::Path};

use fernet::Fernet;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

#[derive(Debug)]
pub struct StorageError(String);

impl Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "storage error: {}", self.0)
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self(value.to_string())
    }
}

impl From<r2d2::Error> for StorageError {
    fn from(value: r2d2::Error) -> Self {
        Self(value.to_string())
    }
}

pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role_id: i64,
}

pub struct RetainedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
}

pub struct SessionLogEntry {
    pub client_id: String,
    pub topic: String,
    pub action: String,
    pub success: bool,
    pub details: String,
}

/// Pooled connection manager over a single SQLite file, with an attached
/// Fernet key for the columns the schema marks `ENCRYPTED`.
pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
    fernet: Fernet,
}

impl Storage {
    pub fn open(db_path: &Path, fernet_key_path: &Path) -> Result<Self, StorageError> {
        let fernet = Self::load_or_create_key(fernet_key_path)?;
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::new(manager).map_err(StorageError::from)?;
        let storage = Self { pool, fernet };
        storage.init_schema()?;
        Ok(storage)
    }

    fn load_or_create_key(key_path: &Path) -> Result<Fernet, StorageError> {
        let encoded = if key_path.exists() {
            fs::read_to_string(key_path).map_err(|err| StorageError(err.to_string()))?
        } else {
            let generated = Fernet::generate_key();
            fs::write(key_path, &generated).map_err(|err| StorageError(err.to_string()))?;
            generated
        };

        Fernet::new(encoded.trim())
            .ok_or_else(|| StorageError("malformed fernet key file".to_owned()))
    }

    fn encrypt(&self, plaintext: &str) -> String {
        self.fernet.encrypt(plaintext.as_bytes())
    }

    fn decrypt(&self, token: &str) -> Result<String, StorageError> {
        let bytes = self
            .fernet
            .decrypt(token)
            .map_err(|_| StorageError("could not decrypt stored field".to_owned()))?;
        String::from_utf8(bytes).map_err(|err| StorageError(err.to_string()))
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS roles (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT    UNIQUE NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT    NOT NULL,
                password_hash TEXT    NOT NULL,
                role_id       INTEGER NOT NULL,
                FOREIGN KEY(role_id) REFERENCES roles(id)
            );
            CREATE TABLE IF NOT EXISTS acls (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL,
                topic           TEXT    NOT NULL,
                can_publish     INTEGER NOT NULL DEFAULT 0,
                can_subscribe   INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(user_id) REFERENCES users(id)
            );
            CREATE TABLE IF NOT EXISTS retained_messages (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                topic     TEXT    NOT NULL UNIQUE,
                payload   TEXT,
                qos       INTEGER NOT NULL DEFAULT 0,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS logs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp  DATETIME DEFAULT CURRENT_TIMESTAMP,
                client_id  TEXT    NOT NULL,
                topic      TEXT    NOT NULL,
                action     TEXT    NOT NULL,
                success    INTEGER NOT NULL,
                details    TEXT
            );",
        )?;
        self.seed_roles(&conn)?;
        Ok(())
    }

    fn seed_roles(&self, conn: &rusqlite::Connection) -> Result<(), StorageError> {
        let mut stmt = conn.prepare("SELECT name FROM roles")?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for role in ["Admin", "Teacher", "Student"] {
            if !existing.iter().any(|name| name == role) {
                conn.execute("INSERT INTO roles(name) VALUES (?1)", params![role])?;
            }
        }
        Ok(())
    }

    /// `username` is stored encrypted at rest; because Fernet tokens are
    /// randomized per encryption, an equality `WHERE` clause can't find a
    /// matching row, so this scans the (small) users table and decrypts
    /// in process. See `DESIGN.md` for why this trades a table scan for
    /// field-level encryption rather than a deterministic-but-weaker scheme.
    pub fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, username, password_hash, role_id FROM users")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let encrypted_username: String = row.get(1)?;
            let password_hash: String = row.get(2)?;
            let role_id: i64 = row.get(3)?;
            if self.decrypt(&encrypted_username)? == username {
                return Ok(Some(UserRecord {
                    id,
                    username: username.to_owned(),
                    password_hash,
                    role_id,
                }));
            }
        }
        Ok(None)
    }

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role_id: i64,
    ) -> Result<i64, StorageError> {
        let conn = self.pool.get()?;
        let encrypted_username = self.encrypt(username);
        conn.execute(
            "INSERT INTO users(username, password_hash, role_id) VALUES (?1, ?2, ?3)",
            params![encrypted_username, password_hash, role_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn role_id_by_name(&self, name: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM roles WHERE name = ?1")?;
        let mut rows = stmt.query(params![name])?;
        Ok(match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        })
    }

    /// ACL insert column order is `(user_id, topic, can_publish, can_subscribe)`
    /// throughout this crate.
    pub fn add_acl(
        &self,
        user_id: i64,
        topic: &str,
        can_publish: bool,
        can_subscribe: bool,
    ) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO acls(user_id, topic, can_publish, can_subscribe) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, topic, can_publish as i64, can_subscribe as i64],
        )?;
        Ok(())
    }

    pub fn acl_exact_match(
        &self,
        user_id: i64,
        topic: &str,
        want_subscribe: bool,
    ) -> Result<bool, StorageError> {
        let conn = self.pool.get()?;
        let column = if want_subscribe {
            "can_subscribe"
        } else {
            "can_publish"
        };
        let sql = format!("SELECT 1 FROM acls WHERE user_id = ?1 AND topic = ?2 AND {column} = 1");
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.exists(params![user_id, topic])?)
    }

    pub fn acl_prefix_like(&self, user_id: i64, prefix_like: &str) -> Result<bool, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM acls WHERE user_id = ?1 AND topic LIKE ?2 AND can_subscribe = 1",
        )?;
        Ok(stmt.exists(params![user_id, prefix_like])?)
    }

    pub fn publish_topics_for_user(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT topic FROM acls WHERE user_id = ?1 AND can_publish = 1")?;
        let topics = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(topics)
    }

    pub fn subscribe_topics_for_user(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT topic FROM acls WHERE user_id = ?1 AND can_subscribe = 1")?;
        let topics = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(topics)
    }

    pub fn put_retained(&self, topic: &str, payload: &str, qos: u8) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO retained_messages(topic, payload, qos) VALUES (?1, ?2, ?3)
             ON CONFLICT(topic) DO UPDATE SET payload = excluded.payload, qos = excluded.qos, timestamp = CURRENT_TIMESTAMP",
            params![topic, payload, qos as i64],
        )?;
        Ok(())
    }

    pub fn delete_retained(&self, topic: &str) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM retained_messages WHERE topic = ?1", params![topic])?;
        Ok(())
    }

    pub fn all_retained(&self) -> Result<Vec<RetainedMessage>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT topic, payload, qos FROM retained_messages")?;
        let messages = stmt
            .query_map([], |row| {
                Ok(RetainedMessage {
                    topic: row.get(0)?,
                    payload: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    qos: row.get::<_, i64>(2)? as u8,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(messages)
    }

    /// Best-effort: a logging failure is itself logged via the process
    /// logger by the caller and never propagated into the protocol path.
    pub fn append_log(&self, entry: &SessionLogEntry) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        let encrypted_details = self.encrypt(&entry.details);
        conn.execute(
            "INSERT INTO logs(client_id, topic, action, success, details) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.client_id,
                entry.topic,
                entry.action,
                entry.success as i64,
                encrypted_details
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use tempfile::tempdir;

    use super::*;

    fn open_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("t.db"), &dir.path().join("t.key")).unwrap();
        (dir, storage)
    }

    #[test]
    fn seeds_default_roles() {
        let (_dir, storage) = open_storage();
        for role in ["Admin", "Teacher", "Student"] {
            assert!(storage.role_id_by_name(role).unwrap().is_some());
        }
    }

    #[test]
    fn reopening_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        let key_path = dir.path().join("t.key");
        Storage::open(&db_path, &key_path).unwrap();
        // A second open against the same files must not fail on the
        // `CREATE TABLE` or re-seed duplicate roles.
        let storage = Storage::open(&db_path, &key_path).unwrap();
        let role_id = storage.role_id_by_name("Teacher").unwrap().unwrap();
        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles WHERE name = 'Teacher'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(role_id > 0);
    }

    #[test]
    fn username_is_not_stored_in_plaintext() {
        let (dir, storage) = open_storage();
        let role_id = storage.role_id_by_name("Student").unwrap().unwrap();
        storage.create_user("student1", "hash", role_id).unwrap();

        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let stored: String = conn
            .query_row("SELECT username FROM users LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_ne!(stored, "student1");

        let found = storage.find_user_by_username("student1").unwrap();
        assert_eq!(found.unwrap().username, "student1");
        assert!(storage.find_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn retained_upsert_replaces_prior_payload_for_same_topic() {
        let (_dir, storage) = open_storage();
        storage.put_retained("school/demo", "first", 0).unwrap();
        storage.put_retained("school/demo", "second", 0).unwrap();

        let all = storage.all_retained().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload, "second");
    }

    #[test]
    fn delete_retained_removes_the_topic() {
        let (_dir, storage) = open_storage();
        storage.put_retained("school/demo", "keep", 0).unwrap();
        storage.delete_retained("school/demo").unwrap();
        assert!(storage.all_retained().unwrap().is_empty());
    }

    #[test]
    fn acl_rules_are_stored_in_publish_can_publish_can_subscribe_order() {
        let (_dir, storage) = open_storage();
        let role_id = storage.role_id_by_name("Teacher").unwrap().unwrap();
        let user_id = storage.create_user("teacher1", "hash", role_id).unwrap();
        storage.add_acl(user_id, "school/#", true, false).unwrap();

        assert!(storage.acl_exact_match(user_id, "school/#", false).unwrap());
        assert!(!storage.acl_exact_match(user_id, "school/#", true).unwrap());
    }

    #[test]
    fn audit_log_entries_persist_with_encrypted_details() {
        let (dir, storage) = open_storage();
        storage
            .append_log(&SessionLogEntry {
                client_id: "sub0".to_owned(),
                topic: "school/demo".to_owned(),
                action: "SUBSCRIBE".to_owned(),
                success: false,
                details: "ACL denied".to_owned(),
            })
            .unwrap();

        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let (action, success, details): (String, i64, String) = conn
            .query_row(
                "SELECT action, success, details FROM logs LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(action, "SUBSCRIBE");
        assert_eq!(success, 0);
        assert_ne!(details, "ACL denied");
    }
}
