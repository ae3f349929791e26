use super::model::{AuthProvider, Credential, CredentialStatus};
use crate::database::{self, conversion_error, from_millis, now_millis, SharedConnection};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    provider TEXT NOT NULL,
    provider_user_id TEXT,
    status TEXT NOT NULL,
    failed_login_attempts INTEGER NOT NULL DEFAULT 0,
    last_login_at INTEGER,
    password_reset_token TEXT,
    password_reset_expires INTEGER,
    token_version INTEGER NOT NULL DEFAULT 0,
    tokens_revoked_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_credentials_user_id ON credentials(user_id);
CREATE INDEX IF NOT EXISTS idx_credentials_provider_identity
    ON credentials(provider, provider_user_id);
CREATE INDEX IF NOT EXISTS idx_credentials_reset_token ON credentials(password_reset_token);
";

const SELECT_COLUMNS: &str = "SELECT id, user_id, email, password_hash, first_name, last_name,
        provider, provider_user_id, status, failed_login_attempts, last_login_at,
        password_reset_token, password_reset_expires, token_version, tokens_revoked_at,
        created_at, updated_at
     FROM credentials";

/// SQLite persistence for login credentials
#[derive(Clone)]
pub struct CredentialStore {
    conn: SharedConnection,
}

impl CredentialStore {
    pub fn new(conn: SharedConnection) -> Result<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(database::open_in_memory()?)
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = database::lock(&self.conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or replace the row; stamps `updated_at`
    pub fn save(&self, credential: &mut Credential) -> Result<()> {
        credential.updated_at = now_millis();
        let conn = database::lock(&self.conn)?;
        conn.execute(
            "INSERT INTO credentials (
                id, user_id, email, password_hash, first_name, last_name, provider,
                provider_user_id, status, failed_login_attempts, last_login_at,
                password_reset_token, password_reset_expires, token_version,
                tokens_revoked_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                email = excluded.email,
                password_hash = excluded.password_hash,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                provider = excluded.provider,
                provider_user_id = excluded.provider_user_id,
                status = excluded.status,
                failed_login_attempts = excluded.failed_login_attempts,
                last_login_at = excluded.last_login_at,
                password_reset_token = excluded.password_reset_token,
                password_reset_expires = excluded.password_reset_expires,
                token_version = excluded.token_version,
                tokens_revoked_at = excluded.tokens_revoked_at,
                updated_at = excluded.updated_at",
            params![
                credential.id.to_string(),
                credential.user_id,
                credential.email,
                credential.password_hash,
                credential.first_name,
                credential.last_name,
                credential.provider.as_str(),
                credential.provider_user_id,
                credential.status.as_str(),
                credential.failed_login_attempts,
                credential.last_login_at.map(|t| t.timestamp_millis()),
                credential.password_reset_token,
                credential.password_reset_expires.map(|t| t.timestamp_millis()),
                credential.token_version,
                credential.tokens_revoked_at.map(|t| t.timestamp_millis()),
                credential.created_at.timestamp_millis(),
                credential.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Count one wrong password, suspending at `max_attempts`. Returns the
    /// new count and status, or `None` when the credential is gone.
    pub fn record_failed_login(
        &self,
        id: &Uuid,
        max_attempts: u32,
    ) -> Result<Option<(u32, CredentialStatus)>> {
        let conn = database::lock(&self.conn)?;
        let outcome = conn
            .query_row(
                "UPDATE credentials SET
                    failed_login_attempts = failed_login_attempts + 1,
                    status = CASE WHEN failed_login_attempts + 1 >= ?2 THEN ?3 ELSE status END,
                    updated_at = ?4
                 WHERE id = ?1
                 RETURNING failed_login_attempts, status",
                params![
                    id.to_string(),
                    max_attempts,
                    CredentialStatus::Suspended.as_str(),
                    now_millis().timestamp_millis(),
                ],
                |row| {
                    let status: String = row.get(1)?;
                    Ok((
                        row.get::<_, u32>(0)?,
                        status.parse().map_err(|e| conversion_error(1, e))?,
                    ))
                },
            )
            .optional()?;
        Ok(outcome)
    }

    /// Reset the failure count and stamp `last_login_at`, only while the
    /// credential is still active. Returns the stored row when it applied.
    pub fn record_successful_login(&self, id: &Uuid) -> Result<Option<Credential>> {
        let conn = database::lock(&self.conn)?;
        let now = now_millis().timestamp_millis();
        let changed = conn.execute(
            "UPDATE credentials SET failed_login_attempts = 0, last_login_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = ?3",
            params![id.to_string(), now, CredentialStatus::Active.as_str()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        query_one(
            &conn,
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id.to_string()],
        )
    }

    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<Credential>> {
        self.find_one("WHERE id = ?1", params![id.to_string()])
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Credential>> {
        self.find_one("WHERE email = ?1", params![email])
    }

    pub fn find_by_email_and_provider(
        &self,
        email: &str,
        provider: AuthProvider,
    ) -> Result<Option<Credential>> {
        self.find_one(
            "WHERE email = ?1 AND provider = ?2",
            params![email, provider.as_str()],
        )
    }

    /// Oldest credential of a user
    pub fn find_by_user_id(&self, user_id: &str) -> Result<Option<Credential>> {
        self.find_one(
            "WHERE user_id = ?1 ORDER BY created_at ASC LIMIT 1",
            params![user_id],
        )
    }

    pub fn find_by_provider_identity(
        &self,
        provider: AuthProvider,
        provider_user_id: &str,
    ) -> Result<Option<Credential>> {
        self.find_one(
            "WHERE provider = ?1 AND provider_user_id = ?2",
            params![provider.as_str(), provider_user_id],
        )
    }

    pub fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<Credential>> {
        self.find_one("WHERE password_reset_token = ?1", params![token_hash])
    }

    pub fn count(&self) -> Result<u64> {
        let conn = database::lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn find_one<P: Params>(&self, where_sql: &str, params: P) -> Result<Option<Credential>> {
        let conn = database::lock(&self.conn)?;
        query_one(&conn, &format!("{} {}", SELECT_COLUMNS, where_sql), params)
    }
}

fn query_one<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<Credential>> {
    let credential = conn.query_row(sql, params, row_to_credential).optional()?;
    Ok(credential)
}

fn optional_millis(row: &Row, idx: usize) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    row.get::<_, Option<i64>>(idx)?.map(from_millis).transpose()
}

fn row_to_credential(row: &Row) -> rusqlite::Result<Credential> {
    let id: String = row.get(0)?;
    let provider: String = row.get(6)?;
    let status: String = row.get(8)?;

    Ok(Credential {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        provider: provider.parse().map_err(|e| conversion_error(6, e))?,
        provider_user_id: row.get(7)?,
        status: status.parse().map_err(|e| conversion_error(8, e))?,
        failed_login_attempts: row.get(9)?,
        last_login_at: optional_millis(row, 10)?,
        password_reset_token: row.get(11)?,
        password_reset_expires: optional_millis(row, 12)?,
        token_version: row.get(13)?,
        tokens_revoked_at: optional_millis(row, 14)?,
        created_at: from_millis(row.get(15)?)?,
        updated_at: from_millis(row.get(16)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_find() {
        let store = CredentialStore::open_in_memory().unwrap();
        let mut credential = Credential::new("user-1", "a@example.com", AuthProvider::Local);
        credential.password_hash = Some("$argon2id$stub".to_string());
        store.save(&mut credential).unwrap();

        let found = store.find_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(found.id, credential.id);
        assert_eq!(found.password_hash.as_deref(), Some("$argon2id$stub"));
        assert_eq!(found.status, CredentialStatus::Active);
        assert!(found.last_login_at.is_none());

        assert!(store.find_by_user_id("user-1").unwrap().is_some());
        assert!(store
            .find_by_email_and_provider("a@example.com", AuthProvider::Google)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_save_updates_in_place() {
        let store = CredentialStore::open_in_memory().unwrap();
        let mut credential = Credential::new("user-1", "a@example.com", AuthProvider::Google);
        credential.provider_user_id = Some("g-123".to_string());
        store.save(&mut credential).unwrap();

        credential.failed_login_attempts = 3;
        credential.status = CredentialStatus::Suspended;
        store.save(&mut credential).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let found = store
            .find_by_provider_identity(AuthProvider::Google, "g-123")
            .unwrap()
            .unwrap();
        assert_eq!(found.failed_login_attempts, 3);
        assert_eq!(found.status, CredentialStatus::Suspended);
    }

    #[test]
    fn test_failed_login_counter() {
        let store = CredentialStore::open_in_memory().unwrap();
        let mut credential = Credential::new("user-1", "a@example.com", AuthProvider::Local);
        store.save(&mut credential).unwrap();

        assert_eq!(
            store.record_failed_login(&credential.id, 2).unwrap(),
            Some((1, CredentialStatus::Active))
        );
        assert_eq!(
            store.record_failed_login(&credential.id, 2).unwrap(),
            Some((2, CredentialStatus::Suspended))
        );
        assert!(store.record_successful_login(&credential.id).unwrap().is_none());
        assert!(store.record_failed_login(&Uuid::new_v4(), 2).unwrap().is_none());

        let found = store.find_by_id(&credential.id).unwrap().unwrap();
        assert_eq!(found.failed_login_attempts, 2);
        assert!(found.last_login_at.is_none());
    }

    #[test]
    fn test_successful_login_resets_counter() {
        let store = CredentialStore::open_in_memory().unwrap();
        let mut credential = Credential::new("user-1", "a@example.com", AuthProvider::Local);
        store.save(&mut credential).unwrap();
        store.record_failed_login(&credential.id, 5).unwrap();

        let updated = store.record_successful_login(&credential.id).unwrap().unwrap();
        assert_eq!(updated.failed_login_attempts, 0);
        assert!(updated.last_login_at.is_some());
    }

    #[test]
    fn test_email_is_unique() {
        let store = CredentialStore::open_in_memory().unwrap();
        let mut first = Credential::new("user-1", "a@example.com", AuthProvider::Local);
        let mut second = Credential::new("user-2", "a@example.com", AuthProvider::Google);
        store.save(&mut first).unwrap();
        assert!(store.save(&mut second).is_err());
    }
}
