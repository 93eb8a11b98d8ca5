//! Account backend behind a trait so the websocket layer and the tests do
//! not care where users live. Production uses Postgres; tests inject a
//! canned implementation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// A user as stored in the account backend, before any per-connection
/// state is attached.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub color: String,
    pub home: String,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Verify credentials. `Ok(None)` means the username/password pair is
    /// wrong, errors mean the backend itself failed.
    async fn login(&self, username: &str, password: &str)
    -> Result<Option<UserRecord>, sqlx::Error>;

    /// Whether the user may enter the given room. Unknown rooms are open,
    /// they get created on first entry.
    async fn may_subscribe(&self, user: &UserRecord, room_id: &str) -> Result<bool, sqlx::Error>;
}

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

// ===== Postgres =====

pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, color, home FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stored: String = row.try_get("password_hash")?;
        if stored != sha256_hex(password) {
            return Ok(None);
        }
        Ok(Some(UserRecord {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            color: row.try_get("color")?,
            home: row.try_get("home")?,
        }))
    }

    async fn may_subscribe(&self, user: &UserRecord, room_id: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT private, owner FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            // Not persisted yet, anyone may enter and thereby create it.
            return Ok(true);
        };
        let private: bool = row.try_get("private")?;
        if !private {
            return Ok(true);
        }
        let owner: Option<Uuid> = row.try_get("owner")?;
        Ok(owner == Some(user.id))
    }
}

// ===== Test double =====
