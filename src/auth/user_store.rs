//! User storage
//! Mission: control-API accounts backed by the same Postgres pool as the
//! rest of the platform, rather than a side SQLite file.

use crate::auth::models::{User, UserRole};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// User storage with a Postgres backend, sharing the platform's pool.
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    /// `ensure_default_admin` is split out from construction so the caller
    /// controls whether a fresh deployment gets a seeded admin account —
    /// useful in tests, where a blank user table is often what's wanted.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seeds a default admin account (`admin` / `admin123`) iff no admin
    /// exists yet. Deliberately loud about the insecure default — there is
    /// no recovery flow yet if an operator locks themselves out.
    pub async fn ensure_default_admin(&self) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM api_users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await
            .context("failed to check for admin users")?;

        if count > 0 {
            return Ok(());
        }

        let password_hash = hash("admin123", DEFAULT_COST).context("failed to hash password")?;
        sqlx::query(
            "INSERT INTO api_users (id, username, password_hash, role, created_at)
             VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(Uuid::new_v4())
        .bind("admin")
        .bind(password_hash)
        .bind(UserRole::Admin.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to insert default admin")?;

        info!("default admin account created (username: admin, password: admin123)");
        warn!("change the default admin password before exposing this deployment");
        Ok(())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, api_key, created_at
             FROM api_users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch user")?;
        Ok(row.map(UserRow::into_user))
    }

    pub async fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username).await? {
            Some(user) => verify(password, &user.password_hash).context("failed to verify password"),
            None => Ok(false),
        }
    }

    pub async fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("failed to hash password")?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            api_key: None,
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(
            "INSERT INTO api_users (id, username, password_hash, role, api_key, created_at)
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.api_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to insert user")?;

        info!(username = %user.username, role = user.role.as_str(), "created user");
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, api_key, created_at
             FROM api_users ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list users")?;
        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }

    pub async fn delete_user(&self, user_id: &Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM api_users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("failed to delete user")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("user not found");
        }
        info!(user_id = %user_id, "deleted user");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    api_key: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            password_hash: self.password_hash,
            role: UserRole::from_str(&self.role).unwrap_or(UserRole::Viewer),
            api_key: self.api_key,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `UserRow::into_user` is the only place a malformed `role` column
    /// could silently downgrade a user's privileges; pin its fallback.
    #[test]
    fn unknown_role_falls_back_to_viewer() {
        let row = UserRow {
            id: Uuid::new_v4(),
            username: "x".into(),
            password_hash: "h".into(),
            role: "nonsense".into(),
            api_key: None,
            created_at: Utc::now(),
        };
        assert_eq!(row.into_user().role, UserRole::Viewer);
    }
}
