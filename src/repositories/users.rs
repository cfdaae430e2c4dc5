use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::User;
use crate::db::types::UserRole;
use crate::repositories::{PgRepository, StoreResult};

const COLUMNS: &str = "id, username, hashed_password, role, is_active, created_at, updated_at";

#[derive(Debug, Clone)]
pub(crate) struct NewUser {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) hashed_password: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateUser {
    pub(crate) hashed_password: Option<String>,
    pub(crate) role: Option<UserRole>,
    pub(crate) is_active: Option<bool>,
}

#[async_trait]
pub(crate) trait UserRepository: Send + Sync {
    /// Returns `None` when the username is already taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn update_user(
        &self,
        id: &str,
        params: UpdateUser,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<()>;
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn create_user(&self, user: NewUser) -> StoreResult<Option<User>> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, username, hashed_password, role, is_active, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$6)
             ON CONFLICT (username) DO NOTHING
             RETURNING {COLUMNS}",
        ))
        .bind(user.id)
        .bind(user.username)
        .bind(user.hashed_password)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.created_at)
        .fetch_optional(self.pool())
        .await?;
        Ok(created)
    }

    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(self.pool())
                .await?;
        Ok(user)
    }

    async fn update_user(
        &self,
        id: &str,
        params: UpdateUser,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET
                hashed_password = COALESCE($1, hashed_password),
                role = COALESCE($2, role),
                is_active = COALESCE($3, is_active),
                updated_at = $4
             WHERE id = $5",
        )
        .bind(params.hashed_password)
        .bind(params.role)
        .bind(params.is_active)
        .bind(updated_at)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
