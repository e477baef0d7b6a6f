use async_trait::async_trait;

use crate::auth::repo_types::{NewUser, Token, User, UserChanges};
use crate::db::{conflict_on, PgStore};
use crate::error::StoreError;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `Conflict("email")` when the email is taken.
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError>;
    /// Removes the user together with their token, labels and recipes.
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;
    /// Stores `key` as the user's only token.
    async fn replace_token(&self, user_id: i64, key: &str) -> Result<Token, StoreError>;
    async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError>;
}

#[async_trait]
impl UserRepo for PgStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash, is_active, is_staff, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, name, password_hash, is_active, is_staff, is_superuser, created_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(new.caps.is_active)
        .bind(new.caps.is_staff)
        .bind(new.caps.is_superuser)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_on("email"))?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, is_active, is_staff, is_superuser, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, is_active, is_staff, is_superuser, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        let caps = changes.caps;
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET email         = COALESCE($2, email),
                   name          = COALESCE($3, name),
                   password_hash = COALESCE($4, password_hash),
                   is_active     = COALESCE($5, is_active),
                   is_staff      = COALESCE($6, is_staff),
                   is_superuser  = COALESCE($7, is_superuser)
             WHERE id = $1
            RETURNING id, email, name, password_hash, is_active, is_staff, is_superuser, created_at
            "#,
        )
        .bind(id)
        .bind(changes.email)
        .bind(changes.name)
        .bind(changes.password_hash)
        .bind(caps.map(|c| c.is_active))
        .bind(caps.map(|c| c.is_staff))
        .bind(caps.map(|c| c.is_superuser))
        .fetch_optional(&self.pool)
        .await
        .map_err(conflict_on("email"))?
        .ok_or(StoreError::NotFound)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        // tokens, labels, recipes and join rows go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn replace_token(&self, user_id: i64, key: &str) -> Result<Token, StoreError> {
        let token = sqlx::query_as::<_, Token>(
            r#"
            INSERT INTO auth_tokens (key, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
               SET key = EXCLUDED.key, created_at = now()
            RETURNING key, user_id, created_at
            "#,
        )
        .bind(key)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_on("token"))?;
        Ok(token)
    }

    async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.name, u.password_hash,
                   u.is_active, u.is_staff, u.is_superuser, u.created_at
              FROM auth_tokens t
              JOIN users u ON u.id = t.user_id
             WHERE t.key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
