//! Credential model - storage adapter for the userinfo table
//!
//! Password hashes arrive pre-hashed from the client and are compared as
//! opaque strings; this module never sees a plaintext password.

use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    #[sqlx(rename = "userID")]
    pub user_id: i64,
    pub email: String,
    #[sqlx(rename = "passwordHash")]
    pub password_hash: String,
    #[sqlx(rename = "deviceID")]
    pub device_id: Option<String>,
}

const CREDENTIAL_COLUMNS: &str = "userID, email, passwordHash, deviceID";

impl Credential {
    pub async fn exists_by_email(pool: &SqlitePool, email: &str) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM userinfo WHERE email = ?")
            .bind(email)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    /// Insert a new credential and return the assigned userID
    pub async fn create(
        pool: &SqlitePool,
        email: &str,
        password_hash: &str,
        device_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO userinfo (email, passwordHash, deviceID) VALUES (?, ?, ?)",
        )
        .bind(email)
        .bind(password_hash)
        .bind(device_id)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_email(
        pool: &SqlitePool,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM userinfo WHERE email = ?");
        sqlx::query_as::<_, Credential>(&sql)
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_login(
        pool: &SqlitePool,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql =
            format!("SELECT {CREDENTIAL_COLUMNS} FROM userinfo WHERE email = ? AND passwordHash = ?");
        sqlx::query_as::<_, Credential>(&sql)
            .bind(email)
            .bind(password_hash)
            .fetch_optional(pool)
            .await
    }

    pub async fn update_password(
        pool: &SqlitePool,
        email: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE userinfo SET passwordHash = ?, updated_at = datetime('now') WHERE email = ?",
        )
        .bind(password_hash)
        .bind(email)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Alert recipient lookup; None when the user has no email on file
    pub async fn email_for_user(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT email FROM userinfo WHERE userID = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_create_and_find_by_login() {
        let pool = test_pool().await;

        let user_id = Credential::create(&pool, "a@example.com", "h1", "device-1")
            .await
            .unwrap();
        assert!(user_id > 0);
        assert!(Credential::exists_by_email(&pool, "a@example.com").await.unwrap());

        let cred = Credential::find_by_login(&pool, "a@example.com", "h1")
            .await
            .unwrap()
            .expect("credential");
        assert_eq!(cred.user_id, user_id);
        assert_eq!(cred.device_id.as_deref(), Some("device-1"));

        let miss = Credential::find_by_login(&pool, "a@example.com", "wrong")
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_update_password() {
        let pool = test_pool().await;
        Credential::create(&pool, "b@example.com", "old", "d").await.unwrap();

        Credential::update_password(&pool, "b@example.com", "new").await.unwrap();

        assert!(Credential::find_by_login(&pool, "b@example.com", "old")
            .await
            .unwrap()
            .is_none());
        assert!(Credential::find_by_login(&pool, "b@example.com", "new")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_email_for_user() {
        let pool = test_pool().await;
        let user_id = Credential::create(&pool, "c@example.com", "h", "d").await.unwrap();

        let email = Credential::email_for_user(&pool, user_id).await.unwrap();
        assert_eq!(email.as_deref(), Some("c@example.com"));
        assert!(Credential::email_for_user(&pool, user_id + 99).await.unwrap().is_none());
    }
}
