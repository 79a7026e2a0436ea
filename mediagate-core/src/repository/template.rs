//! User templates, invitations, and account-extension rows

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{Invitation, InvitationStatus, UserTemplate};
use crate::{Error, Result};

#[derive(Clone)]
pub struct TemplateRepository {
    pool: PgPool,
}

impl TemplateRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_template(row: &PgRow) -> Result<UserTemplate> {
        Ok(UserTemplate {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            source_user_id: row.try_get("source_user_id")?,
            emby_policy: row.try_get("emby_policy")?,
            emby_configuration: row.try_get("emby_configuration")?,
            include_configuration: row.try_get("include_configuration")?,
            default_expiration_days: row.try_get("default_expiration_days")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_invitation(row: &PgRow) -> Result<Invitation> {
        let status: String = row.try_get("status")?;
        Ok(Invitation {
            token: row.try_get("token")?,
            template_id: row.try_get("template_id")?,
            expiration_days: row.try_get("expiration_days")?,
            expires_at: row.try_get("expires_at")?,
            status: InvitationStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("unknown invitation status {status}")))?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn create_template(
        &self,
        name: &str,
        source_user_id: &str,
        policy: &serde_json::Value,
        configuration: Option<&serde_json::Value>,
        include_configuration: bool,
        default_expiration_days: i32,
    ) -> Result<UserTemplate> {
        let row = sqlx::query(
            "INSERT INTO user_templates
                (name, source_user_id, emby_policy, emby_configuration,
                 include_configuration, default_expiration_days)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, name, source_user_id, emby_policy, emby_configuration,
                       include_configuration, default_expiration_days, updated_at",
        )
        .bind(name)
        .bind(source_user_id)
        .bind(policy)
        .bind(configuration)
        .bind(include_configuration)
        .bind(default_expiration_days)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_template(&row)
    }

    pub async fn get_template(&self, id: i64) -> Result<Option<UserTemplate>> {
        let row = sqlx::query(
            "SELECT id, name, source_user_id, emby_policy, emby_configuration,
                    include_configuration, default_expiration_days, updated_at
             FROM user_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    pub async fn all_templates(&self) -> Result<Vec<UserTemplate>> {
        let rows = sqlx::query(
            "SELECT id, name, source_user_id, emby_policy, emby_configuration,
                    include_configuration, default_expiration_days, updated_at
             FROM user_templates ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_template).collect()
    }

    /// Replace the template's frozen policy snapshot.
    pub async fn update_template_snapshot(
        &self,
        id: i64,
        policy: &serde_json::Value,
        configuration: Option<&serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_templates
             SET emby_policy = $2, emby_configuration = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(policy)
        .bind(configuration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Template bindings ----

    pub async fn bind_user(&self, template_id: i64, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO template_bindings (template_id, user_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(template_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bound_users(&self, template_id: i64) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM template_bindings WHERE template_id = $1")
                .bind(template_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// The template a source user's policy change should resync, if any.
    pub async fn template_for_source_user(&self, user_id: &str) -> Result<Option<UserTemplate>> {
        let row = sqlx::query(
            "SELECT id, name, source_user_id, emby_policy, emby_configuration,
                    include_configuration, default_expiration_days, updated_at
             FROM user_templates WHERE source_user_id = $1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    // ---- Invitations ----

    pub async fn create_invitation(
        &self,
        token: &str,
        template_id: i64,
        expiration_days: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Invitation> {
        let row = sqlx::query(
            "INSERT INTO invitations (token, template_id, expiration_days, expires_at)
             VALUES ($1, $2, $3, $4)
             RETURNING token, template_id, expiration_days, expires_at, status, created_at",
        )
        .bind(token)
        .bind(template_id)
        .bind(expiration_days)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_invitation(&row)
    }

    pub async fn get_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        let row = sqlx::query(
            "SELECT token, template_id, expiration_days, expires_at, status, created_at
             FROM invitations WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_invitation).transpose()
    }

    /// Mark an invitation used, inside the redemption transaction.
    pub async fn mark_invitation_used(
        tx: &mut Transaction<'static, Postgres>,
        token: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE invitations SET status = 'used' WHERE token = $1")
            .bind(token)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Insert the extension row, inside the redemption transaction.
    pub async fn insert_extension(
        tx: &mut Transaction<'static, Postgres>,
        user_id: &str,
        expiration_date: Option<DateTime<Utc>>,
        template_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_extensions (user_id, status, expiration_date, template_id)
             VALUES ($1, 'active', $2, $3)",
        )
        .bind(user_id)
        .bind(expiration_date)
        .bind(template_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Bind inside the redemption transaction.
    pub async fn bind_user_tx(
        tx: &mut Transaction<'static, Postgres>,
        template_id: i64,
        user_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO template_bindings (template_id, user_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(template_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
