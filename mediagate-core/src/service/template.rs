//! User templates and invitations
//!
//! A template freezes a source user's policy (and optionally display
//! configuration). Syncing replays the live policy into the snapshot and
//! force-pushes it to every bound user; redemption creates a Library
//! Server user and stamps the snapshot onto it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;

use mediagate_providers::emby::EmbyClient;

use crate::models::{Invitation, UserTemplate};
use crate::repository::{TemplateRepository, UserRepository};
use crate::{with_transaction, Error, Result};

/// Suppression window for webhook events caused by our own policy pushes.
const RECURSION_SUPPRESSION_WINDOW: Duration = Duration::from_secs(5);

/// Process-wide `{user_id → push instant}` table. The webhook pipeline
/// consults it to tell self-inflicted `user.policyupdated` events from
/// genuine ones; entries are single-shot.
#[derive(Clone, Default)]
pub struct PolicyPushMarkers {
    inner: Arc<DashMap<String, Instant>>,
}

impl PolicyPushMarkers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, user_id: &str) {
        self.inner.insert(user_id.to_string(), Instant::now());
    }

    /// Consume a marker: true exactly once per push, within the window.
    #[must_use]
    pub fn consume(&self, user_id: &str) -> bool {
        if let Some((_, marked_at)) = self.inner.remove(user_id) {
            return marked_at.elapsed() < RECURSION_SUPPRESSION_WINDOW;
        }
        false
    }
}

pub struct TemplateService {
    repo: TemplateRepository,
    users: UserRepository,
    emby: Arc<EmbyClient>,
    markers: PolicyPushMarkers,
}

impl TemplateService {
    #[must_use]
    pub fn new(
        repo: TemplateRepository,
        users: UserRepository,
        emby: Arc<EmbyClient>,
        markers: PolicyPushMarkers,
    ) -> Self {
        Self {
            repo,
            users,
            emby,
            markers,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &TemplateRepository {
        &self.repo
    }

    /// Snapshot a source user into a new template.
    pub async fn create_template(
        &self,
        name: &str,
        source_user_id: &str,
        include_configuration: bool,
        default_expiration_days: i32,
    ) -> Result<UserTemplate> {
        let source = self.emby.get_user(source_user_id).await?;
        let policy = source
            .policy
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?
            .ok_or_else(|| Error::InvalidInput("source user has no policy".to_string()))?;
        let configuration = if include_configuration {
            source.configuration.clone()
        } else {
            None
        };

        self.repo
            .create_template(
                name,
                source_user_id,
                &policy,
                configuration.as_ref(),
                include_configuration,
                default_expiration_days,
            )
            .await
    }

    /// Replay the source user's current policy into the template and
    /// force-push to all bound users.
    pub async fn sync_template(&self, template_id: i64) -> Result<usize> {
        let template = self
            .repo
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;

        let source = self.emby.get_user(&template.source_user_id).await?;
        let policy = source
            .policy
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?
            .ok_or_else(|| Error::InvalidInput("source user has no policy".to_string()))?;
        let configuration = if template.include_configuration {
            source.configuration.clone()
        } else {
            None
        };
        self.repo
            .update_template_snapshot(template_id, &policy, configuration.as_ref())
            .await?;

        let bound = self.repo.bound_users(template_id).await?;
        let mut pushed = 0;
        for user_id in &bound {
            if let Err(e) = self
                .push_policy(user_id, &policy, configuration.as_ref())
                .await
            {
                tracing::warn!(user_id, error = %e, "policy push failed");
                continue;
            }
            pushed += 1;
        }
        tracing::info!(template_id, pushed, "模板同步完成");
        Ok(pushed)
    }

    /// Webhook hook: a genuine policy change on a template's source user
    /// re-syncs that template.
    pub async fn auto_sync_on_policy_change(&self, user_id: &str) -> Result<()> {
        if let Some(template) = self.repo.template_for_source_user(user_id).await? {
            self.sync_template(template.id).await?;
        }
        Ok(())
    }

    async fn push_policy(
        &self,
        user_id: &str,
        policy: &serde_json::Value,
        configuration: Option<&serde_json::Value>,
    ) -> Result<()> {
        // Stamp before pushing so the echoed webhook sees the marker.
        self.markers.mark(user_id);
        self.emby.set_user_policy(user_id, policy).await?;
        if let Some(configuration) = configuration {
            self.markers.mark(user_id);
            self.emby
                .set_user_configuration(user_id, configuration)
                .await?;
        }
        // Keep the local policy snapshot in step.
        if let Ok(user) = self.emby.get_user(user_id).await {
            let policy = user
                .policy
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?
                .unwrap_or(serde_json::Value::Null);
            self.users.upsert_user(user_id, &user.name, &policy).await?;
        }
        Ok(())
    }

    // ---- Invitations ----

    pub async fn create_invitation(
        &self,
        template_id: i64,
        expiration_days: Option<i32>,
        valid_for_days: i64,
    ) -> Result<Invitation> {
        let template = self
            .repo
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = (valid_for_days > 0)
            .then(|| Utc::now() + chrono::Duration::days(valid_for_days));
        self.repo
            .create_invitation(
                &token,
                template_id,
                expiration_days.unwrap_or(template.default_expiration_days),
                expires_at,
            )
            .await
    }

    /// Redeem an invitation: create the user, apply the template, record
    /// the extension row, and burn the token. The local rows commit in one
    /// transaction.
    pub async fn redeem_invitation(&self, token: &str, username: &str) -> Result<String> {
        let invitation = self
            .repo
            .get_invitation(token)
            .await?
            .ok_or_else(|| Error::NotFound("invitation not found".to_string()))?;
        if !invitation.is_redeemable(Utc::now()) {
            return Err(Error::InvalidInput("邀请已失效".to_string()));
        }
        let template = self
            .repo
            .get_template(invitation.template_id)
            .await?
            .ok_or_else(|| Error::NotFound("template vanished".to_string()))?;

        // Name-collision check before touching anything.
        if self
            .emby
            .get_users()
            .await?
            .iter()
            .any(|u| u.name.eq_ignore_ascii_case(username))
        {
            return Err(Error::AlreadyExists(format!("用户名 {username} 已存在")));
        }

        let new_user = self.emby.create_user(username).await?;
        self.push_policy(
            &new_user.id,
            &template.emby_policy,
            template.emby_configuration.as_ref(),
        )
        .await?;

        let expiration_date = (invitation.expiration_days > 0).then(|| {
            Utc::now() + chrono::Duration::days(i64::from(invitation.expiration_days))
        });

        let user_id = new_user.id.clone();
        let template_id = template.id;
        let token = token.to_string();
        with_transaction(self.repo.pool(), move |tx| {
            Box::pin(async move {
                TemplateRepository::insert_extension(tx, &user_id, expiration_date, template_id)
                    .await?;
                TemplateRepository::bind_user_tx(tx, template_id, &user_id).await?;
                TemplateRepository::mark_invitation_used(tx, &token).await?;
                Ok(())
            })
        })
        .await?;

        tracing::info!(user = username, template_id, "邀请兑换成功");
        Ok(new_user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_single_shot() {
        let markers = PolicyPushMarkers::new();
        markers.mark("u1");
        assert!(markers.consume("u1"));
        // Second consume of the same push fails.
        assert!(!markers.consume("u1"));
        // Unmarked users never match.
        assert!(!markers.consume("u2"));
    }

    #[test]
    fn test_marker_reuse_after_second_push() {
        let markers = PolicyPushMarkers::new();
        markers.mark("u1");
        assert!(markers.consume("u1"));
        markers.mark("u1");
        assert!(markers.consume("u1"));
    }
}
