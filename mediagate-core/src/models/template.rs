use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frozen snapshot of a source user's policy (and optionally display
/// configuration) that invitations stamp onto new users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTemplate {
    pub id: i64,
    pub name: String,
    pub source_user_id: String,
    pub emby_policy: Value,
    pub emby_configuration: Option<Value>,
    pub include_configuration: bool,
    pub default_expiration_days: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Active,
    Used,
    Expired,
    Revoked,
}

impl InvitationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "used" => Some(Self::Used),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub token: String,
    pub template_id: i64,
    /// Account lifetime granted on redemption; `<= 0` means no expiry.
    pub expiration_days: i32,
    /// When the invitation itself stops being redeemable.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Active
            && self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_redeemable_window() {
        let now = Utc::now();
        let mut inv = Invitation {
            token: "t".into(),
            template_id: 1,
            expiration_days: 30,
            expires_at: Some(now + Duration::days(1)),
            status: InvitationStatus::Active,
            created_at: now,
        };
        assert!(inv.is_redeemable(now));
        assert!(!inv.is_redeemable(now + Duration::days(2)));
        inv.status = InvitationStatus::Used;
        assert!(!inv.is_redeemable(now));
    }
}
