//! Identity and its reconciliation from two sources.
//!
//! Baseline claims come from the auth provider; the profile row is owned
//! by the application. Profile fields win whenever both are present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::provider::ProviderUser;

const FALLBACK_INITIALS: &str = "US";

/// Access level. Anything unrecognised is treated as `User`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Whether holding `self` satisfies a requirement of `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        match required {
            Role::User => true,
            Role::Admin => *self == Role::Admin,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved user record the UI works with.
///
/// Serialized form is what the mirror stores under the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Identity from baseline claims alone.
    ///
    /// Name falls back to metadata `name`/`full_name`, then the e-mail's
    /// local part. Role only comes from server-controlled app metadata.
    pub fn from_claims(user: &ProviderUser) -> Self {
        let email = user.email.clone().unwrap_or_default();
        let name = user
            .user_meta_str(&["name", "full_name"])
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(&email));
        let role = user
            .app_meta_str("role")
            .and_then(Role::parse)
            .unwrap_or_default();
        let avatar = user
            .user_meta_str(&["avatar", "avatar_url"])
            .map(str::to_string);

        Self {
            id: user.id.clone(),
            email,
            name,
            role,
            avatar,
            created_at: user.created_at,
        }
    }

    /// Overlay a profile row. Present, non-empty row fields replace ours.
    pub fn with_profile(mut self, profile: &ProfileRecord) -> Self {
        if let Some(email) = non_empty(&profile.email) {
            self.email = email.to_string();
        }
        if let Some(name) = non_empty(&profile.full_name) {
            self.name = name.to_string();
        }
        if let Some(avatar) = non_empty(&profile.avatar_url) {
            self.avatar = Some(avatar.to_string());
        }
        if let Some(role) = profile.role {
            self.role = role;
        }
        if profile.created_at.is_some() {
            self.created_at = profile.created_at;
        }
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Up to two upper-case initials: first and last word of the name.
    pub fn initials(&self) -> String {
        let parts: Vec<&str> = self.name.split_whitespace().collect();
        let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
            return FALLBACK_INITIALS.to_string();
        };
        let mut out = String::new();
        out.extend(first.chars().next());
        if parts.len() > 1 {
            out.extend(last.chars().next());
        }
        out.to_uppercase()
    }
}

/// Merge baseline claims with the profile row (profile wins).
pub fn reconcile(user: &ProviderUser, profile: Option<&ProfileRecord>) -> Identity {
    let identity = Identity::from_claims(user);
    match profile {
        Some(row) if row.id == user.id => identity.with_profile(row),
        _ => identity,
    }
}

/// Display name used when registration supplies none: the e-mail local part.
pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ── Profile table rows ──────────────────────────────────────────────

/// Row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_role",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Row created at registration. Role is always `user`.
    pub fn new_user(id: &str, email: &str, full_name: &str) -> Self {
        Self {
            id: id.to_string(),
            email: Some(email.to_string()),
            full_name: Some(full_name.to_string()),
            avatar_url: None,
            role: Some(Role::User),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Columns a user may change on their own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilePatch {
    pub full_name: String,
    /// `None` leaves the stored avatar untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Role::parse))
}
