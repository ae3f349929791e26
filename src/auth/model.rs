use crate::error::IntakeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    Active,
    Inactive,
    Suspended,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "ACTIVE",
            CredentialStatus::Inactive => "INACTIVE",
            CredentialStatus::Suspended => "SUSPENDED",
        }
    }
}

impl FromStr for CredentialStatus {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CredentialStatus::Active),
            "INACTIVE" => Ok(CredentialStatus::Inactive),
            "SUSPENDED" => Ok(CredentialStatus::Suspended),
            other => Err(IntakeError::Validation(format!(
                "Unknown credential status: {}",
                other
            ))),
        }
    }
}

/// Where a credential's identity is proven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthProvider {
    Local,
    Google,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "LOCAL",
            AuthProvider::Google => "GOOGLE",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(AuthProvider::Local),
            "GOOGLE" => Ok(AuthProvider::Google),
            other => Err(IntakeError::Validation(format!(
                "Unknown auth provider: {}",
                other
            ))),
        }
    }
}

/// Login identity of a user. Secrets never serialize.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: Uuid,
    /// Id of the user this credential logs in as
    pub user_id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub provider: AuthProvider,
    pub provider_user_id: Option<String>,
    pub status: CredentialStatus,
    pub failed_login_attempts: u32,
    pub last_login_at: Option<DateTime<Utc>>,
    /// SHA-256 of the outstanding reset token
    #[serde(skip)]
    pub password_reset_token: Option<String>,
    #[serde(skip)]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub token_version: u32,
    pub tokens_revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        provider: AuthProvider,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            email: email.into(),
            password_hash: None,
            first_name: String::new(),
            last_name: String::new(),
            provider,
            provider_user_id: None,
            status: CredentialStatus::Active,
            failed_login_attempts: 0,
            last_login_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            token_version: 0,
            tokens_revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    pub fn clear_password_reset(&mut self) {
        self.password_reset_token = None;
        self.password_reset_expires = None;
    }
}

/// Emails are matched case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
