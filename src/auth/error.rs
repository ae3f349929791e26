use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Machine-readable authentication failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    EmailAlreadyRegistered,
    InvalidRegistrationData,
    InvalidCredentials,
    AccountInactive,
    AccountSuspended,
    TooManyAttempts,
    InvalidToken,
    ExpiredToken,
    MissingToken,
    PasswordResetExpired,
    PasswordResetInvalid,
    PasswordTooWeak,
    ProviderError,
    EmailProviderMismatch,
    ServerError,
    Unauthorized,
    Forbidden,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            AuthErrorCode::InvalidRegistrationData => "INVALID_REGISTRATION_DATA",
            AuthErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthErrorCode::AccountInactive => "ACCOUNT_INACTIVE",
            AuthErrorCode::AccountSuspended => "ACCOUNT_SUSPENDED",
            AuthErrorCode::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            AuthErrorCode::InvalidToken => "INVALID_TOKEN",
            AuthErrorCode::ExpiredToken => "EXPIRED_TOKEN",
            AuthErrorCode::MissingToken => "MISSING_TOKEN",
            AuthErrorCode::PasswordResetExpired => "PASSWORD_RESET_EXPIRED",
            AuthErrorCode::PasswordResetInvalid => "PASSWORD_RESET_INVALID",
            AuthErrorCode::PasswordTooWeak => "PASSWORD_TOO_WEAK",
            AuthErrorCode::ProviderError => "PROVIDER_ERROR",
            AuthErrorCode::EmailProviderMismatch => "EMAIL_PROVIDER_MISMATCH",
            AuthErrorCode::ServerError => "SERVER_ERROR",
            AuthErrorCode::Unauthorized => "UNAUTHORIZED",
            AuthErrorCode::Forbidden => "FORBIDDEN",
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication failure with the HTTP status it maps to
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
    http_status: u16,
    details: Option<Value>,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>, http_status: u16) -> Self {
        Self {
            code,
            message: message.into(),
            http_status,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn email_already_registered(email: &str) -> Self {
        Self::new(
            AuthErrorCode::EmailAlreadyRegistered,
            format!("Email {} is already registered", email),
            409,
        )
        .with_details(json!({ "email": email }))
    }

    pub fn invalid_registration_data(reason: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::InvalidRegistrationData, reason, 400)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            AuthErrorCode::InvalidCredentials,
            "Invalid email or password",
            401,
        )
    }

    pub fn account_inactive() -> Self {
        Self::new(AuthErrorCode::AccountInactive, "Account is inactive", 403)
    }

    pub fn account_suspended() -> Self {
        Self::new(
            AuthErrorCode::AccountSuspended,
            "Account is suspended due to too many failed login attempts",
            403,
        )
    }

    pub fn too_many_attempts(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(AuthErrorCode::TooManyAttempts, message, 429)
            .with_details(json!({ "retryAfter": retry_after_secs }))
    }

    pub fn invalid_token() -> Self {
        Self::new(
            AuthErrorCode::InvalidToken,
            "Invalid authentication token",
            401,
        )
    }

    pub fn expired_token() -> Self {
        Self::new(
            AuthErrorCode::ExpiredToken,
            "Authentication token has expired",
            401,
        )
    }

    pub fn missing_token() -> Self {
        Self::new(
            AuthErrorCode::MissingToken,
            "Authentication token is required",
            401,
        )
    }

    pub fn password_reset_expired() -> Self {
        Self::new(
            AuthErrorCode::PasswordResetExpired,
            "Password reset token has expired",
            400,
        )
    }

    pub fn password_reset_invalid() -> Self {
        Self::new(
            AuthErrorCode::PasswordResetInvalid,
            "Invalid password reset token",
            400,
        )
    }

    pub fn password_too_weak() -> Self {
        Self::new(
            AuthErrorCode::PasswordTooWeak,
            "Password does not meet security requirements",
            400,
        )
        .with_details(json!({
            "requirements": {
                "minLength": 8,
                "requireUppercase": true,
                "requireLowercase": true,
                "requireNumber": true,
                "requireSpecialChar": true
            }
        }))
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::ProviderError, message, 502)
    }

    pub fn email_provider_mismatch(email: &str, provider: &str) -> Self {
        Self::new(
            AuthErrorCode::EmailProviderMismatch,
            format!("Email {} is already registered with {}", email, provider),
            409,
        )
        .with_details(json!({ "email": email, "provider": provider }))
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::ServerError, message, 500)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Unauthorized, message, 401)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Forbidden, message, 403)
    }
}
