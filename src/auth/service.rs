use super::model::{normalize_email, AuthProvider, Credential, CredentialStatus};
use super::password::{check_strength, hash_password_blocking, verify_password_blocking};
use super::store::CredentialStore;
use super::token::TokenSigner;
use super::AuthError;
use crate::config::AuthConfig;
use crate::error::Result;
use crate::logging::{log_info, log_warn};
use crate::storage::hashing::sha256_hex;
use crate::validation::validate_email;
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// Sign-up with email and password
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Existing user to attach to; a new id is generated otherwise
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Identity asserted by an external provider
#[derive(Debug, Clone)]
pub struct SocialLogin {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub provider: AuthProvider,
    pub provider_user_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub credential: Credential,
    pub token: String,
}

/// Credential lifecycle: registration, login, social login, password reset
/// and token revocation.
#[derive(Clone)]
pub struct CredentialService {
    store: CredentialStore,
    tokens: TokenSigner,
    max_failed_attempts: u32,
    reset_ttl: Duration,
}

impl CredentialService {
    pub fn new(store: CredentialStore, config: &AuthConfig) -> Result<Self> {
        Ok(Self {
            store,
            tokens: TokenSigner::new(&config.jwt_secret, config.token_lifetime_secs)?,
            max_failed_attempts: config.max_failed_login_attempts,
            reset_ttl: Duration::seconds(config.password_reset_ttl_secs),
        })
    }

    pub fn tokens(&self) -> &TokenSigner {
        &self.tokens
    }

    pub async fn register_user(&self, registration: Registration) -> Result<Credential> {
        let email = normalize_email(&registration.email);
        validate_email(&email).map_err(|e| AuthError::invalid_registration_data(e.to_string()))?;
        check_strength(&registration.password)?;

        if self.store.find_by_email(&email)?.is_some() {
            return Err(AuthError::email_already_registered(&email).into());
        }

        let user_id = registration
            .user_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut credential = Credential::new(user_id, email, AuthProvider::Local);
        credential.first_name = registration.first_name;
        credential.last_name = registration.last_name;
        credential.password_hash = Some(hash_password_blocking(registration.password).await?);

        self.store.save(&mut credential)?;
        log_info("auth", &format!("Registered {}", credential.email)).unwrap_or_default();
        Ok(credential)
    }

    /// Verify a local password and mint a token.
    ///
    /// Each wrong password counts towards suspension; a success resets the count.
    pub async fn login_with_credentials(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        let credential = self
            .store
            .find_by_email_and_provider(&email, AuthProvider::Local)?
            .ok_or_else(AuthError::invalid_credentials)?;

        match credential.status {
            CredentialStatus::Inactive => return Err(AuthError::account_inactive().into()),
            CredentialStatus::Suspended => return Err(AuthError::account_suspended().into()),
            CredentialStatus::Active => {}
        }

        let stored_hash = credential.password_hash.clone().unwrap_or_default();
        if !verify_password_blocking(password.to_string(), stored_hash).await {
            if let Some((attempts, CredentialStatus::Suspended)) = self
                .store
                .record_failed_login(&credential.id, self.max_failed_attempts)?
            {
                log_warn(
                    "auth",
                    &format!("Suspended {} after {} failed logins", credential.email, attempts),
                )
                .unwrap_or_default();
            }
            return Err(AuthError::invalid_credentials().into());
        }

        // Suspended by a concurrent failure while the hash was being checked
        let credential = self
            .store
            .record_successful_login(&credential.id)?
            .ok_or_else(AuthError::account_suspended)?;

        let token = self.issue_token(&credential)?;
        Ok(LoginOutcome { credential, token })
    }

    /// Update the credential for a known provider identity, else create one.
    /// An email already registered through another provider is rejected.
    pub fn create_social_login(&self, login: SocialLogin) -> Result<Credential> {
        let email = normalize_email(&login.email);

        if let Some(mut credential) = self
            .store
            .find_by_provider_identity(login.provider, &login.provider_user_id)?
        {
            credential.email = email;
            credential.first_name = login.first_name;
            credential.last_name = login.last_name;
            credential.last_login_at = Some(Utc::now());
            self.store.save(&mut credential)?;
            return Ok(credential);
        }

        if let Some(existing) = self.store.find_by_email(&email)? {
            if existing.provider != login.provider {
                return Err(
                    AuthError::email_provider_mismatch(&email, existing.provider.as_str()).into(),
                );
            }
        }

        let user_id = login.user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut credential = Credential::new(user_id, email, login.provider);
        credential.first_name = login.first_name;
        credential.last_name = login.last_name;
        credential.provider_user_id = Some(login.provider_user_id);
        credential.last_login_at = Some(Utc::now());

        self.store.save(&mut credential)?;
        log_info(
            "auth",
            &format!("Created {} login for {}", credential.provider, credential.email),
        )
        .unwrap_or_default();
        Ok(credential)
    }

    pub fn issue_token(&self, credential: &Credential) -> Result<String> {
        Ok(self
            .tokens
            .mint(&credential.user_id, &credential.email, credential.token_version)?)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Credential>> {
        self.store.find_by_email(&normalize_email(email))
    }

    pub fn find_by_user_id(&self, user_id: &str) -> Result<Option<Credential>> {
        self.store.find_by_user_id(user_id)
    }

    /// `None` when the user has no local credential
    pub async fn update_password(
        &self,
        user_id: &str,
        new_password: &str,
    ) -> Result<Option<Credential>> {
        check_strength(new_password)?;
        let Some(mut credential) = self.local_credential_of(user_id)? else {
            return Ok(None);
        };

        credential.password_hash = Some(hash_password_blocking(new_password.to_string()).await?);
        credential.clear_password_reset();
        self.store.save(&mut credential)?;
        Ok(Some(credential))
    }

    /// One-time reset token for a local account; only its hash is stored
    pub fn generate_password_reset_token(&self, email: &str) -> Result<String> {
        let email = normalize_email(email);
        let mut credential = self
            .store
            .find_by_email_and_provider(&email, AuthProvider::Local)?
            .ok_or_else(AuthError::invalid_credentials)?;

        let token = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        credential.password_reset_token = Some(sha256_hex(token.as_bytes()));
        credential.password_reset_expires = Some(Utc::now() + self.reset_ttl);
        self.store.save(&mut credential)?;

        log_info("auth", &format!("Password reset requested for {}", email)).unwrap_or_default();
        Ok(token)
    }

    pub async fn reset_password_with_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<Credential> {
        let mut credential = self
            .store
            .find_by_reset_token(&sha256_hex(token.as_bytes()))?
            .ok_or_else(AuthError::password_reset_invalid)?;

        let expired = credential
            .password_reset_expires
            .map_or(true, |expires| expires < Utc::now());
        if expired {
            return Err(AuthError::password_reset_expired().into());
        }
        check_strength(new_password)?;

        credential.password_hash = Some(hash_password_blocking(new_password.to_string()).await?);
        credential.clear_password_reset();
        credential.failed_login_attempts = 0;
        self.store.save(&mut credential)?;
        Ok(credential)
    }

    /// Invalidate every token issued so far; false when the user is unknown
    pub fn revoke_all_tokens(&self, user_id: &str) -> Result<bool> {
        let Some(mut credential) = self.store.find_by_user_id(user_id)? else {
            return Ok(false);
        };
        credential.token_version += 1;
        credential.tokens_revoked_at = Some(Utc::now());
        self.store.save(&mut credential)?;
        Ok(true)
    }

    pub fn deactivate_account(&self, user_id: &str) -> Result<Option<Credential>> {
        let Some(mut credential) = self.store.find_by_user_id(user_id)? else {
            return Ok(None);
        };
        credential.status = CredentialStatus::Inactive;
        credential.token_version += 1;
        credential.tokens_revoked_at = Some(Utc::now());
        self.store.save(&mut credential)?;

        log_info("auth", &format!("Deactivated {}", credential.email)).unwrap_or_default();
        Ok(Some(credential))
    }

    /// Resolve a bearer token to an active credential
    pub fn authenticate(&self, token: &str) -> Result<Credential> {
        let claims = self.tokens.verify(token)?;
        let credential = self
            .store
            .find_by_user_id(&claims.sub)?
            .ok_or_else(AuthError::invalid_token)?;

        if claims.ver != credential.token_version {
            return Err(AuthError::invalid_token().into());
        }
        match credential.status {
            CredentialStatus::Active => Ok(credential),
            CredentialStatus::Inactive => Err(AuthError::account_inactive().into()),
            CredentialStatus::Suspended => Err(AuthError::account_suspended().into()),
        }
    }

    fn local_credential_of(&self, user_id: &str) -> Result<Option<Credential>> {
        Ok(self
            .store
            .find_by_user_id(user_id)?
            .filter(|c| c.provider == AuthProvider::Local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthErrorCode;
    use crate::error::IntakeError;

    const PASSWORD: &str = "Corr3ct!horse";

    fn service() -> CredentialService {
        let config = AuthConfig {
            jwt_secret: "unit-test-signing-secret-0123456789".to_string(),
            ..AuthConfig::default()
        };
        CredentialService::new(CredentialStore::open_in_memory().unwrap(), &config).unwrap()
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            user_id: None,
        }
    }

    fn auth_code(err: IntakeError) -> AuthErrorCode {
        match err {
            IntakeError::Auth(e) => e.code(),
            other => panic!("expected an auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let service = service();
        let credential = service.register_user(registration("Ada@Example.com")).await.unwrap();
        assert_eq!(credential.email, "ada@example.com");

        let duplicate = service.register_user(registration("ada@example.com")).await;
        assert_eq!(auth_code(duplicate.unwrap_err()), AuthErrorCode::EmailAlreadyRegistered);

        let outcome = service
            .login_with_credentials("ada@example.com", PASSWORD)
            .await
            .unwrap();
        assert!(outcome.credential.last_login_at.is_some());

        let authed = service.authenticate(&outcome.token).unwrap();
        assert_eq!(authed.id, credential.id);
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password() {
        let service = service();
        let mut weak = registration("b@example.com");
        weak.password = "password".to_string();
        let err = service.register_user(weak).await.unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::PasswordTooWeak);
    }

    #[tokio::test]
    async fn test_lockout_after_max_failures() {
        let service = service();
        service.register_user(registration("c@example.com")).await.unwrap();

        for _ in 0..6 {
            let err = service
                .login_with_credentials("c@example.com", "Wr0ng!pass")
                .await
                .unwrap_err();
            assert_eq!(auth_code(err), AuthErrorCode::InvalidCredentials);
        }

        let err = service
            .login_with_credentials("c@example.com", PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::AccountSuspended);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_failures_are_all_counted() {
        let service = service();
        let credential = service.register_user(registration("f@example.com")).await.unwrap();

        let attempts = (0..6).map(|_| service.login_with_credentials("f@example.com", "Wr0ng!pass"));
        for result in futures_util::future::join_all(attempts).await {
            assert_eq!(auth_code(result.unwrap_err()), AuthErrorCode::InvalidCredentials);
        }

        let stored = service.store.find_by_id(&credential.id).unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 6);
        assert_eq!(stored.status, CredentialStatus::Suspended);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let service = service();
        service.register_user(registration("d@example.com")).await.unwrap();

        for _ in 0..5 {
            assert!(service
                .login_with_credentials("d@example.com", "Wr0ng!pass")
                .await
                .is_err());
        }
        let outcome = service
            .login_with_credentials("d@example.com", PASSWORD)
            .await
            .unwrap();
        assert_eq!(outcome.credential.failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn test_revoke_and_deactivate() {
        let service = service();
        let credential = service.register_user(registration("e@example.com")).await.unwrap();
        let outcome = service
            .login_with_credentials("e@example.com", PASSWORD)
            .await
            .unwrap();

        assert!(service.revoke_all_tokens(&credential.user_id).unwrap());
        let err = service.authenticate(&outcome.token).unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::InvalidToken);

        let fresh = service
            .login_with_credentials("e@example.com", PASSWORD)
            .await
            .unwrap();
        assert!(service.authenticate(&fresh.token).is_ok());

        service.deactivate_account(&credential.user_id).unwrap().unwrap();
        let err = service
            .login_with_credentials("e@example.com", PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::AccountInactive);
        assert!(!service.revoke_all_tokens("nobody").unwrap());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let service = service();
        service.register_user(registration("f@example.com")).await.unwrap();

        let token = service.generate_password_reset_token("f@example.com").unwrap();
        let err = service
            .reset_password_with_token("not-the-token", "N3w!password")
            .await
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::PasswordResetInvalid);

        service
            .reset_password_with_token(&token, "N3w!password")
            .await
            .unwrap();
        assert!(service
            .login_with_credentials("f@example.com", "N3w!password")
            .await
            .is_ok());

        // Tokens are single-use
        let err = service
            .reset_password_with_token(&token, "An0ther!password")
            .await
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::PasswordResetInvalid);

        let err = service.generate_password_reset_token("ghost@example.com").unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_social_login() {
        let service = service();
        let google = |email: &str, id: &str| SocialLogin {
            email: email.to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            provider: AuthProvider::Google,
            provider_user_id: id.to_string(),
            user_id: None,
        };

        let created = service.create_social_login(google("g@example.com", "g-1")).unwrap();
        let again = service
            .create_social_login(google("grace@example.com", "g-1"))
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.email, "grace@example.com");

        service.register_user(registration("h@example.com")).await.unwrap();
        let err = service
            .create_social_login(google("h@example.com", "g-2"))
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::EmailProviderMismatch);

        // Social accounts cannot log in with a password
        let err = service
            .login_with_credentials("grace@example.com", PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(auth_code(err), AuthErrorCode::InvalidCredentials);
        assert!(service
            .update_password(&created.user_id, "N3w!password")
            .await
            .unwrap()
            .is_none());
    }
}
