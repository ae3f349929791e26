use super::model::AuthProvider;
use super::service::SocialLogin;
use super::AuthError;
use crate::config::GoogleConfig;
use crate::logging::log_warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// How long an issued `state` stays redeemable
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OpenID Connect userinfo
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

impl GoogleProfile {
    /// Names fall back to splitting the display name
    pub fn into_social_login(self) -> Result<SocialLogin, AuthError> {
        let email = self
            .email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| AuthError::provider_error("No email found in Google profile"))?;

        let display = self.name.unwrap_or_default();
        let mut words = display.split_whitespace();
        let first_from_display = words.next().unwrap_or_default().to_string();
        let last_from_display = words.collect::<Vec<_>>().join(" ");

        Ok(SocialLogin {
            email,
            first_name: self.given_name.unwrap_or(first_from_display),
            last_name: self.family_name.unwrap_or(last_from_display),
            provider: AuthProvider::Google,
            provider_user_id: self.sub,
            user_id: None,
        })
    }
}

/// Google OAuth 2.0 authorization-code flow
pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    callback_url: String,
    client: reqwest::Client,
    token_url: String,
    userinfo_url: String,
    states: Mutex<HashMap<String, Instant>>,
}

impl GoogleOAuth {
    /// `None` unless both client id and secret are set
    pub fn from_config(config: &GoogleConfig, callback_url: String) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self {
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            callback_url,
            client: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Point the token and userinfo calls somewhere else (tests, proxies)
    pub fn with_endpoints(mut self, token_url: &str, userinfo_url: &str) -> Self {
        self.token_url = token_url.to_string();
        self.userinfo_url = userinfo_url.to_string();
        self
    }

    /// Consent screen URL carrying a fresh one-time `state`
    pub fn authorization_url(&self) -> Result<String, AuthError> {
        let state = Uuid::new_v4().simple().to_string();
        {
            let mut states = self
                .states
                .lock()
                .map_err(|_| AuthError::server_error("OAuth state lock poisoned"))?;
            let now = Instant::now();
            states.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
            states.insert(state.clone(), now);
        }

        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state.as_str()),
                ("access_type", "online"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| AuthError::server_error(format!("Invalid authorization URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// True once per issued, unexpired state
    pub fn consume_state(&self, state: &str) -> bool {
        let Ok(mut states) = self.states.lock() else {
            return false;
        };
        states
            .remove(state)
            .is_some_and(|issued| issued.elapsed() < STATE_TTL)
    }

    /// Exchange an authorization code for the user's profile
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleProfile, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::provider_error(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log_warn("auth", &format!("Google token exchange failed ({}): {}", status, body))
                .unwrap_or_default();
            return Err(AuthError::provider_error(format!(
                "Google token exchange failed with {}",
                status
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::provider_error(format!("Invalid token response: {}", e)))?;

        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthError::provider_error(format!("Userinfo request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::provider_error(format!(
                "Google userinfo failed with {}",
                response.status()
            )));
        }
        response
            .json::<GoogleProfile>()
            .await
            .map_err(|e| AuthError::provider_error(format!("Invalid userinfo response: {}", e)))
    }
}
