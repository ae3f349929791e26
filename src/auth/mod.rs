//! Credentials, access tokens, Google sign-in and request rate limiting.

pub mod error;
pub mod google;
pub mod model;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod token;

pub use error::{AuthError, AuthErrorCode};
pub use google::{GoogleOAuth, GoogleProfile};
pub use model::{AuthProvider, Credential, CredentialStatus};
pub use rate_limit::{RateLimiter, RateLimits};
pub use service::{CredentialService, LoginOutcome, Registration, SocialLogin};
pub use store::CredentialStore;
pub use token::{extract_bearer_token, TokenClaims, TokenSigner};
