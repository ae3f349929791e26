use super::response::reject;
use super::AppState;
use crate::auth::{extract_bearer_token, AuthError, Credential, RateLimiter, RateLimits};
use crate::error::IntakeError;
use std::convert::Infallible;
use std::net::SocketAddr;
use uuid::Uuid;
use warp::{Filter, Rejection};

pub fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Address a request is rate limited by; see [`RateLimits::client_key`]
pub fn client_key(state: AppState) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .and(with_state(state))
        .map(|forwarded: Option<String>, remote: Option<SocketAddr>, state: AppState| {
            state
                .rate_limits
                .client_key(remote.map(|addr| addr.ip()), forwarded.as_deref())
        })
}

/// Reject with 429 once the limiter picked from [`RateLimits`] is exhausted
pub fn rate_limited(
    state: AppState,
    pick: fn(&RateLimits) -> &RateLimiter,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    client_key(state.clone())
        .and(with_state(state))
        .and_then(move |key: String, state: AppState| async move {
            pick(&state.rate_limits).check(&key).map_err(reject)
        })
        .untuple_one()
}

pub fn auth_limiter(limits: &RateLimits) -> &RateLimiter {
    &limits.auth
}

pub fn login_limiter(limits: &RateLimits) -> &RateLimiter {
    &limits.login
}

pub fn api_limiter(limits: &RateLimits) -> &RateLimiter {
    &limits.api
}

/// JSON request body of at most `limit` bytes
pub fn json_body<T>(limit: u64) -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(limit).and(warp::body::json())
}

/// Resolve the bearer token to an active credential
pub fn authenticated(
    state: AppState,
) -> impl Filter<Extract = (Credential,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            let token = header
                .as_deref()
                .and_then(extract_bearer_token)
                .ok_or_else(|| reject(AuthError::missing_token()))?;
            state.credentials.authenticate(token).map_err(reject)
        })
}

/// A path segment holding a parcel id
pub fn parse_id(raw: &str) -> Result<Uuid, Rejection> {
    Uuid::parse_str(raw)
        .map_err(|_| reject(IntakeError::Validation(format!("Invalid parcel id '{}'", raw))))
}
