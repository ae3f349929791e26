use super::filters::{
    auth_limiter, authenticated, json_body, login_limiter, rate_limited, with_state,
};
use super::response::{self, reject};
use super::AppState;
use crate::auth::{AuthError, AuthErrorCode, Credential, Registration};
use crate::error::IntakeError;
use crate::logging::{log_info, log_warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use warp::filters::BoxedFilter;
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const BODY_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

#[derive(Serialize)]
struct Session<'a> {
    credential: &'a Credential,
    token: &'a str,
}

pub fn routes(state: AppState) -> BoxedFilter<(Response,)> {
    let register = warp::path("auth")
        .and(warp::path("register"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(state.clone(), auth_limiter))
        .and(with_state(state.clone()))
        .and(json_body::<Registration>(BODY_LIMIT))
        .and_then(register);

    let login = warp::path("auth")
        .and(warp::path("login"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(state.clone(), login_limiter))
        .and(with_state(state.clone()))
        .and(json_body::<LoginRequest>(BODY_LIMIT))
        .and_then(login);

    let logout = warp::path("auth")
        .and(warp::path("logout"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and_then(logout);

    let me = warp::path("auth")
        .and(warp::path("me"))
        .and(warp::path::end())
        .and(warp::get())
        .and(authenticated(state.clone()))
        .map(|credential: Credential| response::ok(&credential));

    let check = warp::path("auth")
        .and(warp::path("check"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state(state.clone()))
        .map(check);

    let change_password = warp::path("auth")
        .and(warp::path("password"))
        .and(warp::path::end())
        .and(warp::put())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(json_body::<ChangePasswordRequest>(BODY_LIMIT))
        .and_then(change_password);

    let forgot = warp::path("auth")
        .and(warp::path!("password" / "forgot"))
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<ForgotPasswordRequest>(BODY_LIMIT))
        .and_then(forgot_password);

    let reset = warp::path("auth")
        .and(warp::path!("password" / "reset"))
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<ResetPasswordRequest>(BODY_LIMIT))
        .and_then(reset_password);

    let google = warp::path("auth")
        .and(warp::path("google"))
        .and(warp::path::end())
        .and(warp::get())
        .and(rate_limited(state.clone(), auth_limiter))
        .and(with_state(state.clone()))
        .and_then(google_redirect);

    let google_callback = warp::path("auth")
        .and(warp::path!("google" / "callback"))
        .and(warp::get())
        .and(rate_limited(state.clone(), auth_limiter))
        .and(with_state(state.clone()))
        .and(warp::query::<HashMap<String, String>>())
        .and_then(google_callback);

    register
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(me)
        .unify()
        .or(check)
        .unify()
        .or(change_password)
        .unify()
        .or(forgot)
        .unify()
        .or(reset)
        .unify()
        .or(google)
        .unify()
        .or(google_callback)
        .unify()
        .boxed()
}

fn session_response(status: StatusCode, credential: &Credential, token: &str) -> Response {
    response::success(status, &Session { credential, token })
}

async fn register(state: AppState, registration: Registration) -> Result<Response, Rejection> {
    let credential = state
        .credentials
        .register_user(registration)
        .await
        .map_err(reject)?;
    let token = state.credentials.issue_token(&credential).map_err(reject)?;
    Ok(session_response(StatusCode::CREATED, &credential, &token))
}

async fn login(state: AppState, request: LoginRequest) -> Result<Response, Rejection> {
    let outcome = state
        .credentials
        .login_with_credentials(&request.email, &request.password)
        .await
        .map_err(reject)?;
    Ok(session_response(
        StatusCode::OK,
        &outcome.credential,
        &outcome.token,
    ))
}

async fn logout(state: AppState, credential: Credential) -> Result<Response, Rejection> {
    state
        .credentials
        .revoke_all_tokens(&credential.user_id)
        .map_err(reject)?;
    log_info("auth", &format!("{} logged out", credential.email)).unwrap_or_default();
    Ok(response::ok(&json!({ "message": "Logout successful" })))
}

fn check(header: Option<String>, state: AppState) -> Response {
    let authenticated = header
        .as_deref()
        .and_then(crate::auth::extract_bearer_token)
        .is_some_and(|token| state.credentials.authenticate(token).is_ok());
    let status = if authenticated {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    response::success(status, &json!({ "authenticated": authenticated }))
}

async fn change_password(
    state: AppState,
    credential: Credential,
    request: ChangePasswordRequest,
) -> Result<Response, Rejection> {
    let updated = state
        .credentials
        .update_password(&credential.user_id, &request.password)
        .await
        .map_err(reject)?
        .ok_or_else(|| {
            reject(AuthError::forbidden(
                "Password login is not enabled for this account",
            ))
        })?;

    // Other sessions end with the old password
    state
        .credentials
        .revoke_all_tokens(&updated.user_id)
        .map_err(reject)?;
    let refreshed = state
        .credentials
        .find_by_user_id(&updated.user_id)
        .map_err(reject)?
        .unwrap_or(updated);
    let token = state.credentials.issue_token(&refreshed).map_err(reject)?;
    Ok(session_response(StatusCode::OK, &refreshed, &token))
}

/// 202 whether or not the email is registered
async fn forgot_password(
    state: AppState,
    request: ForgotPasswordRequest,
) -> Result<Response, Rejection> {
    match state
        .credentials
        .generate_password_reset_token(&request.email)
    {
        Ok(token) => {
            // No mailer is wired up; the operator relays the token
            log_info(
                "auth",
                &format!("Password reset token for {}: {}", request.email, token),
            )
            .unwrap_or_default();
        }
        Err(IntakeError::Auth(e)) => {
            log_warn(
                "auth",
                &format!("Password reset for {} refused: {}", request.email, e),
            )
            .unwrap_or_default();
        }
        Err(e) => return Err(reject(e)),
    }

    Ok(response::success(
        StatusCode::ACCEPTED,
        &json!({ "message": "If the account exists, a password reset link has been sent" }),
    ))
}

async fn reset_password(
    state: AppState,
    request: ResetPasswordRequest,
) -> Result<Response, Rejection> {
    let credential = state
        .credentials
        .reset_password_with_token(&request.token, &request.password)
        .await
        .map_err(reject)?;
    state
        .credentials
        .revoke_all_tokens(&credential.user_id)
        .map_err(reject)?;
    Ok(response::ok(&json!({ "message": "Password has been reset" })))
}

fn google_not_configured() -> Rejection {
    reject(AuthError::new(
        AuthErrorCode::ProviderError,
        "Google sign-in is not configured",
        503,
    ))
}

async fn google_redirect(state: AppState) -> Result<Response, Rejection> {
    let google = state.google.as_ref().ok_or_else(google_not_configured)?;
    let url = google.authorization_url().map_err(reject)?;
    let uri = url
        .parse::<Uri>()
        .map_err(|e| reject(AuthError::server_error(format!("Invalid redirect: {}", e))))?;
    Ok(warp::redirect::temporary(uri).into_response())
}

async fn google_callback(
    state: AppState,
    params: HashMap<String, String>,
) -> Result<Response, Rejection> {
    let google = state.google.as_ref().ok_or_else(google_not_configured)?;

    if let Some(error) = params.get("error") {
        return Err(reject(AuthError::provider_error(format!(
            "Google sign-in failed: {}",
            error
        ))));
    }
    let state_param = params.get("state").map(String::as_str).unwrap_or_default();
    if !google.consume_state(state_param) {
        return Err(reject(AuthError::unauthorized("Invalid or expired OAuth state")));
    }
    let code = params
        .get("code")
        .ok_or_else(|| reject(AuthError::provider_error("Missing authorization code")))?;

    let profile = google.exchange_code(code).await.map_err(reject)?;
    let login = profile.into_social_login().map_err(reject)?;
    let credential = state
        .credentials
        .create_social_login(login)
        .map_err(reject)?;
    let token = state.credentials.issue_token(&credential).map_err(reject)?;
    Ok(session_response(StatusCode::OK, &credential, &token))
}

#[cfg(test)]
mod tests {
    use super::super::routes as api_routes;
    use super::super::test_support;
    use serde_json::{json, Value};
    use warp::http::StatusCode;

    fn body(res: &warp::http::Response<bytes::Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn test_register_login_me_logout() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request()
            .method("POST")
            .path("/auth/register")
            .json(&json!({
                "email": "Ada@Example.com",
                "password": "Analytical#1843",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let registered = body(&res);
        assert_eq!(registered["data"]["credential"]["email"], "ada@example.com");
        assert!(registered["data"]["credential"].get("passwordHash").is_none());

        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .json(&json!({ "email": "ada@example.com", "password": "Analytical#1843" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let token = body(&res)["data"]["token"].as_str().unwrap().to_string();

        let res = warp::test::request()
            .path("/auth/me")
            .header("authorization", format!("Bearer {}", token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["data"]["firstName"], "Ada");

        let res = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .header("authorization", format!("Bearer {}", token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        // The token was revoked
        let res = warp::test::request()
            .path("/auth/me")
            .header("authorization", format!("Bearer {}", token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(&res)["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_missing_and_bad_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request().path("/auth/me").reply(&api).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(&res)["error"]["code"], "MISSING_TOKEN");

        let res = warp::test::request()
            .path("/auth/check")
            .header("authorization", "Bearer garbage")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(&res)["data"]["authenticated"], false);
    }

    #[tokio::test]
    async fn test_login_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        for _ in 0..5 {
            let res = warp::test::request()
                .method("POST")
                .path("/auth/login")
                .remote_addr("198.51.100.7:4000".parse().unwrap())
                .json(&json!({ "email": "nobody@example.com", "password": "wrong" }))
                .reply(&api)
                .await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .remote_addr("198.51.100.7:4000".parse().unwrap())
            .json(&json!({ "email": "nobody@example.com", "password": "wrong" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body(&res)["error"]["code"], "TOO_MANY_ATTEMPTS");
    }

    #[tokio::test]
    async fn test_forgot_password_does_not_reveal_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request()
            .method("POST")
            .path("/auth/password/forgot")
            .json(&json!({ "email": "ghost@example.com" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let res = warp::test::request()
            .method("POST")
            .path("/auth/password/reset")
            .json(&json!({ "token": "not-a-real-token", "password": "Whatever#123" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["error"]["code"], "PASSWORD_RESET_INVALID");
    }

    #[tokio::test]
    async fn test_google_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request().path("/auth/google").reply(&api).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(&res)["error"]["code"], "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn test_weak_password_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request()
            .method("POST")
            .path("/auth/register")
            .json(&json!({ "email": "weak@example.com", "password": "short" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["error"]["code"], "PASSWORD_TOO_WEAK");
    }
}
