use crate::error::IntakeError;
use crate::logging::{log_error, log_warn};
use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

/// An [`IntakeError`] travelling through warp as a rejection
#[derive(Debug)]
pub struct ApiRejection(pub IntakeError);

impl warp::reject::Reject for ApiRejection {}

pub fn reject(err: impl Into<IntakeError>) -> warp::Rejection {
    warp::reject::custom(ApiRejection(err.into()))
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit))
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

#[derive(Serialize)]
struct Success<'a, T: Serialize> {
    status: &'static str,
    data: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a serde_json::Value>,
}

#[derive(Serialize)]
struct Failure<'a> {
    status: &'static str,
    error: ErrorDetail<'a>,
}

pub fn success<T: Serialize>(status: StatusCode, data: &T) -> Response {
    warp::reply::with_status(
        warp::reply::json(&Success {
            status: "success",
            data,
            pagination: None,
        }),
        status,
    )
    .into_response()
}

pub fn ok<T: Serialize>(data: &T) -> Response {
    success(StatusCode::OK, data)
}

pub fn paginated<T: Serialize>(data: &T, pagination: Pagination) -> Response {
    warp::reply::json(&Success {
        status: "success",
        data,
        pagination: Some(pagination),
    })
    .into_response()
}

pub fn failure(
    status: StatusCode,
    code: &str,
    message: &str,
    details: Option<&serde_json::Value>,
) -> Response {
    warp::reply::with_status(
        warp::reply::json(&Failure {
            status: "error",
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }),
        status,
    )
    .into_response()
}

/// JSON body for an application error
pub fn error_response(err: &IntakeError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        log_error("http", &format!("{} ({})", err, status)).unwrap_or_default();
    }

    // Internal details stay in the log
    let (message, details) = match err {
        IntakeError::Auth(auth) => (auth.message().to_string(), auth.details()),
        _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
            ("Internal server error".to_string(), None)
        }
        _ => (err.to_string(), None),
    };

    failure(status, err.code(), &message, details)
}

/// Turn every rejection into the JSON error envelope
pub async fn handle_rejection(rejection: warp::Rejection) -> Result<Response, Infallible> {
    if let Some(ApiRejection(err)) = rejection.find::<ApiRejection>() {
        return Ok(error_response(err));
    }

    let (status, code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "Request body is too large".to_string(),
        )
    } else if let Some(e) = rejection.find::<warp::reject::UnsupportedMediaType>() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "VALIDATION_ERROR", e.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed".to_string(),
        )
    } else if let Some(e) = rejection.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
    } else {
        log_warn("http", &format!("Unhandled rejection: {:?}", rejection)).unwrap_or_default();
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERVER_ERROR",
            "Internal server error".to_string(),
        )
    };

    Ok(failure(status, code, &message, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = error_response(&AuthError::too_many_attempts("slow down", 60).into());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "TOO_MANY_ATTEMPTS");
        assert_eq!(body["error"]["message"], "slow down");
        assert_eq!(body["error"]["details"]["retryAfter"], 60);
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let response = error_response(&IntakeError::Other("disk on fire".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[test]
    fn test_pagination_pages() {
        assert_eq!(Pagination::new(1, 10, 0).pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).pages, 1);
        assert_eq!(Pagination::new(2, 10, 11).pages, 2);
    }
}
