use super::filters::{api_limiter, authenticated, json_body, parse_id, rate_limited, with_state};
use super::multipart::{max_form_size, parse_parcel_form};
use super::response::{self, reject, Pagination};
use super::AppState;
use crate::auth::Credential;
use crate::logging::log_info;
use crate::parcels::{ParcelQuery, ParcelUpdate};
use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::Response;
use warp::{Filter, Rejection};

const BODY_LIMIT: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub note: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvidersView {
    default_provider: String,
    available: Vec<String>,
    configured: Vec<String>,
}

/// Bearer auth plus the general API rate limit
fn guarded(state: &AppState) -> BoxedFilter<(Credential,)> {
    rate_limited(state.clone(), api_limiter)
        .and(authenticated(state.clone()))
        .boxed()
}

pub fn routes(state: AppState) -> BoxedFilter<(Response,)> {
    let create = warp::path!("api" / "v1" / "parcels")
        .and(warp::post())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and(warp::multipart::form().max_length(max_form_size(&state.uploads)))
        .and_then(create_parcel);

    let list = warp::path!("api" / "v1" / "parcels")
        .and(warp::get())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and(warp::query::<ParcelQuery>())
        .and_then(list_parcels);

    let stats = warp::path!("api" / "v1" / "parcels" / "stats")
        .and(warp::get())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and_then(parcel_stats);

    let search = warp::path!("api" / "v1" / "parcels" / "search")
        .and(warp::get())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and(warp::query::<SearchQuery>())
        .and_then(search_parcels);

    let get = warp::path!("api" / "v1" / "parcels" / String)
        .and(warp::get())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and_then(get_parcel);

    let update = warp::path!("api" / "v1" / "parcels" / String)
        .and(warp::put())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and(json_body::<ParcelUpdate>(BODY_LIMIT))
        .and_then(update_parcel);

    let delete = warp::path!("api" / "v1" / "parcels" / String)
        .and(warp::delete())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and_then(delete_parcel);

    let reprocess = warp::path!("api" / "v1" / "parcels" / String / "reprocess-ocr")
        .and(warp::post())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and_then(reprocess_ocr);

    let mark_returned = warp::path!("api" / "v1" / "parcels" / String / "return")
        .and(warp::post())
        .and(guarded(&state))
        .and(with_state(state.clone()))
        .and(optional_json::<ReturnRequest>())
        .and_then(return_parcel);

    create
        .or(list)
        .unify()
        .or(stats)
        .unify()
        .or(search)
        .unify()
        .or(get)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(reprocess)
        .unify()
        .or(mark_returned)
        .unify()
        .boxed()
}

pub fn storage_routes(state: AppState) -> BoxedFilter<(Response,)> {
    warp::path!("api" / "v1" / "storage" / "providers")
        .and(warp::get())
        .and(guarded(&state))
        .and(with_state(state))
        .map(|_credential: Credential, state: AppState| {
            let storage = state.parcels.storage();
            response::ok(&ProvidersView {
                default_provider: storage.default_provider_name().to_string(),
                available: storage.available_providers(),
                configured: storage.configured_providers(),
            })
        })
        .boxed()
}

/// JSON body when one was sent, the default otherwise
fn optional_json<T>() -> BoxedFilter<(T,)>
where
    T: serde::de::DeserializeOwned + Default + Send + 'static,
{
    json_body::<T>(BODY_LIMIT)
        .or(warp::any().map(T::default))
        .unify()
        .boxed()
}

async fn create_parcel(
    credential: Credential,
    state: AppState,
    form: FormData,
) -> Result<Response, Rejection> {
    let mut parcel = parse_parcel_form(form, &state.uploads)
        .await
        .map_err(reject)?;
    parcel.created_by = Some(credential.email.clone());

    let record = state.parcels.receive(parcel).await.map_err(reject)?;
    log_info(
        "http",
        &format!("{} received parcel {}", credential.email, record.id),
    )
    .unwrap_or_default();
    Ok(response::success(StatusCode::CREATED, &record))
}

async fn list_parcels(
    _credential: Credential,
    state: AppState,
    query: ParcelQuery,
) -> Result<Response, Rejection> {
    let page = state.parcels.list(&query).map_err(reject)?;
    let pagination = Pagination::new(page.page, page.limit, page.total);
    Ok(response::paginated(&page.items, pagination))
}

async fn parcel_stats(_credential: Credential, state: AppState) -> Result<Response, Rejection> {
    let stats = state.parcels.stats().map_err(reject)?;
    Ok(response::ok(&stats))
}

async fn search_parcels(
    _credential: Credential,
    state: AppState,
    query: SearchQuery,
) -> Result<Response, Rejection> {
    let results = state
        .parcels
        .search(query.q.as_deref().unwrap_or_default())
        .map_err(reject)?;
    Ok(response::ok(&results))
}

async fn get_parcel(
    id: String,
    _credential: Credential,
    state: AppState,
) -> Result<Response, Rejection> {
    let record = state.parcels.get(&parse_id(&id)?).map_err(reject)?;
    Ok(response::ok(&record))
}

async fn update_parcel(
    id: String,
    credential: Credential,
    state: AppState,
    mut update: ParcelUpdate,
) -> Result<Response, Rejection> {
    update.updated_by = Some(credential.email);
    let record = state
        .parcels
        .update(&parse_id(&id)?, update)
        .map_err(reject)?;
    Ok(response::ok(&record))
}

async fn delete_parcel(
    id: String,
    credential: Credential,
    state: AppState,
) -> Result<Response, Rejection> {
    let record = state
        .parcels
        .delete(&parse_id(&id)?)
        .await
        .map_err(reject)?;
    log_info(
        "http",
        &format!("{} deleted parcel {}", credential.email, record.id),
    )
    .unwrap_or_default();
    Ok(response::ok(&record))
}

async fn reprocess_ocr(
    id: String,
    _credential: Credential,
    state: AppState,
) -> Result<Response, Rejection> {
    let record = state
        .parcels
        .reprocess_ocr(&parse_id(&id)?)
        .await
        .map_err(reject)?;
    Ok(response::ok(&record))
}

async fn return_parcel(
    id: String,
    credential: Credential,
    state: AppState,
    request: ReturnRequest,
) -> Result<Response, Rejection> {
    let id = parse_id(&id)?;
    let record = state
        .parcels
        .mark_returned(&id, Some(credential.email.clone()))
        .map_err(reject)?;
    if let Some(note) = request.note {
        log_info(
            "parcels",
            &format!("Parcel {} returned by {}: {}", id, credential.email, note),
        )
        .unwrap_or_default();
    }
    Ok(response::ok(&record))
}

#[cfg(test)]
mod tests {
    use super::super::multipart::test_support::MultipartBody;
    use super::super::multipart::{PARCEL_IMAGES_FIELD, TRACKING_BARCODE_FIELD};
    use super::super::routes as api_routes;
    use super::super::{test_support, AppState};
    use crate::auth::Registration;
    use serde_json::{json, Value};
    use warp::http::StatusCode;

    fn body(res: &warp::http::Response<bytes::Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    async fn bearer(state: &AppState) -> String {
        let credential = state
            .credentials
            .register_user(Registration {
                email: "desk@example.com".to_string(),
                password: "Intake#Desk42".to_string(),
                first_name: "Front".to_string(),
                last_name: "Desk".to_string(),
                user_id: None,
            })
            .await
            .unwrap();
        format!(
            "Bearer {}",
            state.credentials.issue_token(&credential).unwrap()
        )
    }

    fn intake_form() -> (String, Vec<u8>) {
        MultipartBody::new()
            .file(TRACKING_BARCODE_FIELD, "label.png", "image/png", b"label-bytes")
            .file(PARCEL_IMAGES_FIELD, "front.jpg", "image/jpeg", b"front")
            .text("description", "Blue jacket")
            .text("channel", "xianyu")
            .text("quantity", "2")
            .finish()
    }

    #[tokio::test]
    async fn test_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_routes(test_support::state(dir.path()));

        let res = warp::test::request()
            .path("/api/v1/parcels")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(&res)["error"]["code"], "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn test_intake_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let token = bearer(&state).await;
        let api = api_routes(state);

        let (content_type, form) = intake_form();
        let res = warp::test::request()
            .method("POST")
            .path("/api/v1/parcels")
            .header("authorization", &token)
            .header("content-type", content_type)
            .body(form)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = body(&res);
        let id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["createdBy"], "desk@example.com");
        assert_eq!(created["data"]["channel"], "xianyu");
        assert_eq!(created["data"]["parcelImageUrls"].as_array().unwrap().len(), 1);
        assert_eq!(created["data"]["history"].as_array().unwrap().len(), 2);

        let res = warp::test::request()
            .path("/api/v1/parcels?status=pending&limit=5")
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let listed = body(&res);
        assert_eq!(listed["pagination"]["total"], 1);
        assert_eq!(listed["pagination"]["limit"], 5);

        let res = warp::test::request()
            .method("PUT")
            .path(&format!("/api/v1/parcels/{}", id))
            .header("authorization", &token)
            .json(&json!({ "category": "apparel", "trackingNumber": "SF1234567890" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let updated = body(&res);
        assert_eq!(updated["data"]["category"], "apparel");
        assert_eq!(updated["data"]["updatedBy"], "desk@example.com");

        let res = warp::test::request()
            .path("/api/v1/parcels/search?q=SF1234")
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(body(&res)["data"].as_array().unwrap().len(), 1);

        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/v1/parcels/{}/return", id))
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["data"]["status"], "returned");

        let res = warp::test::request()
            .path("/api/v1/parcels/stats")
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(body(&res)["data"]["total"], 1);

        let res = warp::test::request()
            .method("DELETE")
            .path(&format!("/api/v1/parcels/{}", id))
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .path(&format!("/api/v1/parcels/{}", id))
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_id_and_missing_barcode() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let token = bearer(&state).await;
        let api = api_routes(state);

        let res = warp::test::request()
            .path("/api/v1/parcels/not-a-uuid")
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["error"]["code"], "VALIDATION_ERROR");

        let (content_type, form) = MultipartBody::new().text("description", "no label").finish();
        let res = warp::test::request()
            .method("POST")
            .path("/api/v1/parcels")
            .header("authorization", &token)
            .header("content-type", content_type)
            .body(form)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body(&res)["error"]["message"],
            "Validation error: Tracking barcode image is required"
        );
    }

    #[tokio::test]
    async fn test_storage_providers() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let token = bearer(&state).await;
        let api = api_routes(state);

        let res = warp::test::request()
            .path("/api/v1/storage/providers")
            .header("authorization", &token)
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let data = &body(&res)["data"];
        assert_eq!(data["defaultProvider"], "local");
        assert_eq!(data["configured"], json!(["local"]));
    }
}
