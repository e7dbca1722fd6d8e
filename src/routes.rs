use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use constant_time_eq::constant_time_eq;
use std::sync::Arc;

use crate::{
    config::{AppConfig, TokenMode},
    error::{ApiError, ApiResult},
    models::*,
    moodle::MoodleClient,
    service::{LmsService, TokenService},
    util,
};

pub const API_KEY_HEADER: &str = "api-key";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub lms: LmsService,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(config.moodle_timeout)
            .build()?;
        Ok(Self {
            lms: LmsService::new(MoodleClient::new(http.clone(), config.clone()), config.clone()),
            tokens: TokenService::new(http, config.clone()),
            config,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/cursos", get(list_cursos))
        .route("/cursos/:curso_id", get(get_curso))
        .route("/user-lms-progress", get(user_progress))
        .route("/redeem", post(redeem))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let tokens = match state.config.token_mode {
        TokenMode::Static => Router::new().route("/token", post(validate_token)),
        TokenMode::Delegated { .. } => Router::new().route("/token/:token", get(redirect_token)),
    };

    Router::new()
        .route("/", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .merge(protected)
        .merge(tokens)
        .with_state(state)
}

/// Rejects before any extractor or upstream call runs.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let valid = match req.headers().get(API_KEY_HEADER) {
        None => return Err(ApiError::Unauthorized("missing api-key".into())),
        Some(v) => constant_time_eq(v.as_bytes(), state.config.api_key.as_bytes()),
    };
    if !valid {
        tracing::debug!("rejected request with invalid api-key");
        return Err(ApiError::Unauthorized("invalid api-key".into()));
    }
    Ok(next.run(req).await)
}

async fn list_cursos(
    State(state): State<AppState>,
    query: Result<Query<CursosQuery>, QueryRejection>,
) -> ApiResult<Json<LearningPathsResponse>> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let lp_id = q.lp_id.as_deref().filter(|id| !id.is_empty());
    let paths = state.lms.learning_paths(lp_id).await?;
    Ok(Json(paths.into()))
}

// Returns the filtered catalogue rather than a bare Course.
async fn get_curso(
    State(state): State<AppState>,
    Path(curso_id): Path<String>,
) -> ApiResult<Json<LearningPathsResponse>> {
    let paths = state.lms.learning_paths(Some(&curso_id)).await?;
    Ok(Json(paths.into()))
}

async fn user_progress(
    State(state): State<AppState>,
    query: Result<Query<ProgressQuery>, QueryRejection>,
) -> ApiResult<Json<UserLmsProgressResponse>> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if q.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user-id is required".into()));
    }
    Ok(Json(state.lms.progress(&q.user_id, &q.lp_id).await?))
}

async fn redeem(
    State(state): State<AppState>,
    payload: Result<Json<RedeemRequest>, JsonRejection>,
) -> ApiResult<Json<RedeemResponse>> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if req.card_codes.iter().all(|c| c.trim().is_empty()) {
        return Err(ApiError::BadRequest("cardCodes must not be empty".into()));
    }
    if !util::looks_like_email(&req.user_email) {
        return Err(ApiError::BadRequest("userEmail is not a valid e-mail".into()));
    }
    if req.lpid.trim().is_empty() {
        return Err(ApiError::BadRequest("lpid is required".into()));
    }

    Ok(Json(state.lms.redeem(&req).await?))
}

async fn validate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TokenValidation>> {
    let token = headers.get("token").and_then(|v| v.to_str().ok());
    Ok(Json(state.tokens.validate_static(token)?))
}

async fn redirect_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let TokenMode::Delegated {
        validation_url,
        redirect_url,
    } = &state.config.token_mode
    else {
        return Err(ApiError::NotFound("token redirect is not enabled".into()));
    };

    let identity = state.tokens.validate_delegated(validation_url, &token).await?;
    tracing::info!(user_id = %identity.user_id, lp_id = %identity.lp_id, "token accepted");
    Ok((StatusCode::FOUND, [(header::LOCATION, redirect_url.clone())]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const PATH: &str = "/webservice/rest/server.php";

    fn app(server: &MockServer, token_mode: TokenMode) -> Router {
        let config = AppConfig {
            moodle_url: server.url(PATH),
            moodle_token: Some("t".into()),
            moodle_timeout: Duration::from_secs(5),
            category_name: "Rutas".into(),
            token_mode,
            ..AppConfig::default()
        };
        router(AppState::new(config).unwrap())
    }

    fn catalogue(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .body_includes("wsfunction=core_course_get_categories");
            then.status(200).json_body(json!([{"id": 4, "name": "Rutas"}]));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .body_includes("wsfunction=core_course_get_courses_by_field");
            then.status(200).json_body(json!({"courses": [
                {"id": 10, "fullname": "Álgebra", "startdate": 1_700_000_000},
                {"id": 11, "shortname": "FIS"}
            ]}));
        });
    }

    async fn json_body(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(k) = key {
            b = b.header(API_KEY_HEADER, k);
        }
        b.body(Body::empty()).unwrap()
    }

    fn redeem_request(key: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/redeem")
            .header(API_KEY_HEADER, key)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn root_is_public() {
        let server = MockServer::start_async().await;
        let res = app(&server, TokenMode::Static)
            .oneshot(get("/", None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn protected_routes_reject_bad_keys_without_calling_moodle() {
        let server = MockServer::start_async().await;
        let upstream = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!([]));
        });

        for uri in [
            "/cursos",
            "/cursos/10",
            "/user-lms-progress?user-id=5&lp-id=lp-1",
        ] {
            for key in [None, Some("wrong")] {
                let res = app(&server, TokenMode::Static)
                    .oneshot(get(uri, key))
                    .await
                    .unwrap();
                assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{uri} {key:?}");
            }
        }
        let res = app(&server, TokenMode::Static)
            .oneshot(redeem_request("wrong", json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        upstream.assert_calls(0);
    }

    #[tokio::test]
    async fn lists_every_course_in_the_category() {
        let server = MockServer::start_async().await;
        catalogue(&server);

        let res = app(&server, TokenMode::Static)
            .oneshot(get("/cursos", Some("test-api-key")))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["data"][0]["name"], "Álgebra");
        assert_eq!(body["data"][1]["name"], "FIS");
        assert_eq!(body["data"][0]["end_date"], Value::Null);
    }

    #[tokio::test]
    async fn curso_by_id_filters_and_404s() {
        let server = MockServer::start_async().await;
        catalogue(&server);
        let app = app(&server, TokenMode::Static);

        let res = app
            .clone()
            .oneshot(get("/cursos/11", Some("test-api-key")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["id"], "11");

        let res = app
            .oneshot(get("/cursos?lp-id=99", Some("test-api-key")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["error"], "not_found");
    }

    #[tokio::test]
    async fn redeem_existing_user_end_to_end() {
        let server = MockServer::start_async().await;
        catalogue(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .body_includes("wsfunction=core_user_get_users_by_field");
            then.status(200).json_body(json!([{"id": 77}]));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .body_includes("wsfunction=core_user_create_users");
            then.status(200).json_body(json!([{"id": 1}]));
        });
        let enrol = server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .body_includes("wsfunction=enrol_manual_enrol_users");
            then.status(200).body("null");
        });

        let res = app(&server, TokenMode::Static)
            .oneshot(redeem_request(
                "test-api-key",
                json!({
                    "cardCodes": ["A1"],
                    "firstName": "Ana",
                    "lastName": "Ruiz",
                    "userEmail": "ana@example.com",
                    "dueDate": "2026-12-31",
                    "lpid": "lp-1"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"][0]["lp_id"], "lp-1");
        assert_eq!(body["data"][0]["dueDate"], "2026-12-31");
        create.assert_calls(0);
        enrol.assert_calls(1);
    }

    #[tokio::test]
    async fn redeem_validates_input_before_calling_moodle() {
        let server = MockServer::start_async().await;
        let upstream = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!([]));
        });
        let app = app(&server, TokenMode::Static);

        let bad_email = json!({
            "cardCodes": ["A1"], "firstName": "Ana", "lastName": "Ruiz",
            "userEmail": "not-an-email", "dueDate": "2026-12-31", "lpid": "lp-1"
        });
        let no_cards = json!({
            "cardCodes": [], "firstName": "Ana", "lastName": "Ruiz",
            "userEmail": "ana@example.com", "dueDate": "2026-12-31", "lpid": "lp-1"
        });
        let missing_fields = json!({ "cardCodes": ["A1"] });

        for body in [bad_email, no_cards, missing_fields] {
            let res = app
                .clone()
                .oneshot(redeem_request("test-api-key", body))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
        upstream.assert_calls(0);
    }

    #[tokio::test]
    async fn malformed_progress_query_is_json_bad_request() {
        let server = MockServer::start_async().await;
        let upstream = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!([]));
        });

        let res = app(&server, TokenMode::Static)
            .oneshot(get("/user-lms-progress?lp-id=x", Some("test-api-key")))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = json_body(res).await;
        assert_eq!(body["error"], "bad_request");
        assert!(body["message"].as_str().unwrap().contains("user-id"));
        upstream.assert_calls(0);
    }

    #[tokio::test]
    async fn upstream_exception_surfaces_as_bad_gateway() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!({
                "exception": "webservice_access_exception",
                "message": "Access control exception"
            }));
        });

        let res = app(&server, TokenMode::Static)
            .oneshot(get("/cursos", Some("test-api-key")))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(res).await;
        assert_eq!(body["error"], "gateway_application_error");
        assert_eq!(body["message"], "Access control exception");
    }

    #[tokio::test]
    async fn static_token_endpoint() {
        let server = MockServer::start_async().await;
        let app = app(&server, TokenMode::Static);

        let ok = Request::builder()
            .method("POST")
            .uri("/token")
            .header("token", "dummy-token-123")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(ok).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            json_body(res).await,
            json!({"user_id": "user-001", "lp_id": "lp-001"})
        );

        let bad = Request::builder()
            .method("POST")
            .uri("/token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.oneshot(bad).await.unwrap().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn delegated_token_redirects() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/validate").query_param("token", "abc");
            then.status(200).json_body(json!({"user_id": "u1", "lp_id": "lp-1"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/validate").query_param("token", "nope");
            then.status(404);
        });
        let app = app(
            &server,
            TokenMode::Delegated {
                validation_url: server.url("/validate"),
                redirect_url: "https://campus.example/home".into(),
            },
        );

        let res = app.clone().oneshot(get("/token/abc", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(
            res.headers()[header::LOCATION],
            "https://campus.example/home"
        );

        let res = app.oneshot(get("/token/nope", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
