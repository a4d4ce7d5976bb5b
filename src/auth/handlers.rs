use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    auth::{
        cookies::{bearer_token, cleared_cookies, read_cookie, session_cookies, REFRESH_COOKIE},
        dto::{LoginData, LoginRequest, PublicUser, RefreshRequest, RegisterForm},
        extractors::AuthUser,
        jwt::TokenPair,
        services,
    },
    error::{ApiResponse, AppError},
    images::services::UploadItem,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB, avatar + cover
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/current-user", get(current_user))
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    AppError::Validation(format!("Invalid multipart body: {e}"))
}

async fn read_register_form(mp: &mut Multipart) -> Result<RegisterForm, AppError> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(bad_multipart)?;
                if body.is_empty() {
                    continue;
                }
                let item = Some(UploadItem { body, content_type });
                if name == "avatar" {
                    form.avatar = item;
                } else {
                    form.cover_image = item;
                }
            }
            "username" | "userName" => form.username = Some(field.text().await.map_err(bad_multipart)?),
            "fullName" => form.full_name = Some(field.text().await.map_err(bad_multipart)?),
            "email" => form.email = Some(field.text().await.map_err(bad_multipart)?),
            "password" => form.password = Some(field.text().await.map_err(bad_multipart)?),
            _ => {}
        }
    }
    Ok(form)
}

/// POST /users/register (multipart: username, fullName, email, password, avatar, coverImage?)
#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<PublicUser>>), AppError> {
    let form = read_register_form(&mut mp).await?;
    let user = services::register_user(&state, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED,
            user,
            "User registered successfully",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(HeaderMap, Json<ApiResponse<LoginData>>), AppError> {
    let Json(payload) = payload?;
    let data = services::login_user(&state, payload).await?;
    let headers = session_cookies(
        &data.tokens,
        state.tokens.access_ttl(),
        state.tokens.refresh_ttl(),
        state.config.cookie_secure,
    )?;
    Ok((
        headers,
        Json(ApiResponse::new(
            StatusCode::OK,
            data,
            "User logged in successfully",
        )),
    ))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<(HeaderMap, Json<ApiResponse<Value>>), AppError> {
    services::logout_user(&state, user.id).await?;
    let headers = cleared_cookies(state.config.cookie_secure)?;
    Ok((
        headers,
        Json(ApiResponse::new(StatusCode::OK, json!({}), "User logged out")),
    ))
}

/// POST /users/refresh-token: token from the cookie, a bearer header or `{ "refreshToken" }`.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<(HeaderMap, Json<ApiResponse<TokenPair>>), AppError> {
    let presented = read_cookie(&headers, REFRESH_COOKIE)
        .or_else(|| bearer_token(&headers))
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let pair = services::refresh_session(&state, presented).await?;
    let cookies = session_cookies(
        &pair,
        state.tokens.access_ttl(),
        state.tokens.refresh_ttl(),
        state.config.cookie_secure,
    )?;
    Ok((
        cookies,
        Json(ApiResponse::new(StatusCode::OK, pair, "Access token refreshed")),
    ))
}

#[instrument(skip_all)]
pub async fn current_user(AuthUser(user): AuthUser) -> Json<ApiResponse<PublicUser>> {
    Json(ApiResponse::new(
        StatusCode::OK,
        PublicUser::from(user),
        "Current user fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{
            header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
            Request, Response,
        },
    };
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_app;

    const BOUNDARY: &str = "X-USERHUB-BOUNDARY";

    fn multipart_body(fields: &[(&str, &str)], with_avatar: bool) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if with_avatar {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"\x89PNG\r\n\x1a\nfake-image");
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn register_request(username: &str, email: &str, with_avatar: bool) -> Request<Body> {
        let fields = [
            ("username", username),
            ("fullName", "Alice Liddell"),
            ("email", email),
            ("password", "Secret123"),
        ];
        Request::post("/api/v1/users/register")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(&fields, with_avatar)))
            .unwrap()
    }

    fn login_request() -> Request<Body> {
        Request::post("/api/v1/users/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "username": "alice", "password": "Secret123" }).to_string(),
            ))
            .unwrap()
    }

    async fn body_json(res: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookie(res: &Response<Body>, name: &str) -> Option<String> {
        res.headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| {
                v.split(';')
                    .next()
                    .and_then(|kv| kv.split_once('='))
                    .filter(|(k, _)| *k == name)
                    .map(|(_, v)| v.to_string())
            })
    }

    #[tokio::test]
    async fn register_login_refresh_and_reuse() {
        let app = build_app(AppState::fake());

        let res = app
            .clone()
            .oneshot(register_request("alice", "alice@x.com", true))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = body_json(res).await;
        let user = &body["data"];
        assert_eq!(user["username"], "alice");
        assert!(user.get("password").is_none());
        assert!(user.get("passwordHash").is_none());
        assert!(user.get("refreshToken").is_none());
        let user_id = user["id"].as_str().unwrap().to_string();

        let res = app.clone().oneshot(login_request()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 2);
        let old_refresh = set_cookie(&res, "refreshToken").unwrap();
        assert!(set_cookie(&res, "accessToken").is_some());
        let body = body_json(res).await;
        assert_eq!(body["data"]["user"]["id"], user_id.as_str());
        assert_eq!(body["data"]["refreshToken"], old_refresh.as_str());

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/refresh-token")
                    .header(COOKIE, format!("refreshToken={old_refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let new_refresh = set_cookie(&res, "refreshToken").unwrap();
        assert_ne!(new_refresh, old_refresh);

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/refresh-token")
                    .header(AUTHORIZATION, format!("Bearer {old_refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(res).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn logout_clears_cookies_and_revokes_refresh() {
        let app = build_app(AppState::fake());
        app.clone()
            .oneshot(register_request("alice", "alice@x.com", true))
            .await
            .unwrap();
        let res = app.clone().oneshot(login_request()).await.unwrap();
        let access = set_cookie(&res, "accessToken").unwrap();
        let refresh = set_cookie(&res, "refreshToken").unwrap();

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/logout")
                    .header(COOKIE, format!("accessToken={access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(set_cookie(&res, "accessToken").as_deref(), Some(""));
        assert_eq!(set_cookie(&res, "refreshToken").as_deref(), Some(""));

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/refresh-token")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "refreshToken": refresh }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_accepts_json_body_and_current_user_accepts_bearer() {
        let app = build_app(AppState::fake());
        app.clone()
            .oneshot(register_request("alice", "alice@x.com", true))
            .await
            .unwrap();
        let res = app.clone().oneshot(login_request()).await.unwrap();
        let refresh = set_cookie(&res, "refreshToken").unwrap();

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/refresh-token")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "refreshToken": refresh }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        let access = body["data"]["accessToken"].as_str().unwrap().to_string();

        let res = app
            .clone()
            .oneshot(
                Request::get("/api/v1/users/current-user")
                    .header(AUTHORIZATION, format!("Bearer {access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["data"]["email"], "alice@x.com");
    }

    #[tokio::test]
    async fn register_errors_map_to_statuses() {
        let app = build_app(AppState::fake());

        let res = app
            .clone()
            .oneshot(register_request("alice", "alice@x.com", false))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(register_request("alice", "alice@x.com", true))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = app
            .clone()
            .oneshot(register_request("alice", "new@x.com", true))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body = body_json(res).await;
        assert_eq!(body["statusCode"], 409);
    }

    #[tokio::test]
    async fn malformed_login_bodies_get_the_error_envelope() {
        let app = build_app(AppState::fake());
        let bodies = [
            (Some("application/json"), json!({ "username": "alice" }).to_string()),
            (Some("application/json"), r#"{"username":"#.to_string()),
            (Some("application/json"), r#"{"username": 5, "password": "x"}"#.to_string()),
            (None, json!({ "username": "alice", "password": "x" }).to_string()),
        ];

        for (content_type, body) in bodies {
            let mut req = Request::post("/api/v1/users/login");
            if let Some(ct) = content_type {
                req = req.header(CONTENT_TYPE, ct);
            }
            let res = app
                .clone()
                .oneshot(req.body(Body::from(body.clone())).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body}");
            let json = body_json(res).await;
            assert_eq!(json["statusCode"], 400, "{body}");
            assert_eq!(json["success"], false, "{body}");
            assert!(!json["message"].as_str().unwrap_or_default().is_empty());
        }
    }
}
