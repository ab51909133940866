//! # Plex PIN 라우트 핸들러
//!
//! ## 엔드포인트
//! - `GET /api/plex/pin`                 → 새 PIN 발급: `{ pinCode, plexID }`
//! - `GET /api/plex/pin/check?plexID=…`  → PIN 폴링: `{ authenticated, authToken, connectionsAvailable }`
//!
//! 브라우저가 `check`를 주기적으로 호출합니다. 서버는 PIN을 저장하지 않으므로
//! 매 호출마다 `plexID`를 다시 받아야 합니다.
//!
//! 승인된 뒤 서버 연결 목록 조회가 실패해도 토큰은 돌려줍니다.
//! 이 경우 `connectionsAvailable`은 빈 배열이고 응답은 `warning`입니다.

use crate::error::AppError;
use crate::logging::{send_json, Action, ActionLevel, RequestContext, ResponseWriter};
use crate::plex::{self as plex_auth, PlexServerConnection};
use crate::routes::AppState;
use axum::extract::{rejection::QueryRejection, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /api/plex/pin` 응답 데이터
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinCreated {
    pub pin_code: String,
    #[serde(rename = "plexID")]
    pub plex_id: String,
}

/// `GET /api/plex/pin/check` 응답 데이터
///
/// 대기 중이면 `authToken`은 빈 문자열, `connectionsAvailable`은 `null`입니다.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinCheck {
    pub authenticated: bool,
    pub auth_token: String,
    pub connections_available: Option<Vec<PlexServerConnection>>,
}

#[derive(Debug, Deserialize)]
pub struct CheckPinQuery {
    #[serde(rename = "plexID")]
    pub plex_id: Option<String>,
}

/// `GET /api/plex/pin`: plex.tv에서 새 PIN을 발급받습니다.
pub async fn get_pin(
    State(state): State<AppState>,
    ctx: RequestContext,
    w: ResponseWriter,
) -> ResponseWriter {
    let action = ctx.log().add_action("Plex Get Pin Handler", ActionLevel::Info);
    let ctx = ctx.with_current_action(&action);

    match plex_auth::get_pin_code_and_id(&state.plex, &ctx).await {
        Ok(session) => {
            action.append_result("plex_id", &session.pin_id);
            action.complete();
            let data = PinCreated {
                pin_code: session.pin_code,
                plex_id: session.pin_id,
            };
            send_json(&w, Some(ctx.log()), Some(&data));
        }
        Err(_) => {
            action.escalate(ActionLevel::Error);
            action.complete();
            send_json::<Value>(&w, Some(ctx.log()), None);
        }
    }
    w
}

/// `GET /api/plex/pin/check?plexID=…`: PIN을 한 번 확인합니다.
///
/// 승인되었으면 토큰으로 접근 가능한 서버 연결 목록까지 조회합니다.
pub async fn check_pin(
    State(state): State<AppState>,
    ctx: RequestContext,
    w: ResponseWriter,
    query: Result<Query<CheckPinQuery>, QueryRejection>,
) -> ResponseWriter {
    let action = ctx.log().add_action("Plex Check Pin Handler", ActionLevel::Info);
    let ctx = ctx.with_current_action(&action);

    let Some(pin_id) = validate_pin_id(&action, query) else {
        action.complete();
        send_json::<Value>(&w, Some(ctx.log()), None);
        return w;
    };

    let session = match plex_auth::check_pin(&state.plex, &ctx, pin_id).await {
        Ok(session) => session,
        Err(_) => {
            action.escalate(ActionLevel::Error);
            action.complete();
            send_json::<Value>(&w, Some(ctx.log()), None);
            return w;
        }
    };

    if !session.is_authorized() {
        action.append_result("authenticated", &false);
        action.complete();
        let data = PinCheck {
            authenticated: false,
            auth_token: String::new(),
            connections_available: None,
        };
        send_json(&w, Some(ctx.log()), Some(&data));
        return w;
    }

    // the sub-action already carries the error, which makes this a warning
    let connections = plex_auth::get_server_connections(&state.plex, &ctx, &session.auth_token)
        .await
        .unwrap_or_default();

    action.append_result("authenticated", &true);
    action.append_result("connections", &connections.len());
    action.complete();
    let data = PinCheck {
        authenticated: true,
        auth_token: session.auth_token,
        connections_available: Some(connections),
    };
    send_json(&w, Some(ctx.log()), Some(&data));
    w
}

/// `plexID`는 plex.tv가 발급한 숫자 id여야 합니다.
/// 없거나 비었으면 "Missing PIN code", 숫자가 아니면 "Invalid PIN code" (둘 다 400).
fn validate_pin_id(
    parent: &Action,
    query: Result<Query<CheckPinQuery>, QueryRejection>,
) -> Option<u64> {
    let action = parent.add_sub_action("Validate Query Parameters", ActionLevel::Debug);
    let raw = match query {
        Ok(Query(q)) => q.plex_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()),
        Err(rejection) => {
            action.append_result("rejection", &rejection.body_text());
            None
        }
    };

    let pin_id = match raw {
        None => {
            action.fail(&AppError::missing_field("Missing PIN code", "plexID"));
            None
        }
        Some(raw) => match raw.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                action.fail(&AppError::invalid_field("Invalid PIN code", "plexID", &raw));
                None
            }
        },
    };
    action.complete();
    pin_id
}

#[cfg(test)]
mod tests {
    use super::get_pin;
    use crate::logging::{cancel_pair, ActionLevel, LogDocument, RequestContext, ResponseWriter};
    use crate::routes::{build_router, test_http};
    use crate::test_support::{spawn_stub, test_state, with_plex_timeout};
    use axum::{
        extract::{Path, Request, State},
        http::StatusCode,
        middleware::{self, Next},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn resources() -> Value {
        json!([{
            "name": "Home",
            "clientIdentifier": "s1",
            "provides": "server",
            "connections": [
                { "protocol": "https", "address": "10.0.0.5", "port": 32400, "local": true, "relay": false }
            ]
        }])
    }

    /// Plex stand-in: the first poll is pending, later polls are authorized.
    fn plex_stub(resources_status: StatusCode) -> Router {
        plex_stub_counting(resources_status, Arc::new(AtomicUsize::new(0)))
    }

    /// Same stand-in, counting every upstream request in `hits`.
    fn plex_stub_counting(resources_status: StatusCode, hits: Arc<AtomicUsize>) -> Router {
        let polls = Arc::new(AtomicUsize::new(0));
        Router::new()
            .route(
                "/api/v2/pins",
                post(|| async { Json(json!({ "id": 42, "code": "ABCD" })) }),
            )
            .route(
                "/api/v2/pins/{id}",
                get(move |Path(id): Path<u64>| {
                    let polls = polls.clone();
                    async move {
                        let token = (polls.fetch_add(1, Ordering::SeqCst) > 0).then_some("T");
                        Json(json!({ "id": id, "code": "ABCD", "authToken": token }))
                    }
                }),
            )
            .route(
                "/api/v2/resources",
                get(move || async move { (resources_status, Json(resources())) }),
            )
            .layer(middleware::from_fn(move |req: Request, next: Next| {
                hits.fetch_add(1, Ordering::SeqCst);
                next.run(req)
            }))
    }

    #[tokio::test]
    async fn mint_then_poll_until_authorized() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_stub(plex_stub(StatusCode::OK)).await;
        let app = build_router(test_state(dir.path().to_path_buf(), &base));

        let (status, body) = test_http::get(app.clone(), "/api/plex/pin").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"], json!({ "pinCode": "ABCD", "plexID": "42" }));
        assert!(body["elapsed"].as_str().unwrap().ends_with("ms"));

        let (status, body) = test_http::get(app.clone(), "/api/plex/pin/check?plexID=42").await;
        assert_eq!(status, 200);
        assert_eq!(
            body["data"],
            json!({ "authenticated": false, "authToken": "", "connectionsAvailable": null })
        );

        let (status, body) = test_http::get(app, "/api/plex/pin/check?plexID=42").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["authenticated"], true);
        assert_eq!(body["data"]["authToken"], "T");
        let first = &body["data"]["connectionsAvailable"][0];
        assert_eq!(first["serverName"], "Home");
        assert_eq!(first["uri"], "https://10.0.0.5:32400");
        assert_eq!(first["local"], true);
    }

    #[tokio::test]
    async fn missing_plex_id_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path().to_path_buf(), "http://127.0.0.1:9"));

        for uri in ["/api/plex/pin/check", "/api/plex/pin/check?plexID="] {
            let (status, body) = test_http::get(app.clone(), uri).await;
            assert_eq!(status, 400, "{uri}");
            assert_eq!(body["message"], "Missing PIN code");

            let handler = &body["log"]["children"][0];
            assert_eq!(handler["name"], "Plex Check Pin Handler");
            assert_eq!(handler["children"][0]["error"]["title"], "Missing PIN code");
        }
    }

    #[tokio::test]
    async fn non_numeric_plex_id_is_400_without_calling_plex() {
        let dir = tempfile::tempdir().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_stub(plex_stub_counting(StatusCode::OK, hits.clone())).await;
        let app = build_router(test_state(dir.path().to_path_buf(), &base));

        for uri in [
            "/api/plex/pin/check?plexID=abc",
            "/api/plex/pin/check?plexID=..%2Fresources",
            "/api/plex/pin/check?plexID=-1",
        ] {
            let (status, body) = test_http::get(app.clone(), uri).await;
            assert_eq!(status, 400, "{uri}");
            assert_eq!(body["status"], "error");
            assert_eq!(body["message"], "Invalid PIN code");
            assert!(body.get("data").is_none());

            let validate = &body["log"]["children"][0]["children"][0];
            assert_eq!(validate["name"], "Validate Query Parameters");
            assert_eq!(validate["error"]["context"]["invalid_field"], "plexID");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let (status, _) = test_http::get(app, "/api/plex/pin/check?plexID=42").await;
        assert_eq!(status, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plex_timeout_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Router::new().route(
            "/api/v2/pins",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "id": 1, "code": "SLOW" }))
            }),
        );
        let base = spawn_stub(slow).await;
        let state = with_plex_timeout(
            test_state(dir.path().to_path_buf(), &base),
            Duration::from_millis(200),
        );

        let (status, body) = test_http::get(build_router(state), "/api/plex/pin").await;
        assert_eq!(status, 500);
        assert!(body["message"].as_str().unwrap().contains("Timeout"));
        let elapsed: u64 = body["elapsed"].as_str().unwrap().trim_end_matches("ms").parse().unwrap();
        assert!(elapsed >= 200);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn abandoned_request_is_cancelled_499() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Router::new().route(
            "/api/v2/pins",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "id": 1, "code": "SLOW" }))
            }),
        );
        let base = spawn_stub(slow).await;
        let state = test_state(dir.path().to_path_buf(), &base);

        let (guard, signal) = cancel_pair();
        let ctx = RequestContext::new(LogDocument::new("/api/plex/pin", ActionLevel::Info), signal);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(guard);
        });

        let started = std::time::Instant::now();
        let w = tokio::time::timeout(
            Duration::from_secs(3),
            get_pin(State(state), ctx.clone(), ResponseWriter::new()),
        )
        .await
        .expect("cancellation should end the handler before the Plex deadline");
        assert!(started.elapsed() < Duration::from_secs(3));

        let response = w.take().unwrap();
        assert_eq!(response.status().as_u16(), 499);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Cancelled");
        assert_eq!(body["log"]["children"][0]["name"], "Plex Get Pin Handler");
        assert_eq!(ctx.log().aggregate_level(), ActionLevel::Error);
    }

    #[tokio::test]
    async fn failed_connection_listing_still_returns_token() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_stub(plex_stub(StatusCode::BAD_GATEWAY)).await;
        let app = build_router(test_state(dir.path().to_path_buf(), &base));

        // first poll is pending
        test_http::get(app.clone(), "/api/plex/pin/check?plexID=42").await;
        let (status, body) = test_http::get(app, "/api/plex/pin/check?plexID=42").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "warning");
        assert_eq!(body["message"], "Plex Upstream Error");
        assert_eq!(body["data"]["authToken"], "T");
        assert_eq!(body["data"]["connectionsAvailable"], json!([]));
    }

    #[tokio::test]
    async fn expired_pin_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = Router::new().route(
            "/api/v2/pins/{id}",
            get(|| async { (StatusCode::NOT_FOUND, Json(json!({ "errors": [] }))) }),
        );
        let base = spawn_stub(gone).await;
        let app = build_router(test_state(dir.path().to_path_buf(), &base));

        let (status, body) = test_http::get(app, "/api/plex/pin/check?plexID=7").await;
        assert_eq!(status, 500);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Plex PIN Expired");
    }
}
