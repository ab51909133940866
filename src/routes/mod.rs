//! # 라우트 핸들러 모듈
//!
//! HTTP 요청을 처리하는 핸들러 함수들과 라우터 조립을 모아둔 모듈입니다.
//!
//! 모든 핸들러는 같은 모양을 따릅니다:
//! 1. `ctx: RequestContext`와 `w: ResponseWriter`를 Extractor로 받고
//! 2. 자신의 이름으로 액션을 하나 추가한 뒤
//! 3. 작업 결과를 그 액션에 기록하고
//! 4. `send_json`으로 응답을 한 번만 씁니다.
//!
//! 상태 코드는 핸들러가 직접 고르지 않습니다. 액션 트리에서 계산됩니다.
//!
//! 각 하위 모듈:
//! - `auth`: 관리자 로그인 (JWT 발급)
//! - `health`: 서버 상태 확인 (헬스체크)
//! - `not_found`: 없는 경로 / 허용되지 않은 메서드
//! - `plex`: Plex PIN 발급과 폴링
//! - `temp_images`: 임시 포스터 이미지 폴더 비우기

pub mod auth;
pub mod health;
pub mod not_found;
pub mod plex;
pub mod temp_images;

use crate::config::Config;
use crate::middleware::{
    auth::{require_auth, TokenAuth},
    log_request::log_request,
};
use crate::plex::PlexClient;
use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// 애플리케이션 공유 상태
///
/// 모든 요청 핸들러가 `State(state): State<AppState>`로 접근합니다.
/// 시작 시 한 번 만들어지고, 요청 처리 중에는 읽기만 합니다.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// plex.tv 호출용 클라이언트 (식별 헤더 + 10초 데드라인)
    pub plex: PlexClient,
    /// 인증이 꺼져 있으면 `None`
    pub token_auth: Option<TokenAuth>,
    /// 임시 이미지 폴더 비우기를 한 번에 하나씩만 실행합니다.
    pub temp_images_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config, plex: PlexClient) -> Self {
        let token_auth = config
            .auth
            .as_ref()
            .map(|auth| TokenAuth::new(&auth.jwt_secret, chrono::Duration::hours(24)));
        Self {
            config: Arc::new(config),
            plex,
            token_auth,
            temp_images_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// API 라우터를 조립합니다.
///
/// 레이어는 아래에서 위로 감쌉니다. 요청은 바깥쪽부터 통과합니다:
/// `TraceLayer` → `CorsLayer` → `log_request` → `require_auth` → 핸들러
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/login", post(auth::login))
        .route("/api/plex/pin", get(plex::get_pin))
        .route("/api/plex/pin/check", get(plex::check_pin))
        .route("/api/temp-images", delete(temp_images::clear_temp_images))
        .fallback(not_found::route_not_found)
        .method_not_allowed_fallback(not_found::method_not_allowed)
        .layer(from_fn_with_state(state.clone(), require_auth))
        .layer(from_fn_with_state(state.clone(), log_request))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
