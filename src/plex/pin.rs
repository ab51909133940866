//! # Plex PIN 인증 흐름
//!
//! Plex의 out-of-band PIN 인증을 구현합니다.
//!
//! ```text
//! 1. get_pin_code_and_id()  → POST /api/v2/pins      → 4자리 코드 + PIN ID
//! 2. (사용자가 plex.tv/link 에서 코드를 입력)
//! 3. check_pin(pin_id)      → GET  /api/v2/pins/{id} → 대기 중 / 승인됨 / 만료됨
//! ```
//!
//! 서버는 PIN 세션을 저장하지 않습니다. PIN ID가 곧 세션이며,
//! 클라이언트(브라우저)가 매 폴링마다 PIN ID를 다시 보내줍니다.
//! 폴링 주기와 재시도는 클라이언트의 책임입니다.

use super::client::PlexClient;
use crate::error::{AppError, ErrorKind};
use crate::logging::{ActionLevel, RequestContext};
use crate::util::mask_token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PIN 세션의 상태
///
/// `Pending` → {`Authorized`, `Expired`, `Failed`}.
/// `Failed`는 전송/파싱 오류이며 고정되지 않습니다: 다음 폴링이 성공할 수 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PinState {
    Pending,
    Authorized,
    Expired,
    Failed,
}

/// Plex가 돌려주는 PIN 리소스 (필요한 필드만)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexPin {
    pub id: u64,
    pub code: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 클라이언트 관점의 PIN 세션
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinSession {
    /// 사용자가 plex.tv/link 에 입력하는 4자리 코드
    pub pin_code: String,
    /// 폴링에 사용하는 불투명 식별자
    pub pin_id: String,
    pub created_at: DateTime<Utc>,
    pub state: PinState,
    /// `Authorized` 상태에서만 비어있지 않습니다.
    #[serde(skip_serializing)]
    pub auth_token: String,
    pub last_checked_at: DateTime<Utc>,
}

impl PinSession {
    /// Plex 응답 하나로부터 세션 상태를 계산합니다.
    pub fn from_plex(pin: PlexPin, now: DateTime<Utc>) -> Self {
        let token = pin.auth_token.filter(|t| !t.is_empty());
        let state = match (&token, pin.expires_at) {
            (Some(_), _) => PinState::Authorized,
            (None, Some(expires_at)) if expires_at <= now => PinState::Expired,
            (None, _) => PinState::Pending,
        };
        Self {
            pin_code: pin.code,
            pin_id: pin.id.to_string(),
            created_at: pin.created_at.unwrap_or(now),
            state,
            auth_token: token.unwrap_or_default(),
            last_checked_at: now,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state == PinState::Authorized
    }
}

fn expired_error(pin_id: u64) -> AppError {
    AppError::new(
        ErrorKind::Upstream,
        "Plex PIN Expired",
        "Request a new PIN code and enter it at plex.tv/link",
    )
    .with_context("pin_id", pin_id)
}

fn is_not_found(err: &AppError) -> bool {
    err.kind == ErrorKind::Upstream
        && err.context.get("status_code").and_then(|v| v.as_u64()) == Some(404)
}

/// 새 PIN을 발급받습니다. 성공 시 세션은 항상 `Pending` 상태입니다.
pub async fn get_pin_code_and_id(
    plex: &PlexClient,
    ctx: &RequestContext,
) -> Result<PinSession, AppError> {
    let action = ctx
        .current_action()
        .add_sub_action("Plex: Request PIN", ActionLevel::Info);
    action.append_result("url", &plex.url("/api/v2/pins"));

    let request = plex.post("/api/v2/pins").query(&[("strong", "false")]);
    let outcome = plex
        .send_json::<PlexPin>(ctx, "pins", request)
        .await
        .map(|pin| PinSession::from_plex(pin, Utc::now()));

    match &outcome {
        Ok(session) => {
            action.append_result("pin_id", &session.pin_id);
            action.append_result("pin_code", &session.pin_code);
        }
        Err(err) => action.record_error(err),
    }
    action.complete();
    outcome
}

/// PIN 상태를 한 번 확인합니다. 사용자를 기다리며 블로킹하지 않습니다.
///
/// - 대기 중: `Ok(세션)` (`state == Pending`, 토큰 없음)
/// - 승인됨: `Ok(세션)` (`state == Authorized`, 토큰 있음)
/// - 만료됨 또는 전송 실패: `Err`
pub async fn check_pin(
    plex: &PlexClient,
    ctx: &RequestContext,
    pin_id: u64,
) -> Result<PinSession, AppError> {
    let action = ctx
        .current_action()
        .add_sub_action("Plex: Check PIN", ActionLevel::Info);
    action.append_result("pin_id", &pin_id);

    let path = format!("/api/v2/pins/{}", pin_id);
    let outcome = match plex.send_json::<PlexPin>(ctx, "pins/{id}", plex.get(&path)).await {
        Ok(pin) => {
            let session = PinSession::from_plex(pin, Utc::now());
            if session.state == PinState::Expired {
                Err(expired_error(pin_id))
            } else {
                Ok(session)
            }
        }
        // Plex forgets a pin once it ages out
        Err(err) if is_not_found(&err) => Err(expired_error(pin_id)),
        Err(err) => Err(err),
    };

    match &outcome {
        Ok(session) => {
            action.append_result("state", &session.state);
            if session.is_authorized() {
                action.append_result("auth_token", &mask_token(&session.auth_token));
            }
        }
        Err(err) => {
            let state = if err.title == "Plex PIN Expired" {
                PinState::Expired
            } else {
                PinState::Failed
            };
            action.append_result("state", &state);
            action.record_error(err);
        }
    }
    action.complete();
    outcome
}
