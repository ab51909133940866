//! # 에러 처리 모듈
//!
//! 코어(액션 로그, Plex PIN 인증)가 반환하는 에러 타입을 정의합니다.
//! Rust에서는 예외(exception) 대신 `Result<T, E>` 타입으로 에러를 처리합니다.
//!
//! 이 모듈의 핵심:
//! - `ErrorKind` 열거형: 에러의 종류 (BadRequest, Timeout, Upstream 등)
//! - `AppError` 구조체: 사용자에게 보여줄 제목(title), 해결 방법(help),
//!   디버깅용 컨텍스트(context)를 함께 담습니다.
//!
//! `AppError`는 직접 HTTP 응답이 되지 않습니다. 핸들러는 에러를 가장 구체적인
//! 액션에 기록하고(`Action::fail`), 응답은 항상 `logging::send_json`이 만듭니다.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// 코어가 구분하는 에러 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// 요청 값 누락/형식 오류 (HTTP 400)
    BadRequest,
    /// 인증 실패 (HTTP 401, JWT 미들웨어)
    Unauthenticated,
    /// Plex 호출이 제한 시간(10초)을 넘김
    Timeout,
    /// Plex가 2xx가 아닌 상태 코드를 반환
    Upstream,
    /// Plex 응답 본문을 해석할 수 없음
    Parse,
    /// 클라이언트가 연결을 끊음 (HTTP 499)
    Cancelled,
    /// 그 밖의 서버 내부 오류
    Internal,
    /// 핸들러 패닉
    InternalPanic,
}

/// 코어 함수들이 반환하는 에러
///
/// `#[error("{title}")]`: Display 출력은 제목만 사용합니다.
/// 제목은 짧고 사람이 읽을 수 있어야 하며, UI 토스트에 그대로 표시됩니다.
#[derive(Debug, Clone, Error)]
#[error("{title}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub title: String,
    /// 사용자가 시도해볼 수 있는 해결 방법
    pub help: String,
    pub context: Map<String, Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, title: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            help: help.into(),
            context: Map::new(),
        }
    }

    /// 컨텍스트 필드를 하나 추가합니다 (빌더 패턴).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// 필수 입력값이 없을 때. `missing_field` 컨텍스트가 400 응답으로 이어집니다.
    pub fn missing_field(title: impl Into<String>, field: &str) -> Self {
        Self::new(
            ErrorKind::BadRequest,
            title,
            format!("Provide the '{}' field and try again", field),
        )
        .with_context("missing_field", field)
    }

    /// 입력값은 있지만 형식이 맞지 않을 때. `invalid_field` 컨텍스트도 400으로 이어집니다.
    pub fn invalid_field(title: impl Into<String>, field: &str, value: &str) -> Self {
        Self::new(
            ErrorKind::BadRequest,
            title,
            format!("Check the '{}' field and try again", field),
        )
        .with_context("invalid_field", field)
        .with_context("value", value)
    }

    pub fn timeout(target: &str, seconds: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            "Plex Request Timeout",
            "Check that plex.tv is reachable from the server and try again",
        )
        .with_context("target", target)
        .with_context("timeout_seconds", seconds)
    }

    pub fn cancelled(target: &str) -> Self {
        Self::new(ErrorKind::Cancelled, "Cancelled", "The request was cancelled by the client")
            .with_context("target", target)
    }

    pub fn upstream(target: &str, status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Upstream,
            "Plex Upstream Error",
            "Plex rejected the request, wait a moment and try again",
        )
        .with_context("target", target)
        .with_context("status_code", status)
        .with_context("body", body)
    }

    pub fn parse(target: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::Parse,
            "Plex Response Parse Error",
            "Plex returned an unexpected response, try again later",
        )
        .with_context("target", target)
        .with_context("detail", detail.to_string())
    }

    pub fn internal(title: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, title, "Check the server logs for details")
            .with_context("detail", detail.to_string())
    }
}
