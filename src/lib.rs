//! # Aura 백엔드 라이브러리
//!
//! 바이너리(`main.rs`)는 설정을 읽고 서버를 띄우기만 합니다.
//! 실제 기능은 모두 이 라이브러리에 있습니다:
//!
//! - `logging`: 요청 단위 액션 로그. HTTP 응답의 유일한 출처
//! - `plex`: Plex PIN 인증 (발급, 폴링, 서버 연결 목록)
//! - `routes` / `middleware`: axum 라우터와 미들웨어
//! - `config` / `error` / `util`: 설정, 에러 타입, 토큰 마스킹

pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod plex;
pub mod routes;
pub mod util;

#[cfg(test)]
mod test_support;
