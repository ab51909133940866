//! # 미들웨어 모듈
//!
//! - `log_request`: 가장 바깥쪽 레이어. 요청마다 액션 로그 문서를 만들고 패닉을 500으로 바꿉니다.
//! - `auth`: JWT Bearer 토큰 검사 (인증이 켜져 있을 때만)

pub mod auth;
pub mod log_request;
