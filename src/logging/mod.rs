//! # 요청 단위 액션 로그 (Action Log Pipeline)
//!
//! HTTP 요청 하나마다 "무슨 일이 있었는지"를 트리 형태로 기록합니다.
//! 트리는 HTTP 응답의 유일한 근거입니다: 상태 코드, 사용자에게 보여줄 메시지,
//! 진단용 로그가 모두 트리에서 계산됩니다.
//!
//! ```text
//! /api/plex/pin/check            ← 루트 액션 (요청 경로)
//! └── Plex Check Pin Handler     ← 핸들러 액션
//!     ├── Plex: Check PIN        ← Plex 호출 한 번
//!     └── Plex: List Server Connections
//! ```
//!
//! 하위 모듈:
//! - `level`: 액션 레벨 (Trace ~ Error)
//! - `action`: 액션 트리와 `Action` 핸들
//! - `document`: `LogDocument` (요청 하나의 루트) 와 상태 코드 계산 규칙
//! - `context`: 요청 컨텍스트 (현재 액션, 취소 신호)
//! - `response`: 유일한 응답 출력 함수 `send_json`

pub mod action;
pub mod context;
pub mod document;
pub mod level;
pub mod response;

pub use action::{Action, ActionError};
pub use context::{cancel_pair, create_logging_context, CancelOnDrop, CancelSignal, RequestContext};
pub use document::{ActionRecord, LogDocument, METHOD_NOT_ALLOWED, ROUTE_NOT_FOUND};
pub use level::ActionLevel;
pub use response::{send_json, ResponseWriter};
