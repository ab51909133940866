//! # 헬스체크(Health Check) 핸들러
//!
//! ## 엔드포인트
//! - `GET /api/health` → `{ "status": "success", "data": { "status": "ok", "version": ... } }`
//!
//! 로드밸런서나 Docker 헬스체크가 호출합니다. 인증 없이 접근할 수 있습니다.

use crate::logging::{send_json, ActionLevel, RequestContext, ResponseWriter};
use serde_json::json;

/// `GET /api/health`: 서버 상태를 확인합니다.
///
/// 실패하지 않는 핸들러입니다. 다른 핸들러와 같은 envelope으로 응답합니다.
pub async fn health_check(ctx: RequestContext, w: ResponseWriter) -> ResponseWriter {
    let action = ctx.log().add_action("Health Check Handler", ActionLevel::Debug);
    action.complete();

    let data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    send_json(&w, Some(ctx.log()), Some(&data));
    w
}
