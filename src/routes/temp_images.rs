//! # 임시 이미지 폴더 비우기
//!
//! ## 엔드포인트
//! - `DELETE /api/temp-images` → `{ removed }`
//!
//! 포스터 미리보기용으로 내려받은 이미지가 `<CONFIG_PATH>/temp-images`에 쌓입니다.
//! 폴더 안의 모든 항목을 지우고 빈 폴더를 다시 만듭니다.
//! 동시에 두 번 호출되면 `temp_images_lock`으로 순서대로 실행됩니다.

use crate::error::AppError;
use crate::logging::{send_json, Action, ActionLevel, RequestContext, ResponseWriter};
use crate::routes::AppState;
use axum::extract::State;
use serde_json::{json, Value};
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use tokio::fs;

/// `DELETE /api/temp-images`: 임시 이미지를 모두 삭제합니다.
pub async fn clear_temp_images(
    State(state): State<AppState>,
    ctx: RequestContext,
    w: ResponseWriter,
) -> ResponseWriter {
    let action = ctx.log().add_action("Clear Temp Images Handler", ActionLevel::Info);
    let folder = state.config.temp_images_path();
    action.append_result("folder", &folder.display().to_string());

    // 잠금은 함수가 끝날 때(drop) 자동으로 풀립니다.
    let _guard = state.temp_images_lock.lock().await;

    match clear_folder(&action, &folder).await {
        Ok(removed) => {
            action.append_result("removed", &removed);
            action.complete();
            send_json(&w, Some(ctx.log()), Some(&json!({ "removed": removed })));
        }
        Err(err) => {
            action.fail(&err);
            action.complete();
            send_json::<Value>(&w, Some(ctx.log()), None);
        }
    }
    w
}

/// 폴더 안의 항목을 지운 개수를 반환합니다. 폴더가 없으면 만들고 0을 반환합니다.
async fn clear_folder(action: &Action, folder: &Path) -> Result<usize, AppError> {
    let mut entries = match fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            fs::create_dir_all(folder)
                .await
                .map_err(|e| AppError::internal("Temp Folder Create Failed", e))?;
            return Ok(0);
        }
        Err(e) => return Err(AppError::internal("Temp Folder Read Failed", e)),
    };

    let mut removed = 0;
    let mut failed = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::internal("Temp Folder Read Failed", e))?
    {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let outcome = if is_dir {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match outcome {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove temp image");
                failed.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }

    if !failed.is_empty() {
        let sub = action.add_sub_action("Remove Temp Image Entries", ActionLevel::Warn);
        sub.set_error(
            "Some Temp Images Were Not Removed",
            "Check the folder permissions",
            json!({ "failed": failed }),
        );
        sub.complete();
    }
    Ok(removed)
}
