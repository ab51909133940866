use crate::{
    error::{AppError, ErrorKind},
    logging::{send_json, Action, ActionLevel, RequestContext, ResponseWriter},
    routes::AppState,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Produces the PHC string stored in `AUTH_PASSWORD_HASH`.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal("Password Hashing Failed", e))
}

fn verify_password(password: &str, password_hash: &str) -> Result<(), AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::internal("Password Hash Parse Error", e))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            AppError::new(
                ErrorKind::Unauthenticated,
                "Unauthenticated",
                "The password is incorrect",
            )
        })
}

pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    w: ResponseWriter,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ResponseWriter {
    let action = ctx.log().add_action("Login Handler", ActionLevel::Info);

    let outcome = match (state.config.auth.as_ref(), state.token_auth.as_ref()) {
        (Some(auth), Some(token_auth)) => authenticate(&action, body, &auth.password_hash)
            .and_then(|()| token_auth.issue("admin")),
        _ => {
            action.record_error(&AppError::new(
                ErrorKind::BadRequest,
                "Auth Disabled",
                "Set AUTH_ENABLED=true to require a login",
            ));
            action.complete();
            send_json(&w, Some(ctx.log()), Some(&json!({ "authEnabled": false })));
            return w;
        }
    };

    match outcome {
        Ok(token) => {
            action.complete();
            send_json(&w, Some(ctx.log()), Some(&LoginResponse { token }));
        }
        Err(err) => {
            action.fail(&err);
            action.complete();
            send_json::<Value>(&w, Some(ctx.log()), None);
        }
    }
    w
}

fn authenticate(
    action: &Action,
    body: Result<Json<LoginRequest>, JsonRejection>,
    password_hash: &str,
) -> Result<(), AppError> {
    let password = match body {
        Ok(Json(req)) => req.password,
        Err(rejection) => {
            action.append_result("rejection", &rejection.body_text());
            String::new()
        }
    };
    if password.is_empty() {
        return Err(AppError::missing_field("Missing password", "password"));
    }
    verify_password(&password, password_hash)
}
