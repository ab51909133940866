use crate::error::{AppError, ErrorKind};
use crate::logging::{
    send_json, ActionLevel, RequestContext, ResponseWriter, METHOD_NOT_ALLOWED, ROUTE_NOT_FOUND,
};
use axum::http::Method;
use serde_json::Value;

pub async fn route_not_found(method: Method, ctx: RequestContext, w: ResponseWriter) -> ResponseWriter {
    let path = ctx.log().path().to_string();
    let action = ctx.log().add_action(ROUTE_NOT_FOUND, ActionLevel::Warn);
    action.fail(
        &AppError::new(
            ErrorKind::BadRequest,
            ROUTE_NOT_FOUND,
            "Check the URL, this route does not exist",
        )
        .with_context("path", path)
        .with_context("method", method.as_str()),
    );
    action.complete();
    send_json::<Value>(&w, Some(ctx.log()), None);
    w
}

pub async fn method_not_allowed(method: Method, ctx: RequestContext, w: ResponseWriter) -> ResponseWriter {
    let path = ctx.log().path().to_string();
    let action = ctx.log().add_action(METHOD_NOT_ALLOWED, ActionLevel::Warn);
    action.fail(
        &AppError::new(
            ErrorKind::BadRequest,
            METHOD_NOT_ALLOWED,
            "This route exists but does not accept this method",
        )
        .with_context("path", path)
        .with_context("method", method.as_str()),
    );
    action.complete();
    send_json::<Value>(&w, Some(ctx.log()), None);
    w
}
