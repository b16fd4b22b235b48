// handler/balance.rs
use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Extension, Json, Router};

use crate::{
    dtos::ledgerdtos::{ApiResponse, BalanceDto},
    error::HttpError,
    middleware::JWTAuthMiddleware,
    AppState,
};

pub fn balance_handler() -> Router {
    Router::new().route("/", get(get_balance))
}

pub async fn get_balance(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let balance = app_state
        .withdrawal_service
        .get_balance(auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Balance retrieved successfully",
        BalanceDto::new(balance, app_state.withdrawal_service.policy()),
    )))
}
