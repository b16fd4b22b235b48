// handler/withdrawals.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::ledgerdtos::{ApiResponse, CreateWithdrawalDto, ProcessWithdrawalDto, WithdrawalDto},
    error::HttpError,
    middleware::{role_check, JWTAuthMiddleware},
    models::usermodel::UserRole,
    service::withdrawal_service::NewWithdrawal,
    AppState,
};

pub fn withdrawals_handler() -> Router {
    Router::new()
        .route("/", post(create_withdrawal).get(list_withdrawals))
        .route(
            "/:id/process",
            post(process_withdrawal).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
}

pub async fn create_withdrawal(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<CreateWithdrawalDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let withdrawal = app_state
        .withdrawal_service
        .create_withdrawal(
            auth.actor(),
            NewWithdrawal {
                amount: body.amount,
                method: body.withdrawal_method,
                destination: body.destination,
                account_holder: body.account_holder,
                bank_name: body.bank_name,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Withdrawal requested successfully",
            WithdrawalDto::filter_withdrawal(&withdrawal),
        )),
    ))
}

pub async fn list_withdrawals(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let withdrawals = app_state
        .withdrawal_service
        .list_withdrawals(auth.actor())
        .await?;

    let data: Vec<WithdrawalDto> = withdrawals.iter().map(WithdrawalDto::filter_withdrawal).collect();

    Ok(Json(ApiResponse::success("Withdrawals retrieved successfully", data)))
}

pub async fn process_withdrawal(
    Path(withdrawal_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<ProcessWithdrawalDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let withdrawal = app_state
        .withdrawal_service
        .process_withdrawal(withdrawal_id, body.status, body.failure_reason, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Withdrawal updated successfully",
        WithdrawalDto::filter_withdrawal(&withdrawal),
    )))
}
