// handler/escrow.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::ledgerdtos::{ApiResponse, AutoReleaseResultDto, EscrowReasonDto, ExtendEscrowDto, FundEscrowDto, ReleaseEscrowDto},
    error::HttpError,
    middleware::{role_check, JWTAuthMiddleware},
    models::usermodel::UserRole,
    service::escrow_service::FundEscrow,
    AppState,
};

pub fn escrow_handler() -> Router {
    Router::new()
        .route("/", post(fund_escrow))
        .route("/release", post(release_escrow))
        .route(
            "/auto-release",
            post(run_auto_release).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
        .route("/:id", get(get_escrow))
        .route(
            "/:id/refund",
            post(refund_escrow).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
        .route("/:id/dispute", post(open_dispute))
        .route(
            "/:id/extend",
            post(extend_auto_release).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
}

pub async fn fund_escrow(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<FundEscrowDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let escrow = app_state
        .escrow_service
        .fund_escrow(
            auth.actor(),
            FundEscrow {
                project_id: body.project_id,
                total_amount: body.total_amount,
                fee_percentage: body.fee_percentage,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Escrow funded successfully", escrow)),
    ))
}

pub async fn get_escrow(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let escrow = app_state
        .escrow_service
        .get_escrow(escrow_id, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success("Escrow retrieved successfully", escrow)))
}

pub async fn release_escrow(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<ReleaseEscrowDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let escrow = app_state
        .escrow_service
        .release_escrow(body.escrow_id, auth.actor(), body.reason)
        .await?;

    Ok(Json(ApiResponse::success("Escrow released successfully", escrow)))
}

pub async fn refund_escrow(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    body: Option<Json<EscrowReasonDto>>,
) -> Result<impl IntoResponse, HttpError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let escrow = app_state
        .escrow_service
        .refund_escrow(escrow_id, auth.actor(), body.reason)
        .await?;

    Ok(Json(ApiResponse::success("Escrow refunded successfully", escrow)))
}

pub async fn open_dispute(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let escrow = app_state
        .escrow_service
        .open_dispute(escrow_id, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success("Dispute opened", escrow)))
}

pub async fn extend_auto_release(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<ExtendEscrowDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let escrow = app_state
        .escrow_service
        .extend_auto_release(escrow_id, auth.actor(), body.days)
        .await?;

    Ok(Json(ApiResponse::success("Auto-release extended", escrow)))
}

pub async fn run_auto_release(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let released = app_state.escrow_service.check_auto_release().await?;

    tracing::info!(
        admin_id = %auth.user.id,
        released = released.len(),
        "Manual escrow auto-release sweep"
    );

    Ok(Json(ApiResponse::success(
        "Auto-release sweep completed",
        AutoReleaseResultDto {
            released: released.len(),
            escrow_ids: released.iter().map(|e| e.id).collect(),
        },
    )))
}
