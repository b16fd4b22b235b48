// handler/payments.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query},
    handler::Handler,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::ledgerdtos::{ApiResponse, CreatePaymentDto, ListQueryDto, PaymentCreatedDto, ProcessPaymentDto, TransactionDto},
    error::HttpError,
    middleware::{auth, rate_limit_middleware, request_context, role_check, JWTAuthMiddleware, RateLimiter},
    models::usermodel::UserRole,
    service::payment_service::NewTransaction,
    AppState,
};

pub fn payments_handler(payment_limiter: Arc<RateLimiter>, webhook_limiter: Arc<RateLimiter>) -> Router {
    let authenticated = Router::new()
        .route(
            "/",
            get(list_payments).post(
                create_payment.layer(middleware::from_fn_with_state(payment_limiter, rate_limit_middleware)),
            ),
        )
        .route("/:id", get(get_payment))
        .route("/:id/charge", post(create_charge))
        .route(
            "/:id/process",
            post(process_payment).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
        .route("/:id/cancel", post(cancel_payment))
        .route_layer(middleware::from_fn(auth));

    // The gateway cannot authenticate; the HMAC signature is checked in the service.
    let public = Router::new().route(
        "/webhook",
        post(payment_webhook).layer(middleware::from_fn_with_state(webhook_limiter, rate_limit_middleware)),
    );

    authenticated.merge(public)
}

pub async fn create_payment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let actor = auth.actor();
    let transaction = app_state
        .payment_service
        .create_transaction(
            actor,
            NewTransaction {
                payee_id: body.payee_id,
                amount: body.amount,
                transaction_type: body.transaction_type,
                project_id: body.project_id,
                milestone_id: body.milestone_id,
                description: body.description,
            },
            request_context(&headers),
        )
        .await?;

    // A failed charge leaves the transaction pending; the client can retry via /charge.
    let (transaction, checkout_url) = match app_state
        .payment_service
        .create_gateway_charge(transaction.id, actor)
        .await
    {
        Ok((updated, charge)) => (updated, charge.checkout_url),
        Err(e) => {
            tracing::warn!(
                transaction_id = %transaction.id,
                user_id = %auth.user.id,
                "Checkout could not be created: {}",
                e
            );
            (transaction, None)
        }
    };

    let response = ApiResponse::success(
        "Payment created successfully",
        PaymentCreatedDto {
            transaction: TransactionDto::filter_transaction(&transaction),
            checkout_url,
        },
    );

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_payments(
    Query(query_params): Query<ListQueryDto>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    query_params.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let (limit, offset) = query_params.limit_offset();
    let transactions = app_state
        .payment_service
        .list_transactions(auth.actor(), limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(
        "Transactions retrieved successfully",
        TransactionDto::filter_transactions(&transactions),
    )))
}

pub async fn get_payment(
    Path(transaction_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let transaction = app_state
        .payment_service
        .get_transaction(transaction_id, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Transaction retrieved successfully",
        TransactionDto::filter_transaction(&transaction),
    )))
}

pub async fn create_charge(
    Path(transaction_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let (transaction, charge) = app_state
        .payment_service
        .create_gateway_charge(transaction_id, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Checkout created successfully",
        PaymentCreatedDto {
            transaction: TransactionDto::filter_transaction(&transaction),
            checkout_url: charge.checkout_url,
        },
    )))
}

pub async fn process_payment(
    Path(transaction_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<ProcessPaymentDto>,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .payment_service
        .process_payment(transaction_id, body.gateway_status, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Payment processed successfully",
        TransactionDto::filter_transaction(&outcome.into_inner()),
    )))
}

pub async fn cancel_payment(
    Path(transaction_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let transaction = app_state
        .payment_service
        .cancel_transaction(transaction_id, auth.actor())
        .await?;

    Ok(Json(ApiResponse::success(
        "Transaction cancelled successfully",
        TransactionDto::filter_transaction(&transaction),
    )))
}

pub async fn payment_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let signature = headers
        .get("x-signature")
        .and_then(|h| h.to_str().ok());

    let outcome = app_state
        .payment_service
        .reconcile_webhook(&body, signature)
        .await?;

    tracing::info!(outcome = ?outcome, "Gateway webhook handled");

    Ok(Json(json!({
        "received": true,
        "result": outcome,
    })))
}
