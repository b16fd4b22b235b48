// handler/payment_methods.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::ledgerdtos::{AddPaymentMethodDto, ApiResponse, PaymentMethodDto},
    error::HttpError,
    middleware::JWTAuthMiddleware,
    service::payment_method_service::NewPaymentMethod,
    AppState,
};

pub fn payment_methods_handler() -> Router {
    Router::new()
        .route("/", get(list_payment_methods).post(add_payment_method))
        .route("/:id/default", put(set_default_payment_method))
}

pub async fn add_payment_method(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<AddPaymentMethodDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let method = app_state
        .payment_method_service
        .add_payment_method(
            auth.actor(),
            NewPaymentMethod {
                method_type: body.method_type,
                card_token: body.card_token,
                card_last_four: body.card_last_four,
                account_reference: body.account_reference,
                label: body.label,
                is_default: body.is_default,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Payment method added successfully",
            PaymentMethodDto::filter_method(&method),
        )),
    ))
}

pub async fn list_payment_methods(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let methods = app_state
        .payment_method_service
        .list_payment_methods(auth.actor())
        .await?;

    let data: Vec<PaymentMethodDto> = methods.iter().map(PaymentMethodDto::filter_method).collect();

    Ok(Json(ApiResponse::success("Payment methods retrieved successfully", data)))
}

pub async fn set_default_payment_method(
    Path(method_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let method = app_state
        .payment_method_service
        .set_default_payment_method(auth.actor(), method_id)
        .await?;

    Ok(Json(ApiResponse::success(
        "Default payment method updated",
        PaymentMethodDto::filter_method(&method),
    )))
}
