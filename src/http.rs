//! HTTP surface: the App Store webhook plus the client-facing subscription
//! and plan endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{
    domain::{entities::subscription::UserId, repositories::entity_store::EntityId},
    errors::{IapSyncError, StoreError},
    util::IapSyncUtil,
};

pub fn router(util: Arc<IapSyncUtil>) -> Router {
    Router::new()
        .route("/apple-notifications", post(apple_notification))
        .route("/subscriptions/subscribe-free-plan", post(subscribe_free_plan))
        .route("/subscriptions/subscribe-to-plan", post(subscribe_to_plan))
        .route(
            "/subscriptions/verify-apple-purchase",
            post(verify_apple_purchase),
        )
        .route("/subscriptions/user/:user_id", get(active_subscription))
        .route("/v1/all-plans", get(all_plans))
        .route("/v1/plans/:id", get(plan))
        .layer(TraceLayer::new_for_http())
        .with_state(util)
}

/// Client-facing error body. Internal failures are logged, not echoed.
pub struct ApiError(IapSyncError);

impl From<IapSyncError> for ApiError {
    fn from(e: IapSyncError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IapSyncError::Validation(_) | IapSyncError::Verification(_) => StatusCode::BAD_REQUEST,
            IapSyncError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status.is_server_error() {
            error!(error = %self.0, "request failed");
            "Internal server error".to_owned()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    user_id: UserId,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeToPlanRequest {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    user_id: UserId,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    plan_id: EntityId,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPurchaseRequest {
    receipt: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    user_id: UserId,
}

/// 200 tells App Store Server Notifications to stop retrying, so anything
/// not applied answers 500.
async fn apple_notification(State(util): State<Arc<IapSyncUtil>>, body: String) -> Response {
    match util.handle_apple_notification(&body).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "received" }))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to process notification" })),
        )
            .into_response(),
    }
}

async fn subscribe_free_plan(
    State(util): State<Arc<IapSyncUtil>>,
    Json(request): Json<UserRequest>,
) -> Result<Response, ApiError> {
    let subscription = util.subscribe_free_plan(request.user_id).await?;
    Ok((StatusCode::CREATED, Json(subscription)).into_response())
}

async fn subscribe_to_plan(
    State(util): State<Arc<IapSyncUtil>>,
    Json(request): Json<SubscribeToPlanRequest>,
) -> Result<Response, ApiError> {
    let subscription = util
        .subscribe_to_plan(request.user_id, request.plan_id)
        .await?;
    Ok(Json(subscription).into_response())
}

async fn verify_apple_purchase(
    State(util): State<Arc<IapSyncUtil>>,
    Json(request): Json<VerifyPurchaseRequest>,
) -> Result<Response, ApiError> {
    let details = util
        .verify_apple_purchase(&request.receipt, request.user_id)
        .await?;
    Ok(Json(details).into_response())
}

async fn active_subscription(
    State(util): State<Arc<IapSyncUtil>>,
    Path(user_id): Path<UserId>,
) -> Result<Response, ApiError> {
    Ok(match util.get_active_subscription(user_id).await? {
        Some(details) => Json(details).into_response(),
        None => not_found("No active subscription"),
    })
}

async fn all_plans(State(util): State<Arc<IapSyncUtil>>) -> Result<Response, ApiError> {
    Ok(Json(util.all_plans_with_details().await?).into_response())
}

async fn plan(
    State(util): State<Arc<IapSyncUtil>>,
    Path(plan_id): Path<EntityId>,
) -> Result<Response, ApiError> {
    Ok(match util.plan_with_details(plan_id).await? {
        Some(plan) => Json(plan).into_response(),
        None => not_found("Plan not found"),
    })
}
