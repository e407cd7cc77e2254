//! JSON API handlers.
//!
//! Each handler reads via `StateStore` and answers with the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::ApiState;
use crate::query::{self, PriceQuery, QueryError};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    warn!(error = %e, "query failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Prices ─────────────────────────────────────────────────────

/// GET /api/v1/prices?product_description=&instance_type=&region=&window=
pub async fn prices(
    State(state): State<ApiState>,
    params: Result<Query<PriceQuery>, QueryRejection>,
) -> impl IntoResponse {
    let Query(params) = match params {
        Ok(q) => q,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST).into_response(),
    };
    match query::price_series(&state.store, &params, Utc::now().timestamp()) {
        Ok(series) => ApiResponse::ok(series).into_response(),
        Err(e @ QueryError::InvalidWindow(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Reference data ─────────────────────────────────────────────

/// GET /api/v1/regions
pub async fn regions(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_regions() {
        Ok(rows) => ApiResponse::ok(rows.into_iter().map(|r| r.name).collect::<Vec<_>>())
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/instance-types
pub async fn instance_types(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_instance_types() {
        Ok(rows) => ApiResponse::ok(rows.into_iter().map(|r| r.name).collect::<Vec<_>>())
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/product-descriptions
pub async fn product_descriptions(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_product_descriptions() {
        Ok(rows) => ApiResponse::ok(rows.into_iter().map(|r| r.name).collect::<Vec<_>>())
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Collector progress ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ProgressView {
    /// Unix seconds, `null` before the first completed cycle.
    pub checkpoint: Option<i64>,
    pub checkpoint_time: Option<String>,
    pub observations: u64,
}

/// GET /api/v1/progress
pub async fn progress(State(state): State<ApiState>) -> impl IntoResponse {
    let checkpoint = match state.store.checkpoint() {
        Ok(c) => c,
        Err(e) => return internal_error(e),
    };
    let observations = match state.store.count_spot_prices() {
        Ok(n) => n,
        Err(e) => return internal_error(e),
    };
    ApiResponse::ok(ProgressView {
        checkpoint,
        checkpoint_time: checkpoint.and_then(query::format_timestamp),
        observations,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal::Decimal;
    use spotprice_state::{SpotPriceRecord, StateStore, WriteBatch};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState { store }
    }

    fn seed(state: &ApiState, ts: i64) {
        let rec = SpotPriceRecord {
            product_description: "Linux/UNIX".into(),
            instance_type: "t1.micro".into(),
            availability_zone: "us-east-1a".into(),
            timestamp: ts,
            price: Decimal::new(67, 4),
        };
        let mut batch = WriteBatch::new();
        batch.put_observation(rec.to_observation());
        batch.put_instance_zone(rec.to_instance_zone());
        batch.put_region("us-east-1");
        batch.put_instance_type("t1.micro");
        batch.put_product_description("Linux/UNIX");
        state.store.apply(batch).unwrap();
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn prices_defaults_and_groups_by_zone() {
        let state = test_state();
        seed(&state, Utc::now().timestamp() - 3600);

        let resp = prices(State(state), Ok(Query(PriceQuery::default())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        let points = body["data"]["us-east-1a"].as_array().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0][1].as_f64(), Some(0.0067));
        assert!(points[0][0].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn prices_rejects_bad_window() {
        let state = test_state();
        let params = PriceQuery {
            window: 2,
            ..PriceQuery::default()
        };
        let resp = prices(State(state), Ok(Query(params))).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("window"));
    }

    #[tokio::test]
    async fn prices_empty_store_is_empty_object() {
        let state = test_state();
        let resp = prices(State(state), Ok(Query(PriceQuery::default())))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn reference_lists() {
        let state = test_state();
        seed(&state, 1_704_067_200);

        let body = body_json(regions(State(state.clone())).await.into_response()).await;
        assert_eq!(body["data"], serde_json::json!(["us-east-1"]));

        let body = body_json(instance_types(State(state.clone())).await.into_response()).await;
        assert_eq!(body["data"], serde_json::json!(["t1.micro"]));

        let body = body_json(product_descriptions(State(state)).await.into_response()).await;
        assert_eq!(body["data"], serde_json::json!(["Linux/UNIX"]));
    }

    #[tokio::test]
    async fn progress_before_and_after_checkpoint() {
        let state = test_state();
        let body = body_json(progress(State(state.clone())).await.into_response()).await;
        assert_eq!(body["data"]["checkpoint"], serde_json::Value::Null);
        assert_eq!(body["data"]["observations"], 0);

        seed(&state, 1_704_067_200);
        state.store.advance_checkpoint(1_704_096_000).unwrap();
        let body = body_json(progress(State(state)).await.into_response()).await;
        assert_eq!(body["data"]["checkpoint"], 1_704_096_000);
        assert_eq!(body["data"]["checkpoint_time"], "2024-01-01T08:00:00Z");
        assert_eq!(body["data"]["observations"], 1);
    }
}
