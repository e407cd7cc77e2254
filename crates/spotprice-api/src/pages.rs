//! Chart page handler.

use askama::Template;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use chrono::Utc;
use tracing::warn;

use crate::ApiState;
use crate::query::{self, PriceQuery, QueryError, WINDOWS};
use crate::views::*;

fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(tmpl.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    product_description: String,
    instance_type: String,
    region: String,
    window: u32,
    regions: Vec<Choice>,
    instance_types: Vec<Choice>,
    windows: Vec<Choice>,
    zones: Vec<ZoneSummary>,
    series_json: String,
    checkpoint: String,
    error: Option<String>,
}

/// A bad window is the caller's fault; a store failure is ours.
fn error_status(err: &QueryError) -> StatusCode {
    match err {
        QueryError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
        QueryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /?type=&region=&window=
pub async fn index(
    State(state): State<ApiState>,
    params: Result<Query<PriceQuery>, QueryRejection>,
) -> Response {
    let (params, mut error) = match params {
        Ok(Query(q)) => (q, None),
        Err(e) => (PriceQuery::default(), Some(e.body_text())),
    };
    let mut status = if error.is_some() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    let series = match query::price_series(&state.store, &params, Utc::now().timestamp()) {
        Ok(series) => series,
        Err(e) => {
            warn!(error = %e, "chart query failed");
            status = error_status(&e);
            error.get_or_insert(e.to_string());
            Default::default()
        }
    };

    let regions = state
        .store
        .list_regions()
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.name)
        .collect();
    let instance_types = state
        .store
        .list_instance_types()
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.name)
        .collect();
    let checkpoint = state
        .store
        .checkpoint()
        .unwrap_or_default()
        .and_then(query::format_timestamp)
        .unwrap_or_else(|| "never".to_string());

    let page = IndexTemplate {
        regions: choices(regions, &params.region),
        instance_types: choices(instance_types, &params.instance_type),
        windows: window_choices(&WINDOWS, params.window),
        zones: zone_summaries(&series),
        series_json: series_json(&series),
        checkpoint,
        error,
        product_description: params.product_description,
        instance_type: params.instance_type,
        region: params.region,
        window: params.window,
    };
    (status, render(page)).into_response()
}
