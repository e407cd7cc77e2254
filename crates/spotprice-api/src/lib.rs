//! spotprice-api — read-only query service over the collected prices.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Chart page with region / instance type / window selectors |
//! | GET | `/api/v1/prices` | Per-zone price series for one instance type and region |
//! | GET | `/api/v1/regions` | Regions seen by the collector |
//! | GET | `/api/v1/instance-types` | Instance types seen by the collector |
//! | GET | `/api/v1/product-descriptions` | Product descriptions seen by the collector |
//! | GET | `/api/v1/progress` | Collector checkpoint and observation count |
//!
//! Handlers only read committed state, so they can run alongside a
//! collector writing to the same store.

pub mod handlers;
pub mod pages;
pub mod query;
pub mod views;

use axum::Router;
use axum::routing::get;
use spotprice_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the complete router (JSON API + chart page).
pub fn build_router(store: StateStore) -> Router {
    let state = ApiState { store };

    let api_routes = Router::new()
        .route("/prices", get(handlers::prices))
        .route("/regions", get(handlers::regions))
        .route("/instance-types", get(handlers::instance_types))
        .route("/product-descriptions", get(handlers::product_descriptions))
        .route("/progress", get(handlers::progress))
        .with_state(state.clone());

    Router::new()
        .route("/", get(pages::index).with_state(state))
        .nest("/api/v1", api_routes)
}
