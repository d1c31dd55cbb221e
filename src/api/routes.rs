use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Datasets
        .route("/datasets/by-uri", get(handlers::get_dataset_by_uri::<S>))
        .route("/datasets/version-info", get(handlers::get_version_info::<S>))
        .route("/datasets/import", post(handlers::import_dataset::<S>))
        .route("/datasets/:id", delete(handlers::delete_dataset::<S>))
        .route("/datasets/:id/versions", post(handlers::create_new_version::<S>))
        .route("/datasets/:id/release", post(handlers::release_dataset::<S>))
        // Records
        .route("/records/by-uri", get(handlers::get_record_by_uri::<S>))
        // Structures
        .route("/structures/:name", get(handlers::get_structure::<S>))
        .route(
            "/structures/:name/datasets",
            get(handlers::list_structure_datasets::<S>),
        )
        // Federation
        .route("/subscriptions", post(handlers::subscribe::<S>))
        .route("/subscriptions/cancel", post(handlers::unsubscribe::<S>))
        .route("/notifications", post(handlers::receive_notification::<S>))
        .route("/sweeps/run", post(handlers::run_sweeps::<S>))
}
