use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, warn};

use crate::advice::AdviceResolver;
use crate::detection::{BestPrediction, Detector};
use crate::draw::Annotator;
use crate::error::AppError;
use crate::intake;
use crate::overrides::OverrideTable;
use crate::pipeline;
use crate::render;
use crate::storage::{ImageStore, OUTPUT_URL_PREFIX};

pub const NO_PREDICTION_MESSAGE: &str =
    "⚠️ No valid prediction made. Please upload an image of a leaf.";

pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub annotator: Arc<Annotator>,
    pub overrides: Arc<OverrideTable>,
    pub advisor: AdviceResolver,
    pub store: ImageStore,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState, body_limit_bytes: usize) -> Router {
    let outputs = ServeDir::new(state.store.output_root());

    Router::new()
        .route("/", get(index_handler).post(submit_handler))
        .route("/result", get(demo_result_handler))
        .route("/health", get(health_check))
        .nest_service(OUTPUT_URL_PREFIX, outputs)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> Html<String> {
    Html(render::index_page())
}

async fn submit_handler(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = match intake::read_submission(&mut multipart).await {
        Ok(submission) => submission,
        Err(err) => {
            debug!(%err, "rejected submission");
            return Ok(Redirect::to("/").into_response());
        }
    };

    let slot = state.store.allocate();
    let image_path = state
        .store
        .save_upload(&slot, &submission.filename, &submission.bytes)
        .await?;
    let output_path = state.store.output_path(&slot).await?;

    let processed = {
        let state = state.clone();
        let output_path = output_path.clone();
        tokio::task::spawn_blocking(move || {
            pipeline::process_image(
                state.detector.as_ref(),
                &state.annotator,
                &state.overrides,
                &image_path,
                &output_path,
            )
        })
        .await
    };
    state.store.discard_upload(&slot).await;
    let prediction = processed??;

    if let Err(err) = state.store.publish_latest(&slot, &output_path).await {
        warn!(%err, "failed to publish latest output");
    }
    if let Err(err) = state.store.prune_outputs().await {
        warn!(%err, "failed to prune old outputs");
    }

    let solution = if prediction.is_no_prediction() {
        NO_PREDICTION_MESSAGE.to_string()
    } else {
        state
            .advisor
            .resolve(&prediction.disease_name, &submission.language)
            .await
    };

    let page = render::result_page(&prediction, &state.store.output_url(&slot), &solution);
    Ok(Html(page).into_response())
}

/// Sample result page with fixed values, showing the most recent output.
async fn demo_result_handler(State(state): State<SharedState>) -> Html<String> {
    let prediction = BestPrediction {
        disease_name: "Powdery Mildew".to_string(),
        confidence: "98.00%".to_string(),
        coordinates: vec![50.0, 70.0, 150.0, 200.0],
    };
    let image_path = state.store.latest_url();
    let solution = state
        .advisor
        .resolve(&prediction.disease_name, intake::DEFAULT_LANGUAGE)
        .await;

    Html(render::result_page(&prediction, &image_path, &solution))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}
