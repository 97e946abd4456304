//! HTTP API: `POST /predict` and `GET /health`.

mod error;

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{CONTENT_TYPE, InvalidHeaderValue};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use symptomatic_ai::{InferenceContext, ShapeMismatch};
use symptomatic_core::{PredictResponse, SymptomQuery};
use symptomatic_explain::Explainer;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub use error::ApiError;

/// Browser origins allowed to call the API cross-origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedOrigins {
    #[default]
    Any,
    List(Vec<HeaderValue>),
}

impl AllowedOrigins {
    /// An empty list means any origin.
    pub fn from_list<S: AsRef<str>>(origins: &[S]) -> Result<Self, InvalidHeaderValue> {
        let list = origins
            .iter()
            .map(|o| o.as_ref().trim())
            .filter(|o| !o.is_empty())
            .map(HeaderValue::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if list.is_empty() {
            Self::Any
        } else {
            Self::List(list)
        })
    }

    fn layer(&self) -> CorsLayer {
        match self {
            Self::Any => CorsLayer::permissive(),
            Self::List(origins) => CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins.iter().cloned()))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([CONTENT_TYPE]),
        }
    }
}

/// Shared by every handler. The context is immutable after load.
#[derive(Clone)]
pub struct AppState {
    context: Arc<InferenceContext>,
    explainer: Option<Explainer>,
    origins: AllowedOrigins,
}

impl AppState {
    pub fn new(context: Arc<InferenceContext>) -> Self {
        Self {
            context,
            explainer: None,
            origins: AllowedOrigins::Any,
        }
    }

    /// Attach an explanation to every successful prediction.
    pub fn with_explainer(mut self, explainer: Explainer) -> Self {
        self.explainer = Some(explainer);
        self
    }

    pub fn with_allowed_origins(mut self, origins: AllowedOrigins) -> Self {
        self.origins = origins;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub symptoms: SymptomQuery,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub labels: usize,
    pub keywords: usize,
    pub patched_tensors: Vec<ShapeMismatch>,
}

pub fn router(state: AppState) -> Router {
    let cors = state.origins.layer();
    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload?;

    // Tokenizer and encoder are CPU-bound and may block on the session lock.
    let context = Arc::clone(&state.context);
    let prediction =
        tokio::task::spawn_blocking(move || context.predict(&request.symptoms)).await??;

    let mut response = PredictResponse::from(prediction);
    if let Some(explainer) = &state.explainer {
        let explanation = explainer.explain(&response.predicted_disease).await;
        response = response.with_explanation(explanation);
    }
    Ok(Json(response))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        labels: state.context.labels().len(),
        keywords: state.context.vocabulary().len(),
        patched_tensors: state.context.patched_tensors().to_vec(),
    })
}
