#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! HTML form surface over the wine-quality prediction pipeline.
//!
//! Every POST loads the model afresh, so a retrained artifact is picked up
//! without restarting the server.

use std::{
    collections::HashMap,
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{Form, State},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use vintage_pipeline::PredictionPipeline;

/// Input fields shown on the form.
///
/// Values are passed to the model positionally, so this order must match the
/// training column order; the model's own column names are not consulted.
pub const FORM_FIELDS: [&str; 11] = [
    "fixed_acidity",
    "volatile_acidity",
    "citric_acid",
    "residual_sugar",
    "chlorides",
    "free_sulfur_dioxide",
    "total_sulfur_dioxide",
    "density",
    "pH",
    "sulphates",
    "alcohol",
];

/// Body returned for any failed prediction.
pub const FAILURE_BODY: &str = "something is wrong";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    model_path: Arc<PathBuf>,
}

impl AppState {
    /// State serving the model stored at `model_path`.
    #[must_use]
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: Arc::new(model_path.into()),
        }
    }
}

/// Routes: `GET /`, `GET /predict`, `POST /predict`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(form_page))
        .route("/predict", get(form_page).post(predict))
        .with_state(state)
}

async fn form_page() -> Html<String> {
    Html(render_form())
}

async fn predict(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let model_path = Arc::clone(&state.model_path);
    let outcome = match tokio::task::spawn_blocking(move || score(&model_path, &fields)).await {
        Ok(result) => result,
        Err(err) => Err(anyhow!("prediction task failed: {err}")),
    };
    match outcome {
        Ok((inputs, prediction)) => Html(render_result(&inputs, prediction)).into_response(),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "prediction request failed");
            FAILURE_BODY.into_response()
        }
    }
}

fn score(
    model_path: &Path,
    fields: &HashMap<String, String>,
) -> Result<(Vec<(String, f64)>, f64)> {
    let pipeline = PredictionPipeline::new(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    let inputs = FORM_FIELDS
        .iter()
        .map(|name| {
            let raw = fields
                .get(*name)
                .with_context(|| format!("missing form field {name}"))?;
            let value = raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("field {name} is not a number: {raw:?}"))?;
            Ok(((*name).to_owned(), value))
        })
        .collect::<Result<Vec<_>>>()?;
    let row: Vec<f64> = inputs.iter().map(|(_, value)| *value).collect();
    anyhow::ensure!(
        row.len() == pipeline.feature_names().len(),
        "model expects {} features, the form carries {}",
        pipeline.feature_names().len(),
        row.len()
    );
    let prediction = pipeline.predict(&row)?;
    Ok((inputs, prediction))
}

fn render_form() -> String {
    let mut body = String::from(
        "<!doctype html>\n<html><head><title>Wine quality</title></head><body>\n\
         <h1>Wine quality prediction</h1>\n<form method=\"post\" action=\"/predict\">\n",
    );
    for field in FORM_FIELDS {
        let _ = writeln!(
            body,
            "<label>{label} <input type=\"text\" name=\"{field}\" required></label><br>",
            label = field.replace('_', " ")
        );
    }
    body.push_str("<button type=\"submit\">Predict</button>\n</form>\n</body></html>\n");
    body
}

fn render_result(inputs: &[(String, f64)], prediction: f64) -> String {
    let mut body = String::from(
        "<!doctype html>\n<html><head><title>Wine quality</title></head><body>\n\
         <h1>Predicted quality</h1>\n",
    );
    let _ = writeln!(body, "<p id=\"prediction\">{prediction}</p>\n<table>");
    for (name, value) in inputs {
        let _ = writeln!(
            body,
            "<tr><td>{}</td><td>{value}</td></tr>",
            escape_html(name)
        );
    }
    body.push_str("</table>\n<a href=\"/predict\">Back</a>\n</body></html>\n");
    body
}

/// Escapes the five HTML-significant characters.
#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
