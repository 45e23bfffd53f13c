use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod caption;
mod error;
mod gallery;
mod gemini;
mod pipeline;
mod store;

use error::AppError;
use gemini::{Captioner, GeminiCaptioner};
use store::{GcsStore, ObjectStore};

const BUCKET_NAME: &str = "caption-gallery-bucket";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ObjectStore>,
    captioner: Arc<dyn Captioner>,
}

#[derive(Deserialize)]
struct IndexParams {
    image: Option<String>,
    error: Option<String>,
}

async fn index(
    State(state): State<AppState>,
    Query(params): Query<IndexParams>,
) -> Result<Html<String>, AppError> {
    gallery::prune_invalid(state.store.as_ref()).await?;
    let images = gallery::list_selectable(state.store.as_ref()).await?;

    let record;
    let selection = match params.image.as_deref() {
        Some(key) => {
            record = gallery::select(state.store.as_ref(), key).await;
            Some((key, &record))
        }
        None => None,
    };

    Ok(Html(gallery::render_index(
        &images,
        selection,
        params.error.as_deref(),
    )))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let result = async {
        let (filename, data) = receive_form_file(&mut multipart).await?;
        pipeline::run_upload(
            state.store.as_ref(),
            state.captioner.as_ref(),
            &filename,
            data,
        )
        .await
    }
    .await;

    match result {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => {
            error!(error = %e, "upload failed");
            let notice = gallery::encode_query_value(&e.to_string());
            Redirect::to(&format!("/?error={notice}")).into_response()
        }
    }
}

async fn receive_form_file(multipart: &mut Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidUpload(e.to_string()))?
    {
        if field.name() != Some("form_file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or(AppError::MissingFile)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidUpload(e.to_string()))?;
        return Ok((filename, data));
    }
    Err(AppError::MissingFile)
}

#[derive(Deserialize)]
struct DisplayForm {
    file: String,
}

async fn display_image(Form(form): Form<DisplayForm>) -> Redirect {
    let key = gallery::encode_query_value(&form.file);
    Redirect::to(&format!("/?image={key}"))
}

async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state.store.read_bytes(&filename).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/display-image", post(display_image))
        .route("/get-image/:filename", get(get_image))
        .nest_service("/files", ServeDir::new("files"))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("caption_gallery=info,tower_http=info")),
        )
        .init();

    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

    // Legacy local-file route; the directory must exist before ServeDir hits it.
    tokio::fs::create_dir_all("files").await?;

    let store = GcsStore::connect(BUCKET_NAME)
        .await
        .context("failed to build storage client")?;
    let captioner = GeminiCaptioner::new(api_key)?;

    let state = AppState {
        store: Arc::new(store),
        captioner: Arc::new(captioner),
    };

    let listener = tokio::net::TcpListener::bind("0.0.0.0:5005").await?;
    info!("listening on http://localhost:5005");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
