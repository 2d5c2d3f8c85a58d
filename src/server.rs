use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BufMut;
use chrono::Utc;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::auth::{Gateway, StaticPrincipals};
use crate::embed::Embedder;
use crate::error::{handle_rejection, ApiError};
use crate::model::CatalogRecord;
use crate::topk::select_top_k;
use crate::Catalog;

// 16MB cap keeps oversized uploads from exhausting memory
const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

const WELCOME_HTML: &str =
    "<html><body><h1>Image Search</h1><p>POST an image to /searchImg to find similar catalog entries.</p></body></html>";
const SEARCH_HTML: &str =
    "<html><body><form method=\"post\" enctype=\"multipart/form-data\"><input type=\"file\" name=\"query_img\"/><input type=\"submit\"/></form></body></html>";

/// Everything a request handler needs, constructed once at startup and
/// injected into the filters.
pub struct AppContext {
    pub catalog: Arc<Catalog>,
    pub embedder: Arc<dyn Embedder>,
    pub gateway: Gateway<StaticPrincipals>,
    pub uploads_dir: PathBuf,
    pub top_k: usize,
}

type Ctx = Arc<AppContext>;

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize)]
struct ScoreEntry {
    image_path: String,
    name: String,
    description: String,
    date: String,
    distance: f32,
}

#[derive(Serialize)]
struct SearchResponse {
    message: &'static str,
    query_path: String,
    results: Vec<ScoreEntry>,
}

/// The full application: routes plus the rejection stage.
pub fn app(ctx: Ctx) -> BoxedFilter<(impl Reply,)> {
    routes(ctx).recover(handle_rejection).boxed()
}

fn routes(ctx: Ctx) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let login = warp::post()
        .and(warp::path("login"))
        .and(warp::path::end())
        .and(warp::body::form::<LoginForm>())
        .and(with_ctx(ctx.clone()))
        .and_then(handle_login);

    // The landing page is the only route never gated
    let welcome = warp::get()
        .and(warp::path("home"))
        .and(warp::path::end())
        .map(|| warp::reply::html(WELCOME_HTML));

    let search_page = warp::get()
        .and(warp::path("searchByImg"))
        .and(warp::path::end())
        .and(authorized(ctx.clone()))
        .map(|_user: String| warp::reply::html(SEARCH_HTML));

    let search = warp::post()
        .and(
            warp::path("home")
                .or(warp::path("searchByImg"))
                .unify()
                .or(warp::path("searchImg"))
                .unify(),
        )
        .and(warp::path::end())
        .and(authorized(ctx.clone()))
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_ctx(ctx.clone()))
        .and_then(handle_search);

    let create = warp::post()
        .and(warp::path("create"))
        .and(warp::path::end())
        .and(authorized(ctx.clone()))
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_ctx(ctx))
        .and_then(handle_create);

    login
        .or(welcome)
        .or(search_page)
        .or(search)
        .or(create)
}

fn with_ctx(ctx: Ctx) -> impl Filter<Extract = (Ctx,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Gate filter: authenticate the bearer token, authorize the subject,
/// hand the verified identity to the wrapped handler. Requests failing
/// either check never reach downstream handlers.
fn authorized(ctx: Ctx) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_ctx(ctx))
        .and_then(|header: Option<String>, ctx: Ctx| async move {
            ctx.gateway
                .authorize(header.as_deref())
                .map_err(|e| warp::reject::custom(ApiError::from(e)))
        })
}

fn reject(e: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(e.into())
}

async fn handle_login(form: LoginForm, ctx: Ctx) -> Result<impl Reply, Rejection> {
    let token = ctx
        .gateway
        .login(&form.username, &form.password)
        .map_err(reject)?;

    tracing::info!(user = %form.username, "login ok");
    Ok(warp::reply::json(&TokenResponse { token }))
}

async fn handle_search(user: String, form: FormData, ctx: Ctx) -> Result<impl Reply, Rejection> {
    let upload = read_multipart(form).await.map_err(reject)?;
    let (filename, bytes) = upload
        .file("query_img")
        .ok_or_else(|| reject(ApiError::Validation("Missing file 'query_img'".into())))?;

    let img = image::load_from_memory(bytes)
        .map_err(|_| reject(ApiError::Validation("Unreadable image".into())))?;

    // Keep a copy of the query image for audit/display; no catalog change
    let query_path = save_upload(&ctx.uploads_dir, filename, bytes)
        .await
        .map_err(|e| reject(ApiError::Upstream(format!("saving query image: {e}"))))?;

    let embedder = ctx.embedder.clone();
    let catalog = ctx.catalog.clone();
    let k = ctx.top_k;

    // Embedding and the full-catalog scan are compute/IO heavy; keep them
    // off the async workers
    let ranked = tokio::task::spawn_blocking(move || {
        let query = embedder.extract(&img);
        let records = catalog.scan().map_err(ApiError::from)?;
        select_top_k(&query, records, k).map_err(ApiError::from)
    })
    .await
    .map_err(|e| reject(ApiError::Upstream(format!("search task: {e}"))))?
    .map_err(reject)?;

    tracing::info!(user = %user, hits = ranked.len(), "search complete");

    let results = ranked
        .into_iter()
        .map(|r| ScoreEntry {
            image_path: r.record.image_path,
            name: r.record.name,
            description: r.record.description,
            date: r.record.date,
            distance: r.distance,
        })
        .collect();

    Ok(warp::reply::json(&SearchResponse {
        message: "found",
        query_path,
        results,
    }))
}

async fn handle_create(user: String, form: FormData, ctx: Ctx) -> Result<impl Reply, Rejection> {
    let upload = read_multipart(form).await.map_err(reject)?;

    let name = upload.field("product_name").map_err(reject)?;
    let date = upload.field("product_date").map_err(reject)?;
    let desc = upload.field("product_desc").map_err(reject)?;
    let (filename, bytes) = upload
        .file("product_image")
        .ok_or_else(|| reject(ApiError::Validation("Missing file 'product_image'".into())))?;

    let img = image::load_from_memory(bytes)
        .map_err(|_| reject(ApiError::Validation("Unreadable image".into())))?;

    let embedder = ctx.embedder.clone();
    let embedding = tokio::task::spawn_blocking(move || embedder.extract(&img))
        .await
        .map_err(|e| reject(ApiError::Upstream(format!("embedding task: {e}"))))?;

    // Persist the image first so a stored image_path always resolves
    let image_path = save_upload(&ctx.uploads_dir, filename, bytes)
        .await
        .map_err(|e| reject(ApiError::Upstream(format!("saving product image: {e}"))))?;

    let record = CatalogRecord::new(
        Uuid::new_v4(),
        name,
        desc,
        date,
        image_path.clone(),
        embedding,
    );

    if let Err(e) = ctx.catalog.insert(record) {
        // Roll the image back rather than leave an orphan on disk
        let _ = tokio::fs::remove_file(&image_path).await;
        return Err(reject(e));
    }

    tracing::info!(user = %user, path = %image_path, "product created");

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "message": "Product created" })),
        StatusCode::CREATED,
    ))
}

/// Collected multipart body: text fields plus at most one file per name.
struct UploadForm {
    fields: HashMap<String, String>,
    files: HashMap<String, (String, Vec<u8>)>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Result<String, ApiError> {
        self.fields
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| ApiError::Validation(format!("Missing field '{name}'")))
    }

    fn file(&self, name: &str) -> Option<(&str, &[u8])> {
        self.files
            .get(name)
            .map(|(filename, bytes)| (filename.as_str(), bytes.as_slice()))
    }
}

async fn read_multipart(mut form: FormData) -> Result<UploadForm, ApiError> {
    let mut fields = HashMap::new();
    let mut files = HashMap::new();

    // multer requires each part's bytes to be fully consumed before the
    // next part is polled, so stream one part at a time
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = part.name().to_string();
        let filename = part.filename().map(|f| f.to_string());

        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| {
                acc.put(buf);
                async move { Ok(acc) }
            })
            .await
            .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?;

        match filename {
            Some(f) => {
                files.insert(name, (f, data));
            }
            None => {
                fields.insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }

    Ok(UploadForm { fields, files })
}

/// Write an uploaded file under the uploads dir, namespaced by an
/// ISO-8601 timestamp (':' swapped for '.') plus the original filename so
/// concurrent uploads of the same name never collide.
async fn save_upload(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<String> {
    let stamp = Utc::now().format("%Y-%m-%dT%H.%M.%S%.6f").to_string();
    let safe_name = filename.replace(['/', '\\'], "_");
    let path = dir.join(format!("{stamp}_{safe_name}"));

    tokio::fs::write(&path, bytes).await?;
    Ok(path.to_string_lossy().into_owned())
}
