//! Trawl HTTP Server
//!
//! The process binary: loads the configuration, assembles the remote
//! clients and the maintenance pipeline, and serves the HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /update` - Accept a delta message for asynchronous processing
//! - `GET /health` - Store and engine reachability
//! - `GET /{type}/search` - Search within the caller's allowed groups
//! - `POST /{type}/index` - Re-enqueue every root subject of a type
//! - `POST /{type}/invalidate` - Mark the type's indexes stale
//! - `DELETE /{type}` - Remove the type's indexes
//! - `POST /{type}/raw` - Raw engine query passthrough (when enabled)
//!
//! # Example
//!
//! ```bash
//! trawl-httpd \
//!   --config-file /config/search.json \
//!   --sparql-endpoint http://database:8890/sparql \
//!   --engine-url http://elasticsearch:9200 \
//!   --listen 0.0.0.0:8080
//! ```

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use trawl_client::sparql::format_uri;
use trawl_client::{
    AuthContext, CachingExtractor, ContentExtractor, ElasticClient, ExtractorCache,
    HttpExtractorClient, HttpSparqlClient, SearchEngine, SparqlClient, SparqlClientConfig,
};
use trawl_core::{vocab, AuthGroupSet, SearchConfig, TypeDefinition, TypeRegistry};
use trawl_indexer::{
    BulkIndexBuilder, DeltaHandler, DocumentBuilder, IndexManager, IndexManagerConfig,
    IndexUpdateProcessor, IndexerError, UpdateHandler, UpdateHandlerConfig,
};

/// Trawl HTTP Server
#[derive(Parser, Debug)]
#[command(name = "trawl-httpd")]
#[command(about = "Authorization-aware search index maintainer for RDF graph stores")]
struct Args {
    /// Configuration file (type definitions, tuning)
    #[arg(long, default_value = "/config/search.json", env = "CONFIG_FILE")]
    config_file: PathBuf,

    /// SPARQL protocol endpoint of the graph store
    #[arg(
        long,
        default_value = "http://database:8890/sparql",
        env = "SPARQL_ENDPOINT"
    )]
    sparql_endpoint: String,

    /// Base URL of the search engine
    #[arg(
        long,
        default_value = "http://elasticsearch:9200",
        env = "SEARCH_ENGINE_URL"
    )]
    engine_url: String,

    /// Content extractor endpoint
    #[arg(
        long,
        default_value = "http://extractor:9998/extract",
        env = "EXTRACTOR_URL"
    )]
    extractor_url: String,

    /// Directory for the content-extraction cache
    #[arg(long, default_value = "/cache", env = "EXTRACTOR_CACHE_DIR")]
    extractor_cache_dir: PathBuf,

    /// Durable file for the update queue
    #[arg(
        long,
        default_value = "/data/update-queue.json",
        env = "UPDATE_QUEUE_FILE"
    )]
    queue_file: PathBuf,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "LISTEN")]
    listen: SocketAddr,
}

/// Application state shared across handlers.
struct AppState {
    config: SearchConfig,
    types: TypeRegistry,
    manager: Arc<IndexManager>,
    delta: DeltaHandler,
    updates: Arc<UpdateHandler>,
    engine: Arc<dyn SearchEngine>,
    sparql: Arc<dyn SparqlClient>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trawl_httpd=info".parse().unwrap())
                .add_directive("trawl_indexer=info".parse().unwrap())
                .add_directive("trawl_client=info".parse().unwrap())
                .add_directive("tower_http=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    info!(
        config_file = %args.config_file.display(),
        sparql_endpoint = %args.sparql_endpoint,
        engine_url = %args.engine_url,
        listen = %args.listen,
        "Starting Trawl HTTP Server"
    );

    let config = match SearchConfig::load(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let types = config
        .type_registry()
        .expect("type definitions validated at load");

    let sparql: Arc<dyn SparqlClient> = Arc::new(
        HttpSparqlClient::new(&args.sparql_endpoint, SparqlClientConfig::default())
            .expect("failed to create SPARQL client"),
    );
    let engine: Arc<dyn SearchEngine> =
        Arc::new(ElasticClient::new(&args.engine_url).expect("failed to create engine client"));
    let extractor: Arc<dyn ContentExtractor> = Arc::new(CachingExtractor::new(
        HttpExtractorClient::new(&args.extractor_url).expect("failed to create extractor client"),
        ExtractorCache::new(&args.extractor_cache_dir),
    ));

    let document_builder = Arc::new(DocumentBuilder::new(
        sparql.clone(),
        extractor,
        &config.attachments_path_base,
    ));
    let bulk_builder = Arc::new(BulkIndexBuilder::new(
        sparql.clone(),
        document_builder.clone(),
        engine.clone(),
        types.clone(),
        config.batch_size,
        config.max_batches,
    ));
    let manager = Arc::new(IndexManager::new(
        types.clone(),
        engine.clone(),
        sparql.clone(),
        bulk_builder,
        IndexManagerConfig {
            persist_indexes: config.persist_indexes,
            default_settings: config.default_settings.clone(),
            ignored_allowed_groups: config.ignored_allowed_groups.clone(),
            eager_indexing_groups: config.eager_indexing_groups.clone(),
            ..Default::default()
        },
    ));

    let updates = UpdateHandler::new(UpdateHandlerConfig {
        wait_interval: config.wait_interval(),
        workers: config.number_of_threads,
        persist_path: Some(args.queue_file.clone()),
        ..Default::default()
    });
    updates.start(Arc::new(IndexUpdateProcessor::new(
        manager.clone(),
        document_builder,
        engine.clone(),
        config.automatic_index_updates,
    )));

    let delta = DeltaHandler::new(
        types.clone(),
        sparql.clone(),
        updates.clone(),
        config.delta_batch_size,
    );

    if let Err(e) = manager.startup().await {
        error!(error = %e, "index manager startup failed");
    }

    let enable_raw = config.enable_raw_dsl_endpoint;
    let state = Arc::new(AppState {
        config,
        types,
        manager,
        delta,
        updates,
        engine,
        sparql,
    });

    let mut app = Router::new()
        .route("/update", post(handle_update))
        .route("/health", get(handle_health))
        .route("/{type_path}/search", get(handle_search))
        .route("/{type_path}/index", post(handle_reindex))
        .route("/{type_path}/invalidate", post(handle_invalidate))
        .route("/{type_path}", delete(handle_remove));
    if enable_raw {
        app = app.route("/{type_path}/raw", post(handle_raw));
    }
    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .expect("Failed to bind address");

    info!(address = %args.listen, "Server listening");

    axum::serve(listener, app).await.expect("Server error");
}

/// Handle POST /update
async fn handle_update(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if let Err(e) = state.delta.accept_json(body) {
        // Malformed deltas are logged and discarded
        warn!(error = %e, "discarding malformed delta message");
    }
    StatusCode::ACCEPTED
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: bool,
    engine: bool,
    queue_length: usize,
    version: &'static str,
}

/// Handle GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.sparql.health_check().await.unwrap_or(false);
    let engine = state.engine.health().await.unwrap_or(false);
    let healthy = store && engine;

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        store,
        engine,
        queue_length: state.updates.queue_length(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Resolve the caller's allowed groups from the request headers.
///
/// When the header is absent, a trivial query is sent through the
/// authorizing proxy so it can resolve the caller's groups out of band;
/// until then the caller searches with an empty group set.
async fn resolve_groups(state: &AppState, headers: &HeaderMap) -> Result<AuthGroupSet, ApiResponse> {
    match headers.get(vocab::headers::ALLOWED_GROUPS) {
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                error_response(StatusCode::UNAUTHORIZED, "unreadable allowed-groups header")
            })?;
            let groups = AuthGroupSet::from_json(raw).map_err(|e| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    &format!("invalid allowed-groups header: {}", e),
                )
            })?;
            Ok(groups.without(&state.config.ignored_allowed_groups))
        }
        None => {
            if let Err(e) = state
                .sparql
                .ask("ASK { ?s ?p ?o }", &AuthContext::Default)
                .await
            {
                warn!(error = %e, "group resolution probe failed");
            }
            Ok(AuthGroupSet::default())
        }
    }
}

type ApiResponse = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(json!({ "error": message })))
}

fn indexer_error_response(e: &IndexerError) -> ApiResponse {
    use trawl_client::ClientError;
    let status = match e {
        IndexerError::ReadinessTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        IndexerError::UnknownType(_) => StatusCode::NOT_FOUND,
        IndexerError::Client(ClientError::BadRequest(_)) => StatusCode::BAD_REQUEST,
        IndexerError::Client(ClientError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
        IndexerError::Client(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "internal error");
    }
    error_response(status, &e.to_string())
}

fn lookup_type<'a>(
    state: &'a AppState,
    type_path: &str,
) -> Result<&'a Arc<TypeDefinition>, ApiResponse> {
    state
        .types
        .by_path(type_path)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "unknown type path"))
}

/// Handle GET /{type}/search
async fn handle_search(
    State(state): State<Arc<AppState>>,
    Path(type_path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let type_def = match lookup_type(&state, &type_path) {
        Ok(t) => t.clone(),
        Err(response) => return response,
    };
    let groups = match resolve_groups(&state, &headers).await {
        Ok(groups) => groups,
        Err(response) => return response,
    };

    let body = match params.get("q") {
        Some(q) => json!({
            "query": { "query_string": { "query": q } },
            "size": page_size(&params),
            "from": page_offset(&params),
        }),
        None => json!({
            "query": { "match_all": {} },
            "size": page_size(&params),
            "from": page_offset(&params),
        }),
    };

    let indexes = match state.manager.fetch_indexes(&type_def.name, &groups, false).await {
        Ok(indexes) => indexes,
        Err(e) => return indexer_error_response(&e),
    };

    let mut total = 0;
    let mut hits = Vec::new();
    for index in &indexes {
        match state.engine.search(&index.name, &body).await {
            Ok(page) => {
                total += page.total;
                hits.extend(page.hits.into_iter().map(|hit| {
                    json!({
                        "id": hit.id,
                        "score": hit.score,
                        "document": hit.document,
                    })
                }));
            }
            Err(e) => return indexer_error_response(&e.into()),
        }
    }

    (StatusCode::OK, Json(json!({ "count": total, "hits": hits })))
}

fn page_size(params: &HashMap<String, String>) -> usize {
    params
        .get("size")
        .and_then(|s| s.parse().ok())
        .unwrap_or(10)
}

fn page_offset(params: &HashMap<String, String>) -> usize {
    params
        .get("from")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Handle POST /{type}/raw
async fn handle_raw(
    State(state): State<Arc<AppState>>,
    Path(type_path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let type_def = match lookup_type(&state, &type_path) {
        Ok(t) => t.clone(),
        Err(response) => return response,
    };
    let groups = match resolve_groups(&state, &headers).await {
        Ok(groups) => groups,
        Err(response) => return response,
    };

    let indexes = match state.manager.fetch_indexes(&type_def.name, &groups, false).await {
        Ok(indexes) => indexes,
        Err(e) => return indexer_error_response(&e),
    };

    let mut hits = Vec::new();
    let mut total = 0;
    for index in &indexes {
        match state.engine.search(&index.name, &body).await {
            Ok(page) => {
                total += page.total;
                hits.extend(page.hits.into_iter().map(|hit| {
                    json!({ "id": hit.id, "score": hit.score, "document": hit.document })
                }));
            }
            Err(e) => return indexer_error_response(&e.into()),
        }
    }

    (StatusCode::OK, Json(json!({ "count": total, "hits": hits })))
}

/// Handle POST /{type}/index: re-enqueue every root subject of the type.
async fn handle_reindex(
    State(state): State<Arc<AppState>>,
    Path(type_path): Path<String>,
) -> impl IntoResponse {
    let type_def = match lookup_type(&state, &type_path) {
        Ok(t) => t.clone(),
        Err(response) => return response,
    };

    // Composites reindex through their constituents
    let concrete: Vec<Arc<TypeDefinition>> = if type_def.is_composite() {
        type_def
            .composite_of
            .iter()
            .filter_map(|name| state.types.get(name).cloned())
            .collect()
    } else {
        vec![type_def]
    };

    let mut queued = 0;
    for type_def in concrete {
        let classes = type_def
            .rdf_types
            .iter()
            .map(|c| format_uri(c))
            .collect::<Vec<_>>()
            .join(" ");
        let query = format!(
            "SELECT DISTINCT ?s WHERE {{ VALUES ?type {{ {} }} ?s a ?type }}",
            classes
        );
        match state.sparql.select(&query, &AuthContext::Sudo).await {
            Ok(results) => {
                for subject in results.uris("s") {
                    state.updates.add_update(&subject, &type_def.name);
                    queued += 1;
                }
            }
            Err(e) => return indexer_error_response(&e.into()),
        }
    }

    (StatusCode::ACCEPTED, Json(json!({ "queued": queued })))
}

/// Handle POST /{type}/invalidate
async fn handle_invalidate(
    State(state): State<Arc<AppState>>,
    Path(type_path): Path<String>,
) -> impl IntoResponse {
    let type_def = match lookup_type(&state, &type_path) {
        Ok(t) => t.clone(),
        Err(response) => return response,
    };
    let invalidated = state.manager.invalidate_indexes(Some(&type_def.name), None);
    (
        StatusCode::OK,
        Json(json!({ "invalidated": invalidated })),
    )
}

/// Handle DELETE /{type}
async fn handle_remove(
    State(state): State<Arc<AppState>>,
    Path(type_path): Path<String>,
) -> impl IntoResponse {
    let type_def = match lookup_type(&state, &type_path) {
        Ok(t) => t.clone(),
        Err(response) => return response,
    };
    match state.manager.remove_indexes(Some(&type_def.name), None).await {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))),
        Err(e) => indexer_error_response(&e),
    }
}
