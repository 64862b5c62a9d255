//! Debug bar demo server.
//!
//! A small users service instrumented with the debug bar. Open a websocket
//! to `/_debugbar/ws` (or run `debugbar-cli tail`) and hit the routes below
//! to watch requests, queries and errors stream in.
//!
//! ```text
//! GET  /             hello
//! GET  /users        list users            (1 query)
//! POST /users        create a user         (2 queries, custom data)
//! GET  /users/{id}   fetch a user          (1 query, notice on miss)
//! GET  /error        logs an exception with context
//! GET  /panic        panics; recovered as a 500
//! ```

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use debugbar::config::watcher::ConfigWatcher;
use debugbar::config::{load_config, AppConfig};
use debugbar::lifecycle::{wait_for_signal, Shutdown};
use debugbar::observability::{logging, metrics};
use debugbar::{hooks, Carrier, DebugBar, QueryOutcome};

#[derive(Parser, Debug)]
#[command(name = "debugbar", version, about = "Debug bar demo server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct User {
    id: u64,
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

#[derive(Debug, thiserror::Error)]
enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("UNIQUE constraint failed: users.email")]
    DuplicateEmail,
}

/// In-memory users table that reports every operation to the debug bar.
#[derive(Clone)]
struct UserRepo {
    bar: DebugBar,
    rows: Arc<RwLock<BTreeMap<u64, User>>>,
    next_id: Arc<AtomicU64>,
}

impl UserRepo {
    fn new(bar: DebugBar) -> Self {
        Self {
            bar,
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn all(&self, carrier: &Carrier) -> Vec<User> {
        let token = self.bar.on_operation_start(carrier);
        io_latency().await;
        let users: Vec<User> = self.rows.read().await.values().cloned().collect();
        self.bar.on_operation_end(
            token,
            QueryOutcome::new("SELECT * FROM `users`").rows_affected(users.len() as i64),
        );
        users
    }

    async fn find(&self, carrier: &Carrier, id: u64) -> Result<User, RepoError> {
        let token = self.bar.on_operation_start(carrier);
        io_latency().await;
        let found = self.rows.read().await.get(&id).cloned();
        let outcome = QueryOutcome::new("SELECT * FROM `users` WHERE `users`.`id` = ? LIMIT 1").arg(id);
        match found {
            Some(user) => {
                self.bar.on_operation_end(token, outcome.rows_affected(1));
                Ok(user)
            }
            None => {
                self.bar.on_operation_end(token, outcome.error(RepoError::NotFound));
                Err(RepoError::NotFound)
            }
        }
    }

    async fn create(&self, carrier: &Carrier, new: NewUser) -> Result<User, RepoError> {
        let token = self.bar.on_operation_start(carrier);
        io_latency().await;
        let taken = self.rows.read().await.values().any(|u| u.email == new.email);
        self.bar.on_operation_end(
            token,
            QueryOutcome::new("SELECT count(*) FROM `users` WHERE `email` = ?")
                .arg(new.email.as_str())
                .rows_affected(i64::from(taken)),
        );

        let token = self.bar.on_operation_start(carrier);
        io_latency().await;
        let insert = QueryOutcome::new("INSERT INTO `users` (`name`,`email`) VALUES (?,?)")
            .arg(new.name.as_str())
            .arg(new.email.as_str());
        if taken {
            self.bar
                .on_operation_end(token, insert.error(RepoError::DuplicateEmail));
            return Err(RepoError::DuplicateEmail);
        }

        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: new.name,
            email: new.email,
        };
        self.rows.write().await.insert(user.id, user.clone());
        self.bar.on_operation_end(token, insert.rows_affected(1));
        Ok(user)
    }
}

/// Pretend the table lives on the other side of a network hop.
async fn io_latency() {
    tokio::time::sleep(Duration::from_micros(fastrand::u64(200..2_000))).await;
}

#[derive(Clone)]
struct AppState {
    bar: DebugBar,
    users: UserRepo,
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hello, World!" }))
}

async fn list_users(State(state): State<AppState>, carrier: Carrier) -> Json<Vec<User>> {
    Json(state.users.all(&carrier).await)
}

async fn create_user(
    State(state): State<AppState>,
    carrier: Carrier,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Response {
    let Json(new) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let reason = rejection.body_text();
            state
                .bar
                .log_warning(&carrier, format!("Invalid user data: {reason}"));
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
        }
    };

    match state.users.create(&carrier, new).await {
        Ok(user) => {
            state.bar.add_custom_data(&carrier, "created_user_id", user.id);
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e) => {
            state.bar.log_error(&carrier, &e);
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": "Failed to create user" })),
            )
                .into_response()
        }
    }
}

async fn get_user(
    State(state): State<AppState>,
    carrier: Carrier,
    Path(id): Path<u64>,
) -> Response {
    match state.users.find(&carrier, id).await {
        Ok(user) => Json(user).into_response(),
        Err(RepoError::NotFound) => {
            state.bar.log_notice(&carrier, format!("User not found: {id}"));
            (StatusCode::NOT_FOUND, Json(json!({ "error": "User not found" }))).into_response()
        }
        Err(e) => {
            state.bar.log_error(&carrier, &e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch user" })),
            )
                .into_response()
        }
    }
}

async fn trigger_error(State(state): State<AppState>, carrier: Carrier) -> Response {
    let err = std::io::Error::other("this is a test error");
    let mut context = BTreeMap::new();
    context.insert("custom_field".to_string(), json!("custom_value"));
    context.insert("user_id".to_string(), json!(123));
    state.bar.log_error_with_context(&carrier, &err, context);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

async fn trigger_panic() -> &'static str {
    panic!("intentional panic for testing");
}

#[allow(deprecated)]
fn build_app(config: &AppConfig, bar: DebugBar) -> Router {
    let state = AppState {
        users: UserRepo::new(bar.clone()),
        bar: bar.clone(),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/error", get(trigger_error))
        .route("/panic", get(trigger_panic))
        .with_state(state);

    hooks::instrument(app, bar.clone())
        .merge(bar.routes())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "debugbar demo starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let bar = DebugBar::new(config.debugbar.clone());
    let hub_task = bar.start()?;

    // Keep the watcher alive for the life of the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, config.debugbar.clone());
            let watcher = watcher.run()?;
            let reload_bar = bar.clone();
            tokio::spawn(async move {
                while let Some(debugbar) = updates.recv().await {
                    reload_bar.apply_config(debugbar);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let app = build_app(&config, bar.clone());

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        websocket = %config.debugbar.websocket_path,
        api = %config.debugbar.api_prefix,
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_signal(shutdown.clone()))
    .await?;

    bar.shutdown();
    if let Err(e) = hub_task.await {
        tracing::warn!(error = %e, "Hub task did not stop cleanly");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
