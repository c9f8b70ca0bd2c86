mod db;
mod dispatch;
mod error;
mod relay;
mod workflow;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, patch, post},
};
use clap::{Parser, Subcommand};
use db::{AgentRecord, DashboardStats, EventRecord, dashboard_stats, init_db, query_agents, query_events};
use dispatch::EngineLauncher;
use error::ApiError;
use relay::{ChatLauncher, CliChatLauncher};
use rusqlite::Connection;
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "warroom-server", about = "War Room control-plane service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        #[arg(long, default_value_t = 8900)]
        port: u16,
        #[arg(long, default_value = "./var/warroom.db")]
        db_path: PathBuf,
        /// Operator identity recorded as approver and default requester.
        #[arg(long, default_value = "sensei")]
        operator: String,
        /// Engine CLI invoked as `<engine-cmd> execute-mission <id>`.
        #[arg(long, default_value = "warroom-engine")]
        engine_cmd: String,
        #[arg(long, default_value = ".")]
        engine_dir: PathBuf,
        /// Soft ceiling on a detached engine run, for logging only.
        #[arg(long, default_value_t = 1800)]
        engine_timeout_secs: u64,
        /// Conversational CLI spawned per chat message.
        #[arg(long, default_value = "claude")]
        chat_cli: String,
        #[arg(long, default_value = ".")]
        chat_dir: PathBuf,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub operator: String,
    pub engine: Arc<EngineLauncher>,
    pub chat: Arc<dyn ChatLauncher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Serve {
            port,
            db_path,
            operator,
            engine_cmd,
            engine_dir,
            engine_timeout_secs,
            chat_cli,
            chat_dir,
        } => {
            let connection = init_db(&db_path)?;
            info!("sqlite database at {}", db_path.display());

            let state = AppState {
                db: Arc::new(Mutex::new(connection)),
                operator,
                engine: Arc::new(EngineLauncher {
                    command: engine_cmd,
                    workdir: engine_dir,
                    deadline: Duration::from_secs(engine_timeout_secs),
                }),
                chat: Arc::new(CliChatLauncher { cli_path: chat_cli, workdir: chat_dir }),
            };
            serve(port, state).await?;
        }
    }

    Ok(())
}

async fn serve(port: u16, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/proposals", post(workflow::submit).get(workflow::list))
        .route("/v1/proposals/{id}", patch(workflow::decide))
        .route("/v1/agents", get(list_agents))
        .route("/v1/missions", get(dispatch::list))
        .route("/v1/missions/{id}/execute", post(dispatch::execute))
        .route("/v1/events", get(list_events))
        .route("/v1/stats", get(get_stats))
        .route("/v1/chat/threads", get(relay::list_threads).post(relay::create_thread))
        .route("/v1/chat/threads/{id}/messages", get(relay::list_messages))
        .route("/v1/chat", post(relay::send_chat))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("war room control plane listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(query_events(&db, query.limit.unwrap_or(50))?))
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<AgentRecord>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(query_agents(&db)?))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(dashboard_stats(&db)?))
}
