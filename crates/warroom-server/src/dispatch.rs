use crate::AppState;
use crate::db::{MissionRecord, fetch_mission, insert_event};
use crate::error::ApiError;
use axum::{
    Json,
    extract::{Path, State},
};
use rusqlite::{Connection, params};
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::{process::Command, sync::oneshot};
use tracing::{error, info, warn};
use warroom_core::now_ms;

/// Reduce a mission id to the identifier alphabet before it reaches an
/// external process invocation. Everything outside `[A-Za-z0-9-]` is
/// dropped, so shell metacharacters cannot survive.
pub fn sanitize_mission_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(Option<i32>),
    TimedOut,
}

/// Handle on a detached engine run. The watchdog resolves it once the
/// process exits or outlives the soft deadline; dropping the handle does
/// not touch the process.
pub struct JobHandle {
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub async fn outcome(self) -> JobOutcome {
        self.rx.await.unwrap_or(JobOutcome::Failed(None))
    }
}

#[derive(Debug, Clone)]
pub struct EngineLauncher {
    pub command: String,
    pub workdir: PathBuf,
    pub deadline: Duration,
}

impl EngineLauncher {
    /// Spawn the engine for one mission, fire-and-forget. A watchdog task
    /// awaits the child under the deadline and logs the outcome; past the
    /// deadline the child is abandoned, not killed.
    pub fn launch(&self, mission_id: &str) -> JobHandle {
        let safe_id = sanitize_mission_id(mission_id);
        let (tx, rx) = oneshot::channel();

        let mut cmd = Command::new(&self.command);
        cmd.arg("execute-mission")
            .arg(&safe_id)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let deadline = self.deadline;
        tokio::spawn(async move {
            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    error!(mission_id = %safe_id, "failed to spawn engine: {err}");
                    let _ = tx.send(JobOutcome::Failed(None));
                    return;
                }
            };

            let outcome = match tokio::time::timeout(deadline, child.wait_with_output()).await {
                Err(_) => JobOutcome::TimedOut,
                Ok(Err(err)) => {
                    error!(mission_id = %safe_id, "failed to reap engine: {err}");
                    JobOutcome::Failed(None)
                }
                Ok(Ok(output)) if output.status.success() => JobOutcome::Completed,
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    error!(
                        mission_id = %safe_id,
                        code = ?output.status.code(),
                        stderr = %stderr.chars().take(500).collect::<String>(),
                        "engine run failed"
                    );
                    JobOutcome::Failed(output.status.code())
                }
            };
            let _ = tx.send(outcome);
        });

        JobHandle { rx }
    }
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mission = {
        let mut db = state.db.lock().await;
        start_mission(&mut db, &id)?
    };

    // Detached by design: the caller learns only that the run was launched.
    // The watchdog below is the sole witness of the engine's fate.
    let handle = state.engine.launch(&mission.id);
    let mission_id = mission.id.clone();
    tokio::spawn(async move {
        match handle.outcome().await {
            JobOutcome::Completed => info!(mission_id = %mission_id, "engine run completed"),
            JobOutcome::Failed(code) => {
                error!(mission_id = %mission_id, ?code, "engine run failed");
            }
            JobOutcome::TimedOut => {
                warn!(mission_id = %mission_id, "engine run exceeded deadline, abandoned");
            }
        }
    });
    info!(mission_id = %mission.id, assigned_to = %mission.assigned_to, "mission dispatched");

    Ok(Json(serde_json::json!({ "started": true, "mission_id": mission.id })))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<MissionRecord>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(crate::db::query_missions(&db)?))
}

/// Move a queued mission to running and mark its agent busy, atomically.
/// The status guard is the single gate: when it matches no row, the
/// mission is re-read inside the same transaction to report either 404 or
/// a conflict naming the state it is actually in.
pub fn start_mission(conn: &mut Connection, id: &str) -> Result<MissionRecord, ApiError> {
    let now = now_ms();
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE missions SET status = 'running', started_at = ?2 WHERE id = ?1 AND status = 'queued'",
        params![id, now as i64],
    )?;
    if changed == 0 {
        let current =
            fetch_mission(&tx, id)?.ok_or_else(|| ApiError::not_found("mission not found"))?;
        return Err(ApiError::conflict(format!(
            "mission not in queued state (current: {})",
            current.status.as_str()
        )));
    }

    let mission = fetch_mission(&tx, id)?
        .ok_or_else(|| ApiError::internal("failed to reload mission after start"))?;
    tx.execute(
        "UPDATE agent_status SET status = 'busy', current_mission_id = ?2, last_heartbeat = ?3 WHERE id = ?1",
        params![mission.assigned_to, id, now as i64],
    )?;
    insert_event(
        &tx,
        "mission_started",
        Some(id),
        Some(&mission.assigned_to),
        &format!("Mission started: {}", mission.title),
    )?;
    tx.commit()?;

    Ok(mission)
}
