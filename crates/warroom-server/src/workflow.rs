use crate::db::{
    MissionRecord, ProposalRecord, TaskRecord, fetch_proposal, first_board, insert_event,
    insert_mission, insert_proposal, insert_task, query_proposals,
};
use crate::error::ApiError;
use crate::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use rusqlite::{Connection, params};
use serde::Deserialize;
use tracing::info;
use warroom_core::{
    MissionId, MissionStatus, ProposalId, ProposalStatus, TaskId, TaskStatus, now_ms,
    priority_for_risk, route_domain,
};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    #[serde(default)]
    pub time_estimate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub action: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug)]
pub enum DecisionOutcome {
    Approved { task: TaskRecord, mission: MissionRecord },
    Rejected,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ProposalRecord>, ApiError> {
    let db = state.db.lock().await;
    let proposal = submit_proposal(&db, &state.operator, request)?;
    info!(proposal_id = %proposal.id, title = %proposal.title, "proposal submitted");
    Ok(Json(proposal))
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProposalRecord>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(query_proposals(&db)?))
}

pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DecideRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut db = state.db.lock().await;
    match decide_proposal(&mut db, &state.operator, &id, &request)? {
        DecisionOutcome::Approved { task, mission } => {
            info!(proposal_id = %id, task_id = %task.id, mission_id = %mission.id, "proposal approved");
            Ok(Json(serde_json::json!({ "task": task, "mission": mission })))
        }
        DecisionOutcome::Rejected => {
            info!(proposal_id = %id, "proposal rejected");
            Ok(Json(serde_json::json!({ "success": true })))
        }
    }
}

pub fn submit_proposal(
    conn: &Connection,
    operator: &str,
    request: SubmitRequest,
) -> Result<ProposalRecord, ApiError> {
    let title = request.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }

    let now = now_ms();
    let proposal = ProposalRecord {
        id: ProposalId::new().to_string(),
        title: title.to_string(),
        description: request.description,
        source: request.source.unwrap_or_else(|| "manual".to_string()),
        domain: request.domain,
        risk_level: Some(request.risk_level.unwrap_or_else(|| "low".to_string())),
        status: ProposalStatus::Pending,
        requested_by: request.requested_by.unwrap_or_else(|| operator.to_string()),
        approved_at: None,
        approved_by: None,
        project_id: request.project_id,
        cost_estimate: request.cost_estimate,
        time_estimate: request.time_estimate,
        auto_approved: false,
        council_review: false,
        reviews: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    insert_proposal(conn, &proposal)?;
    insert_event(
        conn,
        "proposal_created",
        Some(&proposal.id),
        None,
        &format!("Proposal created: {}", proposal.title),
    )?;
    Ok(proposal)
}

pub fn decide_proposal(
    conn: &mut Connection,
    operator: &str,
    id: &str,
    request: &DecideRequest,
) -> Result<DecisionOutcome, ApiError> {
    match request.action.as_str() {
        "approve" => approve(conn, operator, id, request.project_id.as_deref()),
        "reject" => reject(conn, id),
        _ => Err(ApiError::bad_request("action must be approve or reject")),
    }
}

/// Approve a proposal and materialize its Task and Mission in one store
/// transaction. The status guard makes concurrent double-approval lose
/// cleanly with a conflict instead of fanning out twice.
fn approve(
    conn: &mut Connection,
    operator: &str,
    id: &str,
    project_id: Option<&str>,
) -> Result<DecisionOutcome, ApiError> {
    let now = now_ms();
    let tx = conn.transaction()?;

    let changed = tx.execute(
        "
        UPDATE proposals
        SET status = 'approved',
            approved_at = ?2,
            approved_by = ?3,
            project_id = COALESCE(?4, project_id),
            updated_at = ?2
        WHERE id = ?1 AND status = 'pending'
        ",
        params![id, now as i64, operator, project_id],
    )?;
    if changed == 0 {
        // Zero rows means missing or already settled; the in-transaction
        // read tells which, and names the state the proposal is really in.
        let current =
            fetch_proposal(&tx, id)?.ok_or_else(|| ApiError::not_found("proposal not found"))?;
        return Err(ApiError::conflict(format!(
            "proposal already {}",
            current.status.as_str()
        )));
    }

    let proposal = fetch_proposal(&tx, id)?
        .ok_or_else(|| ApiError::internal("failed to reload proposal after approval"))?;

    let board_id = match project_id {
        Some(pid) => first_board(&tx, pid)?,
        None => None,
    };

    let task = TaskRecord {
        id: TaskId::new().to_string(),
        project_id: project_id.map(str::to_string),
        board_id,
        proposal_id: Some(id.to_string()),
        title: proposal.title.clone(),
        status: TaskStatus::Todo,
        goal: proposal.description.clone(),
        priority: priority_for_risk(proposal.risk_level.as_deref()),
        owner: None,
        notes: None,
        created_at: now,
        updated_at: now,
    };
    insert_task(&tx, &task)?;

    let agent = route_domain(proposal.domain.as_deref());
    let mission = MissionRecord {
        id: MissionId::new().to_string(),
        proposal_id: Some(id.to_string()),
        title: proposal.title.clone(),
        assigned_to: agent.to_string(),
        status: MissionStatus::Queued,
        started_at: None,
        completed_at: None,
        result: None,
        created_at: now,
    };
    insert_mission(&tx, &mission)?;

    insert_event(
        &tx,
        "proposal_approved",
        Some(id),
        Some(agent),
        &format!("Proposal approved: {}", proposal.title),
    )?;

    tx.commit()?;
    Ok(DecisionOutcome::Approved { task, mission })
}

fn reject(conn: &mut Connection, id: &str) -> Result<DecisionOutcome, ApiError> {
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE proposals SET status = 'rejected', updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, now_ms() as i64],
    )?;
    if changed == 0 {
        let current =
            fetch_proposal(&tx, id)?.ok_or_else(|| ApiError::not_found("proposal not found"))?;
        return Err(ApiError::conflict(format!(
            "proposal already {}",
            current.status.as_str()
        )));
    }
    let proposal = fetch_proposal(&tx, id)?
        .ok_or_else(|| ApiError::internal("failed to reload proposal after rejection"))?;
    insert_event(
        &tx,
        "proposal_rejected",
        Some(id),
        None,
        &format!("Proposal rejected: {}", proposal.title),
    )?;
    tx.commit()?;
    Ok(DecisionOutcome::Rejected)
}
