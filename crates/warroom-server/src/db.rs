use crate::error::ApiError;
use anyhow::Result;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::{fs, path::Path};
use warroom_core::{
    AGENT_ROSTER, AgentState, ChatRole, EventId, MessageId, MissionStatus, ProposalStatus, Review,
    TaskStatus, ThreadId, now_ms,
};

#[derive(Debug, Clone, Serialize)]
pub struct ProposalRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub source: String,
    pub domain: Option<String>,
    pub risk_level: Option<String>,
    pub status: ProposalStatus,
    pub requested_by: String,
    pub approved_at: Option<u64>,
    pub approved_by: Option<String>,
    pub project_id: Option<String>,
    pub cost_estimate: Option<f64>,
    pub time_estimate: Option<String>,
    pub auto_approved: bool,
    pub council_review: bool,
    pub reviews: Vec<Review>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: Option<String>,
    pub board_id: Option<String>,
    pub proposal_id: Option<String>,
    pub title: String,
    pub status: TaskStatus,
    pub goal: Option<String>,
    pub priority: i64,
    pub owner: Option<String>,
    pub notes: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionRecord {
    pub id: String,
    pub proposal_id: Option<String>,
    pub title: String,
    pub assigned_to: String,
    pub status: MissionStatus,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub status: AgentState,
    pub current_mission_id: Option<String>,
    pub last_heartbeat: Option<u64>,
    pub missions_completed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source_id: Option<String>,
    pub agent: Option<String>,
    pub message: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    pub agent_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<u64>,
    pub metadata: serde_json::Value,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub thread_id: String,
    pub role: ChatRole,
    pub content: String,
    pub agent_id: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub active_agents: usize,
    pub running_missions: usize,
    pub queued_missions: usize,
    pub pending_proposals: usize,
    pub proposals_today: usize,
}

pub fn init_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    apply_schema(&conn)?;
    Ok(conn)
}

pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS projects (
          id TEXT PRIMARY KEY,
          title TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'todo',
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS boards (
          id TEXT PRIMARY KEY,
          project_id TEXT,
          title TEXT NOT NULL,
          created_at INTEGER NOT NULL,
          FOREIGN KEY(project_id) REFERENCES projects(id)
        );

        CREATE TABLE IF NOT EXISTS proposals (
          id TEXT PRIMARY KEY,
          title TEXT NOT NULL,
          description TEXT,
          source TEXT NOT NULL DEFAULT 'manual',
          domain TEXT,
          risk_level TEXT,
          status TEXT NOT NULL,
          requested_by TEXT NOT NULL,
          approved_at INTEGER,
          approved_by TEXT,
          project_id TEXT,
          cost_estimate REAL,
          time_estimate TEXT,
          auto_approved INTEGER NOT NULL DEFAULT 0,
          council_review INTEGER NOT NULL DEFAULT 0,
          reviews TEXT NOT NULL DEFAULT '[]',
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
          id TEXT PRIMARY KEY,
          project_id TEXT,
          board_id TEXT,
          proposal_id TEXT,
          title TEXT NOT NULL,
          status TEXT NOT NULL,
          goal TEXT,
          priority INTEGER NOT NULL,
          owner TEXT,
          notes TEXT,
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS missions (
          id TEXT PRIMARY KEY,
          proposal_id TEXT,
          title TEXT NOT NULL,
          assigned_to TEXT NOT NULL,
          status TEXT NOT NULL,
          started_at INTEGER,
          completed_at INTEGER,
          result TEXT,
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_status (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          domain TEXT NOT NULL,
          status TEXT NOT NULL,
          current_mission_id TEXT,
          last_heartbeat INTEGER,
          missions_completed INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS events (
          id TEXT PRIMARY KEY,
          type TEXT NOT NULL,
          source_id TEXT,
          agent TEXT,
          message TEXT NOT NULL,
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_threads (
          id TEXT PRIMARY KEY,
          title TEXT NOT NULL,
          agent_id TEXT,
          last_message TEXT,
          last_message_at INTEGER,
          metadata TEXT NOT NULL DEFAULT '{}',
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
          id TEXT PRIMARY KEY,
          thread_id TEXT NOT NULL,
          role TEXT NOT NULL,
          content TEXT NOT NULL,
          agent_id TEXT,
          created_at INTEGER NOT NULL,
          FOREIGN KEY(thread_id) REFERENCES chat_threads(id)
        );
        ",
    )?;
    seed_agents(conn)
}

fn seed_agents(conn: &Connection) -> rusqlite::Result<()> {
    let now = now_ms();
    for (domain, agent) in AGENT_ROSTER {
        conn.execute(
            "
            INSERT INTO agent_status (id, name, domain, status, current_mission_id, last_heartbeat, missions_completed)
            VALUES (?1, ?2, ?3, 'idle', NULL, ?4, 0)
            ON CONFLICT(id) DO NOTHING
            ",
            params![agent, agent, domain, now],
        )?;
    }
    Ok(())
}

pub fn insert_proposal(conn: &Connection, record: &ProposalRecord) -> Result<(), ApiError> {
    let reviews = serde_json::to_string(&record.reviews).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "
        INSERT INTO proposals (
          id, title, description, source, domain, risk_level, status, requested_by,
          approved_at, approved_by, project_id, cost_estimate, time_estimate,
          auto_approved, council_review, reviews, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ",
        params![
            record.id,
            record.title,
            record.description,
            record.source,
            record.domain,
            record.risk_level,
            record.status.as_str(),
            record.requested_by,
            record.project_id,
            record.cost_estimate,
            record.time_estimate,
            record.auto_approved,
            record.council_review,
            reviews,
            record.created_at as i64,
            record.updated_at as i64
        ],
    )?;
    Ok(())
}

pub fn fetch_proposal(conn: &Connection, id: &str) -> Result<Option<ProposalRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, title, description, source, domain, risk_level, status, requested_by,
               approved_at, approved_by, project_id, cost_estimate, time_estimate,
               auto_approved, council_review, reviews, created_at, updated_at
        FROM proposals WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(map_proposal_row(row)?));
    }
    Ok(None)
}

pub fn query_proposals(conn: &Connection) -> Result<Vec<ProposalRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, title, description, source, domain, risk_level, status, requested_by,
               approved_at, approved_by, project_id, cost_estimate, time_estimate,
               auto_approved, council_review, reviews, created_at, updated_at
        FROM proposals
        ORDER BY created_at DESC
        ",
    )?;
    let rows = stmt.query_map([], map_proposal_row)?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

fn map_proposal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProposalRecord> {
    let reviews_raw: String = row.get(15)?;
    Ok(ProposalRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        source: row.get(3)?,
        domain: row.get(4)?,
        risk_level: row.get(5)?,
        status: ProposalStatus::from_str(&row.get::<_, String>(6)?),
        requested_by: row.get(7)?,
        approved_at: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        approved_by: row.get(9)?,
        project_id: row.get(10)?,
        cost_estimate: row.get(11)?,
        time_estimate: row.get(12)?,
        auto_approved: row.get(13)?,
        council_review: row.get(14)?,
        reviews: serde_json::from_str(&reviews_raw).unwrap_or_default(),
        created_at: row.get::<_, i64>(16)? as u64,
        updated_at: row.get::<_, i64>(17)? as u64,
    })
}

/// First board of a project by the store's default ordering. None when the
/// project has no boards.
pub fn first_board(conn: &Connection, project_id: &str) -> Result<Option<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM boards WHERE project_id = ?1 ORDER BY created_at, id LIMIT 1",
    )?;
    let mut rows = stmt.query(params![project_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(row.get(0)?));
    }
    Ok(None)
}

pub fn insert_task(conn: &Connection, record: &TaskRecord) -> Result<(), ApiError> {
    conn.execute(
        "
        INSERT INTO tasks (id, project_id, board_id, proposal_id, title, status, goal, priority, owner, notes, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ",
        params![
            record.id,
            record.project_id,
            record.board_id,
            record.proposal_id,
            record.title,
            record.status.as_str(),
            record.goal,
            record.priority,
            record.owner,
            record.notes,
            record.created_at as i64,
            record.updated_at as i64
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub fn fetch_task(conn: &Connection, id: &str) -> Result<Option<TaskRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, project_id, board_id, proposal_id, title, status, goal, priority, owner, notes, created_at, updated_at
        FROM tasks WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(TaskRecord {
            id: row.get(0)?,
            project_id: row.get(1)?,
            board_id: row.get(2)?,
            proposal_id: row.get(3)?,
            title: row.get(4)?,
            status: TaskStatus::from_str(&row.get::<_, String>(5)?),
            goal: row.get(6)?,
            priority: row.get(7)?,
            owner: row.get(8)?,
            notes: row.get(9)?,
            created_at: row.get::<_, i64>(10)? as u64,
            updated_at: row.get::<_, i64>(11)? as u64,
        }));
    }
    Ok(None)
}

#[cfg(test)]
pub fn tasks_for_proposal(conn: &Connection, proposal_id: &str) -> Result<usize, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE proposal_id = ?1",
        params![proposal_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn insert_mission(conn: &Connection, record: &MissionRecord) -> Result<(), ApiError> {
    let result = record
        .result
        .as_ref()
        .map(|value| serde_json::to_string(value).unwrap_or_default());
    conn.execute(
        "
        INSERT INTO missions (id, proposal_id, title, assigned_to, status, started_at, completed_at, result, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            record.id,
            record.proposal_id,
            record.title,
            record.assigned_to,
            record.status.as_str(),
            record.started_at.map(|v| v as i64),
            record.completed_at.map(|v| v as i64),
            result,
            record.created_at as i64
        ],
    )?;
    Ok(())
}

pub fn fetch_mission(conn: &Connection, id: &str) -> Result<Option<MissionRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, proposal_id, title, assigned_to, status, started_at, completed_at, result, created_at
        FROM missions WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(map_mission_row(row)?));
    }
    Ok(None)
}

pub fn query_missions(conn: &Connection) -> Result<Vec<MissionRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, proposal_id, title, assigned_to, status, started_at, completed_at, result, created_at
        FROM missions
        ORDER BY created_at DESC
        ",
    )?;
    let rows = stmt.query_map([], map_mission_row)?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

#[cfg(test)]
pub fn missions_for_proposal(conn: &Connection, proposal_id: &str) -> Result<usize, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM missions WHERE proposal_id = ?1",
        params![proposal_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn map_mission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionRecord> {
    let result_raw: Option<String> = row.get(7)?;
    Ok(MissionRecord {
        id: row.get(0)?,
        proposal_id: row.get(1)?,
        title: row.get(2)?,
        assigned_to: row.get(3)?,
        status: MissionStatus::from_str(&row.get::<_, String>(4)?),
        started_at: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        completed_at: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        result: result_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

pub fn query_agents(conn: &Connection) -> Result<Vec<AgentRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, name, domain, status, current_mission_id, last_heartbeat, missions_completed
        FROM agent_status
        ORDER BY id
        ",
    )?;
    let rows = stmt.query_map([], map_agent_row)?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

#[cfg(test)]
pub fn fetch_agent(conn: &Connection, id: &str) -> Result<Option<AgentRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, name, domain, status, current_mission_id, last_heartbeat, missions_completed
        FROM agent_status WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(map_agent_row(row)?));
    }
    Ok(None)
}

fn map_agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        status: AgentState::from_str(&row.get::<_, String>(3)?),
        current_mission_id: row.get(4)?,
        last_heartbeat: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        missions_completed: row.get::<_, i64>(6)? as u64,
    })
}

pub fn insert_event(
    conn: &Connection,
    kind: &str,
    source_id: Option<&str>,
    agent: Option<&str>,
    message: &str,
) -> Result<(), ApiError> {
    conn.execute(
        "INSERT INTO events (id, type, source_id, agent, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![EventId::new().to_string(), kind, source_id, agent, message, now_ms() as i64],
    )?;
    Ok(())
}

pub fn query_events(conn: &Connection, limit: usize) -> Result<Vec<EventRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, type, source_id, agent, message, created_at
        FROM events
        ORDER BY created_at DESC
        LIMIT ?1
        ",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(EventRecord {
            id: row.get(0)?,
            kind: row.get(1)?,
            source_id: row.get(2)?,
            agent: row.get(3)?,
            message: row.get(4)?,
            created_at: row.get::<_, i64>(5)? as u64,
        })
    })?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

pub fn insert_thread(
    conn: &Connection,
    title: &str,
    agent_id: Option<&str>,
) -> Result<ThreadRecord, ApiError> {
    let id = ThreadId::new().to_string();
    let now = now_ms();
    conn.execute(
        "
        INSERT INTO chat_threads (id, title, agent_id, last_message, last_message_at, metadata, created_at, updated_at)
        VALUES (?1, ?2, ?3, NULL, NULL, '{}', ?4, ?4)
        ",
        params![id, title, agent_id, now as i64],
    )?;
    fetch_thread(conn, &id)?
        .ok_or_else(|| ApiError::internal("failed to reload thread after creation"))
}

pub fn fetch_thread(conn: &Connection, id: &str) -> Result<Option<ThreadRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, title, agent_id, last_message, last_message_at, metadata, created_at, updated_at
        FROM chat_threads WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(map_thread_row(row)?));
    }
    Ok(None)
}

pub fn query_threads(conn: &Connection) -> Result<Vec<ThreadRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, title, agent_id, last_message, last_message_at, metadata, created_at, updated_at
        FROM chat_threads
        ORDER BY last_message_at DESC, created_at DESC
        ",
    )?;
    let rows = stmt.query_map([], map_thread_row)?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

fn map_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    let metadata_raw: String = row.get(5)?;
    Ok(ThreadRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        agent_id: row.get(2)?,
        last_message: row.get(3)?,
        last_message_at: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        metadata: serde_json::from_str(&metadata_raw)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        created_at: row.get::<_, i64>(6)? as u64,
        updated_at: row.get::<_, i64>(7)? as u64,
    })
}

/// The thread's stored session-continuation identifier, if one has been
/// minted for it.
pub fn thread_session_id(thread: &ThreadRecord) -> Option<String> {
    thread
        .metadata
        .get("session_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

pub fn set_thread_session_id(
    conn: &Connection,
    thread_id: &str,
    session_id: &str,
) -> Result<(), ApiError> {
    let thread = fetch_thread(conn, thread_id)?
        .ok_or_else(|| ApiError::not_found("thread not found"))?;
    let mut metadata = match thread.metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    metadata.insert("session_id".to_string(), serde_json::Value::String(session_id.to_string()));
    conn.execute(
        "UPDATE chat_threads SET metadata = ?2, updated_at = ?3 WHERE id = ?1",
        params![
            thread_id,
            serde_json::Value::Object(metadata).to_string(),
            now_ms() as i64
        ],
    )?;
    Ok(())
}

pub fn insert_message(
    conn: &Connection,
    thread_id: &str,
    role: ChatRole,
    content: &str,
    agent_id: Option<&str>,
) -> Result<MessageRecord, ApiError> {
    let id = MessageId::new().to_string();
    let now = now_ms();
    conn.execute(
        "
        INSERT INTO chat_messages (id, thread_id, role, content, agent_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![id, thread_id, role.as_str(), content, agent_id, now as i64],
    )?;

    let preview: String = content.chars().take(200).collect();
    conn.execute(
        "UPDATE chat_threads SET last_message = ?2, last_message_at = ?3, updated_at = ?3 WHERE id = ?1",
        params![thread_id, preview, now as i64],
    )?;

    Ok(MessageRecord {
        id,
        thread_id: thread_id.to_string(),
        role,
        content: content.to_string(),
        agent_id: agent_id.map(str::to_string),
        created_at: now,
    })
}

pub fn query_messages(conn: &Connection, thread_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, thread_id, role, content, agent_id, created_at
        FROM chat_messages
        WHERE thread_id = ?1
        ORDER BY created_at, id
        ",
    )?;
    let rows = stmt.query_map(params![thread_id], |row| {
        Ok(MessageRecord {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            role: ChatRole::from_str(&row.get::<_, String>(2)?),
            content: row.get(3)?,
            agent_id: row.get(4)?,
            created_at: row.get::<_, i64>(5)? as u64,
        })
    })?;
    Ok(rows.filter_map(std::result::Result::ok).collect())
}

pub fn dashboard_stats(conn: &Connection) -> Result<DashboardStats, ApiError> {
    let count = |sql: &str| -> Result<usize, ApiError> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    };

    let midnight = (now_ms() / 86_400_000) * 86_400_000;
    let proposals_today: i64 = conn.query_row(
        "SELECT COUNT(*) FROM proposals WHERE created_at >= ?1",
        params![midnight as i64],
        |row| row.get(0),
    )?;

    Ok(DashboardStats {
        active_agents: count("SELECT COUNT(*) FROM agent_status WHERE status = 'busy'")?,
        running_missions: count("SELECT COUNT(*) FROM missions WHERE status = 'running'")?,
        queued_missions: count("SELECT COUNT(*) FROM missions WHERE status = 'queued'")?,
        pending_proposals: count("SELECT COUNT(*) FROM proposals WHERE status = 'pending'")?,
        proposals_today: proposals_today as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply schema");
        conn
    }

    #[test]
    fn schema_seeds_the_agent_roster_idle() {
        let conn = test_conn();
        for (_, agent) in AGENT_ROSTER {
            let record = fetch_agent(&conn, agent).expect("query").expect("agent seeded");
            assert_eq!(record.status, AgentState::Idle);
            assert!(record.current_mission_id.is_none());
        }
    }

    #[test]
    fn first_board_uses_store_ordering() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO projects (id, title, created_at) VALUES ('p1', 'Dynasty', 1)",
            [],
        )
        .expect("insert project");
        conn.execute(
            "INSERT INTO boards (id, project_id, title, created_at) VALUES ('b2', 'p1', 'Later', 20)",
            [],
        )
        .expect("insert board");
        conn.execute(
            "INSERT INTO boards (id, project_id, title, created_at) VALUES ('b1', 'p1', 'Earlier', 10)",
            [],
        )
        .expect("insert board");

        assert_eq!(first_board(&conn, "p1").expect("query"), Some("b1".to_string()));
        assert_eq!(first_board(&conn, "p2").expect("query"), None);
    }

    #[test]
    fn message_insert_updates_thread_preview() {
        let conn = test_conn();
        let thread = insert_thread(&conn, "Ops", None).expect("thread");
        let long = "x".repeat(400);
        insert_message(&conn, &thread.id, ChatRole::User, &long, None).expect("message");

        let reloaded = fetch_thread(&conn, &thread.id).expect("query").expect("thread");
        assert_eq!(reloaded.last_message.expect("preview").len(), 200);
        assert!(reloaded.last_message_at.is_some());
    }

    #[test]
    fn session_id_round_trips_through_metadata() {
        let conn = test_conn();
        let thread = insert_thread(&conn, "Chat", Some("cc")).expect("thread");
        assert_eq!(thread_session_id(&thread), None);

        set_thread_session_id(&conn, &thread.id, "sess-1").expect("set");
        let reloaded = fetch_thread(&conn, &thread.id).expect("query").expect("thread");
        assert_eq!(thread_session_id(&reloaded), Some("sess-1".to_string()));

        set_thread_session_id(&conn, &thread.id, "sess-2").expect("replace");
        let reloaded = fetch_thread(&conn, &thread.id).expect("query").expect("thread");
        assert_eq!(thread_session_id(&reloaded), Some("sess-2".to_string()));
    }
}
