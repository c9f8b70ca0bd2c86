use crate::AppState;
use crate::db::{
    MessageRecord, fetch_thread, insert_message, insert_thread, query_messages, query_threads,
    set_thread_session_id, thread_session_id,
};
use crate::error::ApiError;
use axum::{
    Json,
    extract::{Path, State},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use rusqlite::Connection;
use serde::Deserialize;
use std::{convert::Infallible, path::PathBuf, process::Stdio, sync::Arc};
use tokio::{io::AsyncReadExt, process::Command, sync::Mutex, sync::mpsc};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{error, warn};
use uuid::Uuid;
use warroom_core::ChatRole;
use warroom_protocol::{SseFrame, StreamDecoder, StreamRecord};

const STDERR_LIMIT: usize = 500;

/// One subprocess invocation: the prompt plus the session to continue
/// (resume) or to mint (fresh).
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub prompt: String,
    pub session_id: String,
    pub resume: bool,
}

#[derive(Debug)]
pub enum ChunkEvent {
    Text(String),
    Failed(String),
}

/// Seam between the relay's session/retry logic and the actual CLI
/// process. The returned channel yields text chunks in emission order and
/// closes on clean exit; a `Failed` event terminates the attempt.
pub trait ChatLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> mpsc::Receiver<ChunkEvent>;
}

#[derive(Debug, Clone)]
pub struct CliChatLauncher {
    pub cli_path: String,
    pub workdir: PathBuf,
}

impl ChatLauncher for CliChatLauncher {
    fn launch(&self, spec: &LaunchSpec) -> mpsc::Receiver<ChunkEvent> {
        let mut cmd = Command::new(&self.cli_path);
        cmd.arg("--print").arg("--verbose").arg("--output-format").arg("stream-json");
        if spec.resume {
            cmd.arg("--resume").arg(&spec.session_id);
        } else {
            cmd.arg("--session-id").arg(&spec.session_id);
        }
        cmd.arg("-p")
            .arg(&spec.prompt)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(stream_process(cmd, tx));
        rx
    }
}

/// Pump one CLI process: decode stdout line records into text chunks,
/// collect stderr for diagnostics, and translate the exit status. The
/// child is killed the moment the receiver goes away, even if it is
/// sitting silent on stdout.
async fn stream_process(mut cmd: Command, tx: mpsc::Sender<ChunkEvent>) {
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = tx.send(ChunkEvent::Failed(format!("failed to start chat cli: {err}"))).await;
            return;
        }
    };

    let Some(mut stdout) = child.stdout.take() else {
        let _ = tx.send(ChunkEvent::Failed("chat cli stdout unavailable".to_string())).await;
        return;
    };
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut collected = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut collected).await;
        }
        collected
    });

    let mut decoder = StreamDecoder::new();
    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for record in decoder.feed(&buf[..n]) {
                        if forward_record(&record, &tx).await.is_err() {
                            let _ = child.kill().await;
                            stderr_task.abort();
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    let _ = tx.send(ChunkEvent::Failed(format!("stream read failed: {err}"))).await;
                    return;
                }
            },
            () = tx.closed() => {
                // Receiver gone: nobody will consume anything the child
                // still has to say. Kill it rather than wait it out.
                let _ = child.kill().await;
                stderr_task.abort();
                return;
            }
        }
    }
    if let Some(record) = decoder.flush()
        && forward_record(&record, &tx).await.is_err()
    {
        let _ = child.kill().await;
        stderr_task.abort();
        return;
    }

    let status = child.wait().await;
    let stderr_out = stderr_task.await.unwrap_or_default();
    match status {
        Ok(status) => {
            // A missing code means the process died to a signal; treat it
            // like a closed stream, matching the CLI's own semantics.
            if let Some(code) = status.code()
                && code != 0
            {
                let truncated: String = stderr_out.chars().take(STDERR_LIMIT).collect();
                let _ = tx
                    .send(ChunkEvent::Failed(format!("chat cli exited with code {code}: {truncated}")))
                    .await;
            }
        }
        Err(err) => {
            let _ = tx.send(ChunkEvent::Failed(format!("failed to reap chat cli: {err}"))).await;
        }
    }
}

async fn forward_record(
    record: &StreamRecord,
    tx: &mpsc::Sender<ChunkEvent>,
) -> Result<(), mpsc::error::SendError<ChunkEvent>> {
    if let Some(errors) = record.result_errors() {
        warn!(?errors, "chat cli reported result errors");
    }
    for text in record.assistant_text() {
        tx.send(ChunkEvent::Text(text.to_string())).await?;
    }
    Ok(())
}

/// Run one chat turn end to end, pushing SSE frames into `tx`. Any failure
/// surfaces as a single terminal `error` frame.
pub async fn run_chat(
    db: Arc<Mutex<Connection>>,
    launcher: Arc<dyn ChatLauncher>,
    thread_id: String,
    content: String,
    tx: mpsc::Sender<SseFrame>,
) {
    if let Err(message) = chat_turn(&db, launcher.as_ref(), &thread_id, &content, &tx).await {
        error!(thread_id = %thread_id, "chat turn failed: {message}");
        let _ = tx.send(SseFrame::Error { message }).await;
    }
}

async fn chat_turn(
    db: &Mutex<Connection>,
    launcher: &dyn ChatLauncher,
    thread_id: &str,
    content: &str,
    tx: &mpsc::Sender<SseFrame>,
) -> Result<(), String> {
    let (mut session_id, mut resume, agent_id) = {
        let conn = db.lock().await;
        let thread = fetch_thread(&conn, thread_id)
            .map_err(|err| err.message)?
            .ok_or_else(|| "thread not found".to_string())?;
        insert_message(&conn, thread_id, ChatRole::User, content, None)
            .map_err(|err| err.message)?;
        match thread_session_id(&thread) {
            Some(existing) => (existing, true, thread.agent_id),
            None => {
                let fresh = Uuid::new_v4().to_string();
                set_thread_session_id(&conn, thread_id, &fresh).map_err(|err| err.message)?;
                (fresh, false, thread.agent_id)
            }
        }
    };

    let mut retried = false;
    loop {
        let mut rx = launcher.launch(&LaunchSpec {
            prompt: content.to_string(),
            session_id: session_id.clone(),
            resume,
        });

        let mut accumulated = String::new();
        let mut failure: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                ChunkEvent::Text(text) => {
                    accumulated.push_str(&text);
                    if tx.send(SseFrame::Chunk { content: text }).await.is_err() {
                        // Caller disconnected; dropping rx tears the CLI down.
                        return Ok(());
                    }
                }
                ChunkEvent::Failed(message) => {
                    failure = Some(message);
                    break;
                }
            }
        }

        match failure {
            None => {
                if !accumulated.is_empty() {
                    let message = persist_assistant(db, thread_id, &accumulated, agent_id.as_deref())
                        .await?;
                    let _ = tx.send(SseFrame::Done { message_id: message.id }).await;
                }
                return Ok(());
            }
            Some(message) => {
                if resume && accumulated.is_empty() && !retried {
                    warn!(thread_id, "resume stream failed, retrying with a fresh session");
                    let fresh = Uuid::new_v4().to_string();
                    {
                        let conn = db.lock().await;
                        set_thread_session_id(&conn, thread_id, &fresh)
                            .map_err(|err| err.message)?;
                    }
                    session_id = fresh;
                    resume = false;
                    retried = true;
                    continue;
                }
                return Err(message);
            }
        }
    }
}

async fn persist_assistant(
    db: &Mutex<Connection>,
    thread_id: &str,
    content: &str,
    agent_id: Option<&str>,
) -> Result<MessageRecord, String> {
    let conn = db.lock().await;
    insert_message(&conn, thread_id, ChatRole::Assistant, content, agent_id)
        .map_err(|err| err.message)
}

#[derive(Debug, Deserialize)]
pub struct SendChatRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn send_chat(
    State(state): State<AppState>,
    Json(request): Json<SendChatRequest>,
) -> Result<Response, ApiError> {
    let thread_id = request
        .thread_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("thread_id and content are required"))?;
    let content = request
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("thread_id and content are required"))?;

    {
        let db = state.db.lock().await;
        fetch_thread(&db, &thread_id)?.ok_or_else(|| ApiError::not_found("thread not found"))?;
    }

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run_chat(state.db.clone(), state.chat.clone(), thread_id, content, tx));

    let stream = ReceiverStream::new(rx)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_json())));
    Ok(Sse::new(stream).into_response())
}

pub async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    let threads = query_threads(&db)?;
    Ok(Json(serde_json::json!({ "threads": threads })))
}

pub async fn create_thread(
    State(state): State<AppState>,
    Json(request): Json<CreateThreadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let title = request
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| "New Thread".to_string());
    let db = state.db.lock().await;
    let thread = insert_thread(&db, &title, request.agent_id.as_deref())?;
    Ok(Json(serde_json::json!({ "thread": thread })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let db = state.db.lock().await;
    fetch_thread(&db, &id)?.ok_or_else(|| ApiError::not_found("thread not found"))?;
    Ok(Json(query_messages(&db, &id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::apply_schema;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedLauncher {
        attempts: StdMutex<VecDeque<Vec<ChunkEvent>>>,
        calls: StdMutex<Vec<LaunchSpec>>,
    }

    impl ScriptedLauncher {
        fn new(attempts: Vec<Vec<ChunkEvent>>) -> Arc<Self> {
            Arc::new(Self {
                attempts: StdMutex::new(attempts.into_iter().collect()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<LaunchSpec> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl ChatLauncher for ScriptedLauncher {
        fn launch(&self, spec: &LaunchSpec) -> mpsc::Receiver<ChunkEvent> {
            self.calls.lock().expect("calls lock").push(spec.clone());
            let events = self
                .attempts
                .lock()
                .expect("attempts lock")
                .pop_front()
                .unwrap_or_default();
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            rx
        }
    }

    fn text(s: &str) -> ChunkEvent {
        ChunkEvent::Text(s.to_string())
    }

    fn failed(s: &str) -> ChunkEvent {
        ChunkEvent::Failed(s.to_string())
    }

    async fn setup() -> (Arc<Mutex<Connection>>, String) {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply schema");
        let thread = insert_thread(&conn, "Shoin Chat", Some("cc")).expect("thread");
        (Arc::new(Mutex::new(conn)), thread.id)
    }

    async fn collect_frames(
        db: Arc<Mutex<Connection>>,
        launcher: Arc<dyn ChatLauncher>,
        thread_id: &str,
        content: &str,
    ) -> Vec<SseFrame> {
        let (tx, mut rx) = mpsc::channel(32);
        run_chat(db, launcher, thread_id.to_string(), content.to_string(), tx).await;
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn fresh_thread_mints_and_persists_one_session() {
        let (db, thread_id) = setup().await;
        let launcher = ScriptedLauncher::new(vec![vec![text("Hello "), text("world")]]);

        let frames =
            collect_frames(db.clone(), launcher.clone(), &thread_id, "greetings").await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], SseFrame::Chunk { content: "Hello ".to_string() });
        assert_eq!(frames[1], SseFrame::Chunk { content: "world".to_string() });
        assert!(matches!(frames[2], SseFrame::Done { .. }));

        let calls = launcher.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].resume);

        let conn = db.lock().await;
        let thread = fetch_thread(&conn, &thread_id).expect("query").expect("thread");
        assert_eq!(thread_session_id(&thread), Some(calls[0].session_id.clone()));

        let messages = query_messages(&conn, &thread_id).expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "greetings");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "Hello world");
        assert_eq!(messages[1].agent_id.as_deref(), Some("cc"));
    }

    #[tokio::test]
    async fn resume_failure_retries_once_with_a_fresh_session() {
        let (db, thread_id) = setup().await;
        {
            let conn = db.lock().await;
            set_thread_session_id(&conn, &thread_id, "stale-session").expect("seed session");
        }
        let launcher = ScriptedLauncher::new(vec![
            vec![failed("resume broke")],
            vec![text("fresh reply")],
        ]);

        let frames = collect_frames(db.clone(), launcher.clone(), &thread_id, "hi").await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], SseFrame::Chunk { content: "fresh reply".to_string() });
        assert!(matches!(frames[1], SseFrame::Done { .. }));

        let calls = launcher.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].resume);
        assert_eq!(calls[0].session_id, "stale-session");
        assert!(!calls[1].resume);
        assert_ne!(calls[1].session_id, "stale-session");

        let conn = db.lock().await;
        let thread = fetch_thread(&conn, &thread_id).expect("query").expect("thread");
        assert_eq!(thread_session_id(&thread), Some(calls[1].session_id.clone()));
    }

    #[tokio::test]
    async fn no_retry_after_output_was_streamed() {
        let (db, thread_id) = setup().await;
        {
            let conn = db.lock().await;
            set_thread_session_id(&conn, &thread_id, "session-a").expect("seed session");
        }
        let launcher =
            ScriptedLauncher::new(vec![vec![text("partial"), failed("pipe died")]]);

        let frames = collect_frames(db.clone(), launcher.clone(), &thread_id, "hi").await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], SseFrame::Chunk { content: "partial".to_string() });
        assert_eq!(frames[1], SseFrame::Error { message: "pipe died".to_string() });
        assert_eq!(launcher.calls().len(), 1);

        let conn = db.lock().await;
        let messages = query_messages(&conn, &thread_id).expect("messages");
        assert_eq!(messages.len(), 1, "partial output must not be persisted");
        assert_eq!(messages[0].role, ChatRole::User);
        let thread = fetch_thread(&conn, &thread_id).expect("query").expect("thread");
        assert_eq!(thread_session_id(&thread), Some("session-a".to_string()));
    }

    #[tokio::test]
    async fn fresh_call_failure_is_not_retried() {
        let (db, thread_id) = setup().await;
        let launcher = ScriptedLauncher::new(vec![vec![failed("no cli installed")]]);

        let frames = collect_frames(db.clone(), launcher.clone(), &thread_id, "hi").await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], SseFrame::Error { message: "no cli installed".to_string() });
        assert_eq!(launcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn retry_failure_surfaces_the_error() {
        let (db, thread_id) = setup().await;
        {
            let conn = db.lock().await;
            set_thread_session_id(&conn, &thread_id, "stale").expect("seed session");
        }
        let launcher = ScriptedLauncher::new(vec![
            vec![failed("resume broke")],
            vec![failed("still broken")],
        ]);

        let frames = collect_frames(db.clone(), launcher.clone(), &thread_id, "hi").await;

        assert_eq!(frames, vec![SseFrame::Error { message: "still broken".to_string() }]);
        assert_eq!(launcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_clean_exit_emits_no_frames() {
        let (db, thread_id) = setup().await;
        let launcher = ScriptedLauncher::new(vec![vec![]]);

        let frames = collect_frames(db.clone(), launcher.clone(), &thread_id, "hi").await;
        assert!(frames.is_empty());

        let conn = db.lock().await;
        let messages = query_messages(&conn, &thread_id).expect("messages");
        assert_eq!(messages.len(), 1, "only the user message is persisted");
    }

    #[cfg(unix)]
    mod cli {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_cli(dir: &std::path::Path, body: &str) -> CliChatLauncher {
            let path = dir.join("chat.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
            CliChatLauncher {
                cli_path: path.to_string_lossy().into_owned(),
                workdir: dir.to_path_buf(),
            }
        }

        fn spec() -> LaunchSpec {
            LaunchSpec {
                prompt: "hello".to_string(),
                session_id: "s-1".to_string(),
                resume: false,
            }
        }

        async fn drain(mut rx: mpsc::Receiver<ChunkEvent>) -> Vec<ChunkEvent> {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        }

        #[tokio::test]
        async fn clean_exit_streams_text_chunks() {
            let dir = tempfile::tempdir().expect("tempdir");
            let launcher = fake_cli(
                dir.path(),
                concat!(
                    r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"one "}]}}'"#,
                    "\n",
                    r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"two"}]}}'"#,
                ),
            );

            let events = drain(launcher.launch(&spec())).await;
            let texts: Vec<&str> = events
                .iter()
                .map(|event| match event {
                    ChunkEvent::Text(text) => text.as_str(),
                    ChunkEvent::Failed(message) => panic!("unexpected failure: {message}"),
                })
                .collect();
            assert_eq!(texts, vec!["one ", "two"]);
        }

        #[tokio::test]
        async fn nonzero_exit_fails_with_code_and_stderr() {
            let dir = tempfile::tempdir().expect("tempdir");
            let launcher = fake_cli(dir.path(), "echo 'session expired' >&2; exit 2");

            let events = drain(launcher.launch(&spec())).await;
            assert_eq!(events.len(), 1);
            match &events[0] {
                ChunkEvent::Failed(message) => {
                    assert!(message.contains("code 2"), "got: {message}");
                    assert!(message.contains("session expired"), "got: {message}");
                }
                ChunkEvent::Text(text) => panic!("unexpected text: {text}"),
            }
        }

        #[tokio::test]
        async fn dropped_receiver_kills_a_silent_child() {
            let dir = tempfile::tempdir().expect("tempdir");
            let pid_file = dir.path().join("pid");
            let launcher = fake_cli(
                dir.path(),
                &format!("echo $$ > {}\nexec sleep 30", pid_file.display()),
            );

            let rx = launcher.launch(&spec());
            let pid = loop {
                match std::fs::read_to_string(&pid_file) {
                    Ok(raw) if !raw.trim().is_empty() => break raw.trim().to_string(),
                    _ => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
                }
            };

            drop(rx);

            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
            loop {
                let alive = std::process::Command::new("kill")
                    .arg("-0")
                    .arg(&pid)
                    .status()
                    .map(|status| status.success())
                    .unwrap_or(false);
                if !alive {
                    break;
                }
                assert!(
                    std::time::Instant::now() < deadline,
                    "chat cli child (pid {pid}) survived the disconnect"
                );
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }

        #[tokio::test]
        async fn missing_cli_binary_fails_to_start() {
            let dir = tempfile::tempdir().expect("tempdir");
            let launcher = CliChatLauncher {
                cli_path: dir.path().join("no-such-cli").to_string_lossy().into_owned(),
                workdir: dir.path().to_path_buf(),
            };

            let events = drain(launcher.launch(&spec())).await;
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], ChunkEvent::Failed(message) if message.contains("failed to start")));
        }
    }
}
