use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ChatError;
use super::invoker::{AgentAnswer, AgentInvocationRequest, AgentInvoker};
use super::render::format_response;
use crate::domain::chat::{SessionState, Turn};

/// Sessions untouched for this long are dropped from the store
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Shown in place of an answer when the request was abandoned mid-turn
pub const CANCELLED_MESSAGE: &str = "the request was cancelled before the assistant answered";

/// One browser session: an id and its append-only transcript
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: String,
    transcript: Vec<Turn>,
    state: SessionState,
    last_active: Instant,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transcript: Vec::new(),
            state: SessionState::Idle,
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time since the last question or answer
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    fn finish_turn(&mut self) {
        self.state = SessionState::AwaitingInput;
        self.last_active = Instant::now();
    }

    /// Run one turn: record the question, invoke the agent, record the answer.
    ///
    /// A failed invocation still appends a visible error turn; the error is
    /// returned as well so the caller can report it. If the returned future
    /// is dropped while the agent is answering, the turn is closed with an
    /// error turn and the session accepts input again.
    pub async fn ask(&mut self, invoker: &dyn AgentInvoker, question: &str) -> Result<Turn, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        if !self.state.accepts_input() {
            return Err(ChatError::Busy(self.id.clone()));
        }

        self.transcript.push(Turn::user(question));
        self.state = SessionState::Sending;
        self.last_active = Instant::now();

        let mut pending = TurnGuard {
            session: self,
            settled: false,
        };
        let request = AgentInvocationRequest::new(pending.session.id.clone(), question, false);
        let outcome = match invoker.invoke(&request).await {
            Ok(response) => serde_json::from_str::<AgentAnswer>(&response.body)
                .map_err(|e| ChatError::MalformedResponse(e.to_string())),
            Err(e) => Err(ChatError::Invocation(e.to_string())),
        };
        pending.settled = true;
        drop(pending);

        self.state = SessionState::RenderingResponse;
        let result = match outcome {
            Ok(answer) => {
                let trace = answer
                    .trace_data
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect();
                let rendered = format_response(&answer.response);
                let turn = Turn::assistant(answer.response, rendered, trace);
                info!(session_id = %self.id, turns = self.transcript.len() + 1, "answered");
                self.transcript.push(turn.clone());
                Ok(turn)
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "agent invocation failed");
                self.transcript.push(Turn::error(e.to_string()));
                Err(e)
            }
        };
        self.finish_turn();
        result
    }
}

/// Closes a turn whose future was dropped before the agent answered
struct TurnGuard<'a> {
    session: &'a mut ChatSession,
    settled: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(session_id = %self.session.id, "turn cancelled before the agent answered");
        self.session.transcript.push(Turn::error(CANCELLED_MESSAGE));
        self.session.finish_turn();
    }
}

/// In-memory session registry; each session is locked for the length of a turn.
///
/// Sessions idle for longer than the TTL are evicted on every `create` and by
/// the sweeper started with [`SessionStore::spawn_eviction`].
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<ChatSession>>>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self) -> ChatSession {
        self.evict_idle().await;

        let session = ChatSession::new();
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id().to_string(), Arc::new(Mutex::new(session.clone())));
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<ChatSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Forget a session; a turn already in flight still completes on its own handle
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drop every session idle for at least the TTL. Sessions with a turn in
    /// flight are kept. Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(session) => session.idle_for() < self.ttl,
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "evicted idle chat sessions");
        }
        evicted
    }

    /// Sweep idle sessions every `every` until the runtime shuts down
    pub fn spawn_eviction(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                store.evict_idle().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::invoker::AgentInvocationResponse;
    use crate::domain::chat::{Rendered, Role};
    use crate::domain::error::{CloudError, CloudResult};
    use async_trait::async_trait;

    struct ScriptedInvoker {
        answer: Option<AgentAnswer>,
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, request: &AgentInvocationRequest) -> CloudResult<AgentInvocationResponse> {
            assert_eq!(request.end_session, "false");
            match &self.answer {
                Some(answer) => Ok(AgentInvocationResponse {
                    body: serde_json::to_string(answer).unwrap(),
                }),
                None => Err(CloudError::transient("bedrock:InvokeAgent", "throttled")),
            }
        }
    }

    fn answering(response: &str) -> ScriptedInvoker {
        ScriptedInvoker {
            answer: Some(AgentAnswer {
                response: response.to_string(),
                trace_data: "rationale\n\nobservation".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_transcript_alternates_in_order() {
        let invoker = answering("Sure.");
        let mut session = ChatSession::new();

        session.ask(&invoker, "hello").await.unwrap();
        session.ask(&invoker, "reset my password").await.unwrap();

        let roles: Vec<Role> = session.transcript().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.transcript()[0].content, "hello");
        assert_eq!(session.transcript()[2].content, "reset my password");
        assert_eq!(session.transcript()[1].trace, vec!["rationale", "observation"]);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_failed_invocation_appends_error_turn() {
        let mut session = ChatSession::new();
        session.ask(&answering("Hi"), "hello").await.unwrap();

        let err = session
            .ask(&ScriptedInvoker { answer: None }, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Invocation(_)));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].content, "hello");
        assert_eq!(transcript[1].content, "Hi");
        assert_eq!(transcript[2].role, Role::User);
        assert!(transcript[3].is_error);
        assert_eq!(transcript[3].role, Role::Assistant);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected_without_a_turn() {
        let mut session = ChatSession::new();
        let err = session.ask(&answering("x"), "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyQuestion));
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_list_answer_renders_as_table() {
        let mut session = ChatSession::new();
        let turn = session
            .ask(&answering(r#"[{"course":"Math","grade":"A"}]"#), "grades")
            .await
            .unwrap();
        assert!(matches!(turn.rendered, Some(Rendered::Table { .. })));
    }

    #[tokio::test]
    async fn test_store_hands_out_shared_sessions() {
        let store = SessionStore::new();
        let created = store.create().await;
        assert_eq!(store.len().await, 1);

        let shared = store.get(created.id()).await.unwrap();
        shared.lock().await.ask(&answering("ok"), "hello").await.unwrap();

        let again = store.get(created.id()).await.unwrap();
        assert_eq!(again.lock().await.transcript().len(), 2);
        assert!(store.get("missing").await.is_none());
    }

    /// Never answers
    struct StalledInvoker;

    #[async_trait]
    impl AgentInvoker for StalledInvoker {
        async fn invoke(&self, _request: &AgentInvocationRequest) -> CloudResult<AgentInvocationResponse> {
            std::future::pending::<CloudResult<AgentInvocationResponse>>().await
        }
    }

    #[tokio::test]
    async fn test_dropped_turn_frees_the_session() {
        let mut session = ChatSession::new();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            session.ask(&StalledInvoker, "hello"),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert_eq!(session.transcript().len(), 2);
        assert!(session.transcript()[1].is_error);
        assert_eq!(session.transcript()[1].content, CANCELLED_MESSAGE);

        session.ask(&answering("Done."), "reset my password").await.unwrap();

        let roles: Vec<Role> = session.transcript().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.transcript()[3].content, "Done.");
    }

    #[tokio::test]
    async fn test_new_session_is_idle_until_first_turn() {
        let mut session = ChatSession::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.state().accepts_input());

        session.ask(&answering("Hi"), "hello").await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::with_ttl(Duration::ZERO);
        store.create().await;
        store.create().await;

        // Each create sweeps first, so only the newest survives it
        assert_eq!(store.len().await, 1);
        assert_eq!(store.evict_idle().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_recent_sessions_are_kept() {
        let store = SessionStore::new();
        let created = store.create().await;
        store.create().await;

        assert_eq!(store.evict_idle().await, 0);
        assert_eq!(store.len().await, 2);
        assert!(store.get(created.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_session_with_turn_in_flight_is_not_evicted() {
        let store = SessionStore::with_ttl(Duration::ZERO);
        let created = store.create().await;

        let shared = store.get(created.id()).await.unwrap();
        let _turn = shared.lock().await;

        assert_eq!(store.evict_idle().await, 0);
        assert!(store.get(created.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_session() {
        let store = SessionStore::new();
        let created = store.create().await;

        assert!(store.remove(created.id()).await);
        assert!(!store.remove(created.id()).await);
        assert!(store.get(created.id()).await.is_none());
    }
}
