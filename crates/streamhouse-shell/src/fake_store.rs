//! In-process statement store for demos and tests
//!
//! Recognized statements:
//! - `static;` completes with a small typed table
//! - `dynamic;` keeps RUNNING and emits an integer counter, one value per tick
//! - `fail;` ends in FAILED
//! - `SET` / `RESET` / `USE` are answered locally
//!
//! Any other text completes without results.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use streamhouse_results::{ColumnDetails, DataType, ResultsPage, RowFieldType};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::statement::{
    poll_phase, LocalStatement, Result, Session, Statement, StatementError, StatementPhase,
    StatementStore,
};

const STATIC_QUERY: &str = "static;";
const DYNAMIC_QUERY: &str = "dynamic;";
const FAIL_QUERY: &str = "fail;";

/// Principal used when none is configured.
pub const DEFAULT_FAKE_PRINCIPAL: &str = "u-fake";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeKind {
    Static,
    Dynamic,
    Fail,
    Empty,
    Local,
}

impl FakeKind {
    fn of(sql: &str) -> Self {
        match sql.trim() {
            STATIC_QUERY => Self::Static,
            DYNAMIC_QUERY => Self::Dynamic,
            FAIL_QUERY => Self::Fail,
            _ => Self::Empty,
        }
    }
}

struct FakeStatement {
    statement: Statement,
    kind: FakeKind,
    submitted_at: Instant,
    stopped: bool,
    /// Counter values (or static rows) already handed out
    emitted: usize,
}

struct FakeState {
    session: Session,
    statements: HashMap<String, FakeStatement>,
    next_submit_error: Option<StatementError>,
}

/// Statement store that simulates remote execution with timers.
pub struct FakeStatementStore {
    state: Mutex<FakeState>,
    ready_delay: Duration,
    poll_interval: Duration,
    tick: Duration,
}

impl FakeStatementStore {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                session: Session::new(principal),
                statements: HashMap::new(),
                next_submit_error: None,
            }),
            ready_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            tick: Duration::from_secs(1),
        }
    }

    /// Time a statement stays PENDING after submission.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// How often waits re-check the phase.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Interval between two counter values of `dynamic;`.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Makes the next `submit` fail with `error`.
    pub async fn fail_next_submit(&self, error: StatementError) {
        self.state.lock().await.next_submit_error = Some(error);
    }

    /// Current phase of a statement, as an independent observer would see it.
    pub async fn phase_of(&self, name: &str) -> Option<StatementPhase> {
        let state = self.state.lock().await;
        state.statements.get(name).map(|entry| self.phase(entry))
    }

    fn phase(&self, entry: &FakeStatement) -> StatementPhase {
        if entry.kind == FakeKind::Local {
            return StatementPhase::Completed;
        }
        if entry.stopped {
            return StatementPhase::Cancelled;
        }
        if entry.submitted_at.elapsed() < self.ready_delay {
            return StatementPhase::Pending;
        }
        match entry.kind {
            FakeKind::Dynamic => StatementPhase::Running,
            FakeKind::Fail => StatementPhase::Failed,
            _ => StatementPhase::Completed,
        }
    }

    /// Counter values produced so far by a running `dynamic;` statement.
    fn produced_ticks(&self, entry: &FakeStatement) -> usize {
        let running_for = entry
            .submitted_at
            .elapsed()
            .saturating_sub(self.ready_delay);
        let tick = self.tick.max(Duration::from_millis(1));
        (running_for.as_millis() / tick.as_millis()) as usize + 1
    }

    async fn snapshot(&self, name: &str) -> Result<Statement> {
        let state = self.state.lock().await;
        let entry = state.statements.get(name).ok_or_else(|| not_found(name))?;
        let mut statement = entry.statement.clone();
        statement.phase = self.phase(entry);
        if statement.phase == StatementPhase::Failed {
            statement.status_detail = Some("Simulated failure".to_string());
        }
        Ok(statement)
    }
}

#[async_trait]
impl StatementStore for FakeStatementStore {
    async fn submit(&self, sql: &str) -> Result<Statement> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.next_submit_error.take() {
            return Err(error);
        }

        let local = LocalStatement::parse(sql);
        let status_detail = local.as_ref().map(|l| state.session.apply(l));
        let kind = if local.is_some() {
            FakeKind::Local
        } else {
            FakeKind::of(sql)
        };

        let statement = Statement {
            name: format!("shell-{}", Uuid::new_v4()),
            sql: sql.to_string(),
            principal: state.session.principal().to_string(),
            phase: if kind == FakeKind::Local {
                StatementPhase::Completed
            } else {
                StatementPhase::Pending
            },
            status_detail,
            created_at: Utc::now(),
            is_local: kind == FakeKind::Local,
            result_schema: fake_schema(kind),
            page: None,
        };
        debug!(statement = %statement.name, kind = ?kind, "Fake statement submitted");

        state.statements.insert(
            statement.name.clone(),
            FakeStatement {
                statement: statement.clone(),
                kind,
                submitted_at: Instant::now(),
                stopped: false,
                emitted: 0,
            },
        );
        Ok(statement)
    }

    async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement> {
        let name = statement.name.clone();
        poll_phase(
            cancel,
            self.poll_interval,
            statement,
            || self.snapshot(&name),
            |phase| phase.is_ready(),
        )
        .await
    }

    async fn fetch_result_page(&self, statement: Statement) -> Result<Statement> {
        let mut state = self.state.lock().await;
        let phase = {
            let entry = state
                .statements
                .get(&statement.name)
                .ok_or_else(|| not_found(&statement.name))?;
            self.phase(entry)
        };
        let entry = state
            .statements
            .get_mut(&statement.name)
            .ok_or_else(|| not_found(&statement.name))?;

        let page = match (entry.kind, phase) {
            (FakeKind::Static, StatementPhase::Completed) => {
                let data = if entry.emitted == 0 {
                    static_rows()
                } else {
                    Vec::new()
                };
                entry.emitted = 1;
                ResultsPage {
                    data,
                    next_page_token: None,
                }
            }
            (FakeKind::Dynamic, StatementPhase::Running) => {
                let produced = self.produced_ticks(entry);
                let data = counter_events(entry.emitted, produced);
                entry.emitted = produced.max(entry.emitted);
                ResultsPage {
                    data,
                    next_page_token: Some(format!("{}-{}", entry.statement.name, entry.emitted)),
                }
            }
            _ => ResultsPage::default(),
        };

        let mut snapshot = entry.statement.clone();
        snapshot.phase = phase;
        snapshot.page = Some(page);
        Ok(snapshot)
    }

    async fn wait_until_terminal(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement> {
        let name = statement.name.clone();
        poll_phase(
            cancel,
            self.poll_interval,
            statement,
            || self.snapshot(&name),
            |phase| phase.is_terminal(),
        )
        .await
    }

    async fn stop(&self, name: &str) -> Result<Statement> {
        {
            let mut state = self.state.lock().await;
            let entry = state
                .statements
                .get_mut(name)
                .ok_or_else(|| not_found(name))?;
            if entry.kind != FakeKind::Local && !self.phase(entry).is_terminal() {
                entry.stopped = true;
            }
        }
        self.snapshot(name).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .statements
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> StatementError {
    StatementError::Http {
        status: 404,
        message: format!("Statement '{}' not found", name),
    }
}

fn fake_schema(kind: FakeKind) -> Vec<ColumnDetails> {
    match kind {
        FakeKind::Static => vec![
            ColumnDetails::new("id", DataType::new("INTEGER").not_null()),
            ColumnDetails::new("name", DataType::new("VARCHAR")),
            ColumnDetails::new("tags", DataType::array(DataType::new("VARCHAR"))),
            ColumnDetails::new(
                "scores",
                DataType::map(DataType::new("VARCHAR"), DataType::new("INTEGER")),
            ),
            ColumnDetails::new(
                "location",
                DataType::row(vec![
                    RowFieldType::new("city", DataType::new("VARCHAR")),
                    RowFieldType::new("zip", DataType::new("INTEGER")),
                ]),
            ),
        ],
        FakeKind::Dynamic => vec![ColumnDetails::new(
            "count",
            DataType::new("INTEGER").not_null(),
        )],
        _ => Vec::new(),
    }
}

fn static_rows() -> Vec<Value> {
    vec![
        json!({
            "op": 0,
            "row": ["1", "alice", ["admin", "ops"], [["math", "91"]], ["Berlin", "10115"]]
        }),
        json!({
            "op": 0,
            "row": ["2", "bob", [], [["math", "78"], ["art", "85"]], ["Lisbon", "1100"]]
        }),
        json!({"op": 0, "row": ["3", null, ["guest"], [], null]}),
    ]
}

/// Events moving the counter from `from` values shown to `to` values shown.
/// Each step retracts the previous value before inserting the next one.
fn counter_events(from: usize, to: usize) -> Vec<Value> {
    let mut events = Vec::new();
    for value in from..to {
        if value > 0 {
            events.push(json!({"op": 3, "row": [(value - 1).to_string()]}));
        }
        events.push(json!({"op": 0, "row": [value.to_string()]}));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_store() -> FakeStatementStore {
        FakeStatementStore::new(DEFAULT_FAKE_PRINCIPAL)
            .with_ready_delay(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(5))
            .with_tick(Duration::from_millis(10))
    }

    #[test]
    fn test_counter_events() {
        let events = counter_events(0, 3);
        let ops: Vec<i64> = events.iter().map(|e| e["op"].as_i64().unwrap()).collect();
        assert_eq!(ops, vec![0, 3, 0, 3, 0]);
        assert_eq!(events[4]["row"][0], "2");
        assert!(counter_events(3, 3).is_empty());
    }

    #[tokio::test]
    async fn test_static_statement_completes() {
        let store = fast_store();
        let statement = store.submit("static;").await.unwrap();
        assert_eq!(statement.phase, StatementPhase::Pending);
        assert_eq!(statement.principal, DEFAULT_FAKE_PRINCIPAL);

        let token = CancellationToken::new();
        let ready = store.wait_until_ready(&token, statement).await.unwrap();
        assert_eq!(ready.phase, StatementPhase::Completed);

        let fetched = store.fetch_result_page(ready).await.unwrap();
        let page = fetched.page.unwrap();
        assert_eq!(page.data.len(), 3);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let store = FakeStatementStore::new(DEFAULT_FAKE_PRINCIPAL)
            .with_ready_delay(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(5));
        let statement = store.submit("static;").await.unwrap();
        let name = statement.name.clone();

        let token = CancellationToken::new();
        token.cancel();
        let err = store.wait_until_ready(&token, statement).await.unwrap_err();
        assert!(matches!(err, StatementError::Interrupted));

        // Interrupting a wait leaves the statement alone
        assert_eq!(store.phase_of(&name).await, Some(StatementPhase::Pending));
    }

    #[tokio::test]
    async fn test_failed_statement_is_reported() {
        let store = fast_store();
        let statement = store.submit("fail;").await.unwrap();
        let err = store
            .wait_until_ready(&CancellationToken::new(), statement)
            .await
            .unwrap_err();
        assert!(matches!(err, StatementError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_stop_and_delete() {
        let store = fast_store();
        let statement = store.submit("dynamic;").await.unwrap();
        let name = statement.name.clone();

        let stopped = store.stop(&name).await.unwrap();
        assert_eq!(stopped.phase, StatementPhase::Cancelled);

        store.delete(&name).await.unwrap();
        assert_eq!(store.phase_of(&name).await, None);
        assert!(store.delete(&name).await.is_err());
    }

    #[tokio::test]
    async fn test_local_statement_updates_principal() {
        let store = fast_store();
        let set = store
            .submit("SET 'client.principal' = 'sa-123';")
            .await
            .unwrap();
        assert!(set.is_local);
        assert_eq!(set.phase, StatementPhase::Completed);
        assert!(set.result_schema.is_empty());

        let next = store.submit("INSERT INTO t SELECT 1;").await.unwrap();
        assert_eq!(next.principal, "sa-123");
    }
}
