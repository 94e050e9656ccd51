//! Statement model and the collaborators the controller drives
//!
//! The remote execution service owns a statement's phase; the shell only
//! mirrors it by replacing its local [`Statement`] with every newer snapshot a
//! [`StatementStore`] returns.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamhouse_results::{ColumnDetails, ResultsPage};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle phase of a statement.
///
/// ```text
/// SUBMITTED → PENDING → RUNNING → { COMPLETED | FAILED | CANCELLED }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementPhase {
    Submitted,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StatementPhase {
    /// No further transition happens from a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The statement was accepted and left the queue.
    pub fn is_ready(&self) -> bool {
        !matches!(self, Self::Submitted | Self::Pending)
    }
}

impl fmt::Display for StatementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Local snapshot of a remote statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub name: String,
    pub sql: String,
    /// Identity the statement runs as (`u-...` users, `sa-...` service accounts)
    pub principal: String,
    pub phase: StatementPhase,
    /// Human-readable status detail from the service, if any
    pub status_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Handled by the client without a remote execution (`SET`, `USE`, ...)
    pub is_local: bool,
    pub result_schema: Vec<ColumnDetails>,
    /// Latest fetched results page
    pub page: Option<ResultsPage>,
}

impl Statement {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn has_results(&self) -> bool {
        !self.result_schema.is_empty()
    }

    pub fn headers(&self) -> Vec<String> {
        self.result_schema.iter().map(|c| c.name.clone()).collect()
    }
}

/// Session property selecting the identity new statements run as.
pub const PRINCIPAL_KEY: &str = "client.principal";

/// A statement the shell answers itself instead of submitting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalStatement {
    /// `SET 'key' = 'value';`
    Set { key: String, value: String },
    /// `RESET;` or `RESET 'key';`
    Reset { key: Option<String> },
    /// `USE catalog;`
    Use(String),
}

impl LocalStatement {
    /// Recognizes `SET`, `RESET` and `USE`. Anything else, including a
    /// malformed `SET`, is left for the remote service.
    pub fn parse(sql: &str) -> Option<Self> {
        let body = sql.trim().trim_end_matches(';').trim();
        let (verb, rest) = match body.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (body, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "SET" => {
                let (key, value) = rest.split_once('=')?;
                let key = unquote(key);
                if key.is_empty() {
                    return None;
                }
                Some(Self::Set {
                    key,
                    value: unquote(value),
                })
            }
            "RESET" if rest.is_empty() => Some(Self::Reset { key: None }),
            "RESET" => Some(Self::Reset {
                key: Some(unquote(rest)),
            }),
            "USE" if !rest.is_empty() => Some(Self::Use(unquote(rest))),
            _ => None,
        }
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(s)
        .to_string()
}

/// Client-side session properties shared by the statement stores.
#[derive(Debug, Clone)]
pub struct Session {
    default_principal: String,
    principal: String,
}

impl Session {
    pub fn new(principal: impl Into<String>) -> Self {
        let principal = principal.into();
        Self {
            default_principal: principal.clone(),
            principal,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Applies a local statement and returns the status detail to report.
    pub fn apply(&mut self, statement: &LocalStatement) -> String {
        match statement {
            LocalStatement::Set { key, value } if key == PRINCIPAL_KEY => {
                self.principal = value.clone();
                format!("Principal set to '{}'", value)
            }
            LocalStatement::Set { key, value } => {
                format!("Property '{}' set to '{}'", key, value)
            }
            LocalStatement::Reset { key } => {
                if key.as_deref().map_or(true, |k| k == PRINCIPAL_KEY) {
                    self.principal = self.default_principal.clone();
                }
                match key {
                    Some(key) => format!("Property '{}' reset", key),
                    None => "Session properties reset".to_string(),
                }
            }
            LocalStatement::Use(catalog) => format!("Using '{}'", catalog),
        }
    }
}

/// Errors surfaced by a [`StatementStore`] or by the controller.
#[derive(Debug, Clone, Error)]
pub enum StatementError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Statement '{name}' failed: {detail}")]
    Failed { name: String, detail: String },

    #[error("Statement execution cancelled")]
    Cancelled,

    /// A wait observed its cancellation token
    #[error("Wait interrupted")]
    Interrupted,
}

impl StatementError {
    /// Authorization failures end the whole session, not only the statement.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, StatementError>;

/// Remote statement execution, as seen by the controller.
///
/// ## Cancellation contract
///
/// `wait_until_ready` and `wait_until_terminal` must return
/// `Err(StatementError::Interrupted)` promptly once `cancel` fires and must not
/// change the remote statement on their own. Whether an interrupted statement
/// keeps running or is stopped is decided by the caller through [`stop`].
///
/// [`stop`]: StatementStore::stop
#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Submit SQL text and return the created statement.
    async fn submit(&self, sql: &str) -> Result<Statement>;

    /// Block until the statement leaves PENDING.
    async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement>;

    /// Fetch the next results page into a fresh snapshot.
    async fn fetch_result_page(&self, statement: Statement) -> Result<Statement>;

    /// Block until the statement reaches a terminal phase. Observing FAILED
    /// returns `Err(StatementError::Failed)`.
    async fn wait_until_terminal(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement>;

    /// Abort remote execution; the statement moves towards CANCELLED.
    async fn stop(&self, name: &str) -> Result<Statement>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Re-fetches a statement every `interval` until its phase satisfies `done`.
///
/// Returns `Interrupted` once `cancel` fires and `Failed` when the phase turns
/// FAILED. The page of `statement` is carried over to the returned snapshot.
pub(crate) async fn poll_phase<F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    statement: Statement,
    mut fetch: F,
    done: fn(StatementPhase) -> bool,
) -> Result<Statement>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Statement>> + Send,
{
    loop {
        if cancel.is_cancelled() {
            return Err(StatementError::Interrupted);
        }

        let mut current = fetch().await?;
        if current.phase == StatementPhase::Failed {
            return Err(StatementError::Failed {
                name: current.name,
                detail: current.status_detail.unwrap_or_default(),
            });
        }
        if done(current.phase) {
            current.page = statement.page;
            return Ok(current);
        }
        debug!(statement = %current.name, phase = %current.phase, "Waiting for statement");

        tokio::select! {
            _ = cancel.cancelled() => return Err(StatementError::Interrupted),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// The application hosting the controller.
pub trait ApplicationHost: Send + Sync {
    /// End the interactive session.
    fn exit_application(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_classification() {
        assert!(!StatementPhase::Pending.is_ready());
        assert!(!StatementPhase::Submitted.is_ready());
        assert!(StatementPhase::Running.is_ready());
        assert!(StatementPhase::Completed.is_ready());

        assert!(!StatementPhase::Running.is_terminal());
        assert!(StatementPhase::Completed.is_terminal());
        assert!(StatementPhase::Failed.is_terminal());
        assert!(StatementPhase::Cancelled.is_terminal());
    }

    #[test]
    fn test_phase_serde() {
        let phase: StatementPhase = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(phase, StatementPhase::Running);
        assert_eq!(
            serde_json::to_string(&StatementPhase::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(StatementPhase::Pending.to_string(), "PENDING");
    }

    #[test]
    fn test_unauthorized_detection() {
        let unauthorized = StatementError::Http {
            status: 401,
            message: "token expired".to_string(),
        };
        assert!(unauthorized.is_unauthorized());

        let forbidden = StatementError::Http {
            status: 403,
            message: "nope".to_string(),
        };
        assert!(!forbidden.is_unauthorized());
        assert!(!StatementError::Cancelled.is_unauthorized());
    }

    #[test]
    fn test_parse_local_statements() {
        assert_eq!(
            LocalStatement::parse("SET 'client.principal' = 'sa-123';"),
            Some(LocalStatement::Set {
                key: "client.principal".to_string(),
                value: "sa-123".to_string(),
            })
        );
        assert_eq!(
            LocalStatement::parse("reset;"),
            Some(LocalStatement::Reset { key: None })
        );
        assert_eq!(
            LocalStatement::parse("RESET 'client.principal'"),
            Some(LocalStatement::Reset {
                key: Some("client.principal".to_string())
            })
        );
        assert_eq!(
            LocalStatement::parse("use analytics;"),
            Some(LocalStatement::Use("analytics".to_string()))
        );
        assert_eq!(LocalStatement::parse("SET nothing;"), None);
        assert_eq!(LocalStatement::parse("SELECT 1;"), None);
        assert_eq!(LocalStatement::parse("settings;"), None);
    }

    #[test]
    fn test_session_principal_override() {
        let mut session = Session::new("u-alice");
        session.apply(&LocalStatement::Set {
            key: PRINCIPAL_KEY.to_string(),
            value: "sa-123".to_string(),
        });
        assert_eq!(session.principal(), "sa-123");

        session.apply(&LocalStatement::Set {
            key: "other".to_string(),
            value: "x".to_string(),
        });
        assert_eq!(session.principal(), "sa-123");

        session.apply(&LocalStatement::Reset { key: None });
        assert_eq!(session.principal(), "u-alice");
    }
}
