//! Statement wait/cancel controller
//!
//! Drives one statement from submission to a terminal phase. Each blocking
//! wait on the store is raced against a keyboard listener task: a cancel key
//! aborts the statement remotely, a detach key (terminal wait only) returns
//! control to the prompt and leaves the statement running.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::input::{InputSource, Interrupt};
use crate::statement::{
    ApplicationHost, Result, Statement, StatementError, StatementPhase, StatementStore,
    PRINCIPAL_KEY,
};

/// Default delay between two keyboard polls.
pub const DEFAULT_INPUT_POLL: Duration = Duration::from_millis(10);

/// How a successful execution ended.
#[derive(Debug, Clone)]
pub enum StatementOutcome {
    /// The statement reached a terminal phase (or was answered locally)
    Terminal(Statement),
    /// The user detached; the statement keeps running remotely
    Detached(Statement),
}

impl StatementOutcome {
    pub fn statement(&self) -> &Statement {
        match self {
            Self::Terminal(s) | Self::Detached(s) => s,
        }
    }

    pub fn into_statement(self) -> Statement {
        match self {
            Self::Terminal(s) | Self::Detached(s) => s,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::Detached(_))
    }
}

pub struct StatementController {
    app: Arc<dyn ApplicationHost>,
    store: Arc<dyn StatementStore>,
    input: Arc<dyn InputSource>,
    input_poll: Duration,
    /// Nobody can press Enter, so running statements are detached right away
    detach_when_unattended: bool,
    created_statement_name: Option<String>,
}

impl StatementController {
    pub fn new(
        app: Arc<dyn ApplicationHost>,
        store: Arc<dyn StatementStore>,
        input: Arc<dyn InputSource>,
    ) -> Self {
        Self {
            app,
            store,
            input,
            input_poll: DEFAULT_INPUT_POLL,
            detach_when_unattended: false,
            created_statement_name: None,
        }
    }

    pub fn with_input_poll(mut self, interval: Duration) -> Self {
        self.input_poll = interval;
        self
    }

    /// Return [`StatementOutcome::Detached`] as soon as a statement is running
    /// instead of waiting for a terminal phase.
    pub fn with_detach_when_unattended(mut self, detach: bool) -> Self {
        self.detach_when_unattended = detach;
        self
    }

    /// Name of the last remote statement this controller submitted.
    pub fn created_statement_name(&self) -> Option<&str> {
        self.created_statement_name.as_deref()
    }

    /// Submit `sql` and follow it until it is terminal, detached or cancelled.
    ///
    /// Every error is reported before it is returned. An HTTP 401 additionally
    /// ends the application.
    pub async fn execute_statement(&mut self, sql: &str) -> Result<StatementOutcome> {
        let result = self.run(sql).await;
        if let Err(e) = &result {
            self.handle_statement_error(e);
        }
        result
    }

    async fn run(&mut self, sql: &str) -> Result<StatementOutcome> {
        let statement = self.store.submit(sql).await?;
        if !statement.is_local {
            self.created_statement_name = Some(statement.name.clone());
        }
        print_submitted(&statement);

        if should_display_user_identity_warning(&statement) {
            warn!(
                statement = %statement.name,
                principal = %statement.principal,
                "Statement runs under a user identity"
            );
            status_line(&format!(
                "[WARN] To ensure that your statements run continuously, switch to using a \
                 service account instead of your user identity by running \
                 `SET '{}'='sa-123';`. Otherwise, statements will stop running after 4 hours.",
                PRINCIPAL_KEY
            ));
        }

        let ready = self.wait_for_ready(statement).await?;
        let outcome = self.wait_for_terminal(ready).await?;

        if let StatementOutcome::Terminal(statement) = &outcome {
            if !statement.is_local {
                status_line(&format!("Statement phase is {}.", statement.phase));
            }
        }
        Ok(outcome)
    }

    async fn wait_for_ready(&self, statement: Statement) -> Result<Statement> {
        let name = statement.name.clone();
        let token = CancellationToken::new();
        let listener = self.spawn_listener(token.clone(), Interrupt::cancel_key);

        let result = self.store.wait_until_ready(&token, statement).await;
        let interrupt = stop_listener(&token, listener).await;

        match interrupt {
            Some(_) => Err(self.cancel_remote(&name).await),
            None => result,
        }
    }

    async fn wait_for_terminal(&self, statement: Statement) -> Result<StatementOutcome> {
        let with_results = self.store.fetch_result_page(statement).await?;
        if with_results.phase == StatementPhase::Failed {
            return Err(StatementError::Failed {
                name: with_results.name,
                detail: with_results.status_detail.unwrap_or_default(),
            });
        }
        if with_results.is_terminal() {
            return Ok(StatementOutcome::Terminal(with_results));
        }

        let name = with_results.name.clone();
        status_line(&format!("Statement phase is {}.", with_results.phase));
        if self.detach_when_unattended {
            return Ok(detached(with_results));
        }

        let token = CancellationToken::new();
        let listener = self.spawn_listener(token.clone(), Interrupt::cancel_or_detach_key);

        status_line(&format!(
            "Listening for execution errors. {}.",
            "Press Enter to detach".cyan()
        ));

        let result = self
            .store
            .wait_until_terminal(&token, with_results.clone())
            .await;
        let interrupt = stop_listener(&token, listener).await;

        match (interrupt, result) {
            (Some(Interrupt::Cancel), _) => Err(self.cancel_remote(&name).await),
            (Some(Interrupt::Detach), Err(StatementError::Interrupted)) => {
                Ok(detached(with_results))
            }
            (_, result) => result.map(StatementOutcome::Terminal),
        }
    }

    /// Polls the input until a key matches `classify` or `token` is cancelled.
    /// A matching key cancels `token` so the racing wait returns.
    fn spawn_listener(
        &self,
        token: CancellationToken,
        classify: fn(u8) -> Option<Interrupt>,
    ) -> JoinHandle<Option<Interrupt>> {
        let input = Arc::clone(&self.input);
        let poll = self.input_poll;

        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return None;
                }
                if let Some(interrupt) = input.read_key().and_then(classify) {
                    debug!(interrupt = ?interrupt, "Key interrupt");
                    token.cancel();
                    return Some(interrupt);
                }
                tokio::select! {
                    _ = token.cancelled() => return None,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        })
    }

    /// Best-effort remote stop; always yields [`StatementError::Cancelled`].
    async fn cancel_remote(&self, name: &str) -> StatementError {
        match self.store.stop(name).await {
            Ok(stopped) => {
                info!(statement = %name, phase = %stopped.phase, "Statement stopped");
            }
            Err(e) => {
                warn!(statement = %name, "Failed to stop statement: {}", e);
            }
        }
        StatementError::Cancelled
    }

    fn handle_statement_error(&self, err: &StatementError) {
        debug!(error = %err, "Statement execution failed");
        status_line(&format!("{}", err.to_string().red()));
        if err.is_unauthorized() {
            self.app.exit_application();
        }
    }

    /// Delete the last submitted statement. Failures are only logged.
    pub async fn cleanup_statement(&mut self) {
        let Some(name) = self.created_statement_name.take() else {
            return;
        };
        match self.store.delete(&name).await {
            Ok(()) => debug!(statement = %name, "Statement deleted"),
            Err(e) => debug!(statement = %name, "Failed to delete statement: {}", e),
        }
    }
}

fn detached(statement: Statement) -> StatementOutcome {
    info!(statement = %statement.name, "Detached from running statement");
    status_line(&format!(
        "Detached from statement '{}'. It keeps running.",
        statement.name
    ));
    StatementOutcome::Detached(statement)
}

/// Cancels the listener and collects its verdict. A panicked listener counts
/// as no interrupt.
async fn stop_listener(
    token: &CancellationToken,
    listener: JoinHandle<Option<Interrupt>>,
) -> Option<Interrupt> {
    token.cancel();
    match listener.await {
        Ok(interrupt) => interrupt,
        Err(e) => {
            warn!("Input listener failed: {}", e);
            None
        }
    }
}

/// Long-running writes under a user identity stop after 4 hours; only
/// service accounts are exempt.
pub fn should_display_user_identity_warning(statement: &Statement) -> bool {
    if statement.is_local || !is_insert_or_statement_set(&statement.sql) {
        return false;
    }
    statement
        .principal
        .trim()
        .to_lowercase()
        .starts_with("u-")
}

fn is_insert_or_statement_set(sql: &str) -> bool {
    let normalized = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    normalized.starts_with("INSERT") || normalized.starts_with("EXECUTE STATEMENT SET")
}

fn print_submitted(statement: &Statement) {
    if statement.is_local {
        if let Some(detail) = &statement.status_detail {
            status_line(detail);
        }
    } else {
        status_line(&format!("Statement name: {}", statement.name));
        status_line("Statement successfully submitted.");
        status_line("Waiting for statement to be ready. Statement phase is PENDING.");
    }
}

/// The terminal may be in raw mode, so lines end with an explicit carriage
/// return.
fn status_line(message: &str) {
    eprint!("{}\r\n", message);
}
