//! Interactive REPL mode for streamshell
//!
//! Provides a rustyline-based SQL shell with:
//! - Command history (up/down arrows), persisted across sessions
//! - Multi-line statements terminated by `;`
//! - Built-in commands (`help`, `mode`, `show`, `exit`)
//!
//! While a statement runs the terminal is switched to raw mode so single key
//! presses can cancel or detach it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use streamhouse_results::{MaterializedResults, RowConverter};
use tracing::{debug, info};

use crate::config::Config;
use crate::controller::{StatementController, StatementOutcome};
use crate::format::Formatter;
use crate::input::RawModeGuard;
use crate::statement::{ApplicationHost, Statement, StatementStore};

const PROMPT: &str = "streamhouse> ";
const CONTINUATION_PROMPT: &str = "          -> ";

/// Upper bound on extra result pages pulled after a statement returns
const MAX_PAGE_FETCHES: usize = 100;

/// Receives the controller's request to end the session.
#[derive(Debug, Default)]
pub struct ShellHost {
    exit_requested: AtomicBool,
}

impl ShellHost {
    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }
}

impl ApplicationHost for ShellHost {
    fn exit_application(&self) {
        info!("Exit requested");
        self.exit_requested.store(true, Ordering::SeqCst);
    }
}

/// What the line loop should do after a line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Continue,
    Exit,
}

/// Line handling independent of the line editor.
pub struct Shell {
    controller: StatementController,
    store: Arc<dyn StatementStore>,
    host: Arc<ShellHost>,
    formatter: Formatter,
    max_results: usize,
    table_mode: bool,
    /// Toggle raw terminal mode around statement execution
    interactive: bool,
    buffer: String,
    last_results: Option<MaterializedResults>,
}

impl Shell {
    pub fn new(
        controller: StatementController,
        store: Arc<dyn StatementStore>,
        host: Arc<ShellHost>,
        config: &Config,
        interactive: bool,
    ) -> Self {
        Self {
            controller,
            store,
            host,
            formatter: Formatter::new(config.output_format, config.colored),
            max_results: config.max_results,
            table_mode: true,
            interactive,
            buffer: String::new(),
            last_results: None,
        }
    }

    /// True while a statement is only partially typed
    pub fn is_continuing(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn last_results(&self) -> Option<&MaterializedResults> {
        self.last_results.as_ref()
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<LineAction> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(LineAction::Continue);
        }

        if self.buffer.is_empty() {
            if let Some(action) = self.handle_builtin(trimmed) {
                return Ok(action);
            }
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(trimmed);
        if !trimmed.ends_with(';') {
            return Ok(LineAction::Continue);
        }

        let sql = std::mem::take(&mut self.buffer);
        self.execute_sql(&sql).await
    }

    fn handle_builtin(&mut self, line: &str) -> Option<LineAction> {
        let command = line.trim_end_matches(';').trim().to_lowercase();
        let tokens: Vec<&str> = command.split_whitespace().collect();

        match tokens.as_slice() {
            ["exit"] | ["quit"] => Some(LineAction::Exit),
            ["help"] => {
                print_help();
                Some(LineAction::Continue)
            }
            ["show"] => {
                match &self.last_results {
                    Some(results) => self.print_results(results),
                    None => self.formatter.print_info("No results to show"),
                }
                Some(LineAction::Continue)
            }
            ["mode", mode] => {
                match *mode {
                    "table" => self.set_table_mode(true),
                    "changelog" => self.set_table_mode(false),
                    other => self.formatter.print_error(&format!(
                        "Unknown mode '{}'. Use 'table' or 'changelog'",
                        other
                    )),
                }
                Some(LineAction::Continue)
            }
            _ => None,
        }
    }

    fn set_table_mode(&mut self, table_mode: bool) {
        self.table_mode = table_mode;
        if let Some(results) = &self.last_results {
            results.set_table_mode(table_mode);
        }
        let name = if table_mode { "table" } else { "changelog" };
        self.formatter
            .print_success(&format!("Result view set to {} mode", name));
    }

    async fn execute_sql(&mut self, sql: &str) -> Result<LineAction> {
        debug!(sql, "Executing statement");
        let outcome = {
            let _raw = self.interactive.then(RawModeGuard::enable);
            self.controller.execute_statement(sql).await
        };

        // The controller already reported any error
        if let Ok(outcome) = outcome {
            self.show_outcome(outcome).await;
        }

        if self.host.exit_requested() {
            return Ok(LineAction::Exit);
        }
        Ok(LineAction::Continue)
    }

    async fn show_outcome(&mut self, outcome: StatementOutcome) {
        let detached = outcome.is_detached();
        let statement = outcome.into_statement();
        if !statement.has_results() {
            if statement.is_local {
                return;
            }
            self.formatter.print_info("Statement returned no results");
            return;
        }

        let results = self.collect_results(statement).await;
        self.print_results(&results);
        if detached {
            self.formatter
                .print_info("Showing results received so far; the statement keeps running");
        }
        self.last_results = Some(results);
    }

    /// Materialize the page carried by `statement` and any pages that are
    /// already available after it.
    async fn collect_results(&self, mut statement: Statement) -> MaterializedResults {
        let results = MaterializedResults::new(statement.headers(), self.max_results);
        results.set_table_mode(self.table_mode);
        let converter = RowConverter::new(&statement.result_schema);

        for _ in 0..MAX_PAGE_FETCHES {
            let Some(page) = statement.page.as_ref() else {
                break;
            };
            if !results.append(converter.convert_items(&page.data)) {
                debug!(statement = %statement.name, "Some result rows were skipped");
            }
            if page.data.is_empty() || page.next_page_token.is_none() {
                break;
            }

            statement = match self.store.fetch_result_page(statement).await {
                Ok(next) => next,
                Err(e) => {
                    self.formatter
                        .print_error(&format!("Failed to fetch results: {}", e));
                    break;
                }
            };
        }
        results
    }

    fn print_results(&self, results: &MaterializedResults) {
        if let Err(e) = self.formatter.print_results(results) {
            self.formatter.print_error(&format!("{}", e));
        }
    }

    /// Delete the last submitted statement before leaving
    pub async fn shutdown(&mut self) {
        self.controller.cleanup_statement().await;
    }
}

/// REPL context holding the line editor and the shell
pub struct Repl {
    editor: DefaultEditor,
    shell: Shell,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(shell: Shell) -> Result<Self> {
        let mut editor = DefaultEditor::new()?;

        // Load history from file if it exists
        let history_path = Config::history_path();
        if history_path.exists() {
            let _ = editor.load_history(&history_path);
        }

        Ok(Self { editor, shell })
    }

    /// Run the interactive REPL loop
    pub async fn run(&mut self) -> Result<()> {
        println!("StreamHouse SQL Shell");
        println!("Type 'help' for available commands, 'exit' or Ctrl+D to quit");
        println!();

        loop {
            let prompt = if self.shell.is_continuing() {
                CONTINUATION_PROMPT
            } else {
                PROMPT
            };

            match self.editor.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = self.editor.add_history_entry(line.trim());
                    }

                    match self.shell.handle_line(&line).await {
                        Ok(LineAction::Exit) => break,
                        Ok(LineAction::Continue) => {}
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C - continue
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D - exit
                    println!("exit");
                    break;
                }
                Err(err) => {
                    eprintln!("Error reading line: {}", err);
                    break;
                }
            }
        }

        self.shell.shutdown().await;

        // Save history on exit
        let history_path = Config::history_path();
        if let Some(parent) = history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.editor.save_history(&history_path)?;

        println!("Goodbye!");
        Ok(())
    }
}

fn print_help() {
    println!("StreamHouse SQL Shell");
    println!();
    println!("Statements:");
    println!("  <sql>;                      Run a statement (may span several lines)");
    println!("  SET 'key' = 'value';        Set a session property");
    println!("  SET 'client.principal' = 'sa-...';");
    println!("                              Run new statements as a service account");
    println!("  RESET;                      Reset session properties");
    println!();
    println!("While a statement runs:");
    println!("  Enter                       Detach, the statement keeps running");
    println!("  Ctrl+C, Ctrl+D, Ctrl+Q, Esc Cancel the statement");
    println!();
    println!("Commands:");
    println!("  mode table                  Show the current state of the results");
    println!("  mode changelog              Show every change event");
    println!("  show                        Print the last results again");
    println!("  help                        Show this help");
    println!("  exit, quit                  Leave the shell");
}
