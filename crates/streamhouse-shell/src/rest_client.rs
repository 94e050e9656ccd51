//! REST client for the StreamHouse statement service
//!
//! Endpoints:
//! - `POST   /api/v1/statements`
//! - `GET    /api/v1/statements/{name}`
//! - `GET    /api/v1/statements/{name}/results[?page_token=...]`
//! - `POST   /api/v1/statements/{name}/stop`
//! - `DELETE /api/v1/statements/{name}`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use streamhouse_results::{decode_results_page, ColumnDetails, ResultsPage};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::statement::{
    poll_phase, LocalStatement, Result, Session, Statement, StatementError, StatementPhase,
    StatementStore,
};

const STATEMENTS_PATH: &str = "/api/v1/statements";

/// REST API client
pub struct RestClient {
    base_url: String,
    client: Client,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET request returning the raw body
    pub async fn get_bytes(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>> {
        let response = send(self.client.get(self.url(path)).query(query)).await?;
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }

    /// GET request
    pub async fn get<R: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<R> {
        let response = send(self.client.get(self.url(path))).await?;
        json_body(response).await
    }

    /// POST request
    pub async fn post<T: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let response = send(self.client.post(self.url(path)).json(body)).await?;
        json_body(response).await
    }

    /// DELETE request
    pub async fn delete(&self, path: &str) -> Result<()> {
        send(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(status_error(status.as_u16(), status.canonical_reason(), error_text));
    }
    Ok(response)
}

async fn json_body<R: for<'de> Deserialize<'de>>(response: Response) -> Result<R> {
    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body)
        .map_err(|e| {
            StatementError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
}

fn transport(e: reqwest::Error) -> StatementError {
    StatementError::Transport(e.to_string())
}

fn status_error(status: u16, reason: Option<&str>, body: String) -> StatementError {
    let message = if body.trim().is_empty() {
        reason.unwrap_or("request failed").to_string()
    } else {
        body
    };
    StatementError::Http { status, message }
}

// Request/Response types for the statement service

#[derive(Debug, Serialize)]
struct CreateStatementRequest<'a> {
    name: &'a str,
    statement: &'a str,
    principal: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatementResource {
    name: String,
    statement: String,
    principal: String,
    phase: StatementPhase,
    #[serde(default)]
    detail: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    result_schema: Vec<ColumnDetails>,
}

impl StatementResource {
    fn into_statement(self, page: Option<ResultsPage>) -> Statement {
        Statement {
            name: self.name,
            sql: self.statement,
            principal: self.principal,
            phase: self.phase,
            status_detail: self.detail,
            created_at: self.created_at,
            is_local: false,
            result_schema: self.result_schema,
            page,
        }
    }
}

/// [`StatementStore`] backed by the statement REST API.
pub struct RestStatementStore {
    client: RestClient,
    session: Mutex<Session>,
    poll_interval: Duration,
}

impl RestStatementStore {
    pub fn new(base_url: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            client: RestClient::new(base_url),
            session: Mutex::new(Session::new(principal)),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn get_statement(&self, name: &str) -> Result<Statement> {
        let resource: StatementResource = self
            .client
            .get(&format!("{}/{}", STATEMENTS_PATH, name))
            .await?;
        Ok(resource.into_statement(None))
    }

    async fn fetch_page(&self, name: &str, page_token: Option<&str>) -> Result<ResultsPage> {
        let query: Vec<(&str, &str)> = page_token
            .map(|token| vec![("page_token", token)])
            .unwrap_or_default();
        let body = self
            .client
            .get_bytes(&format!("{}/{}/results", STATEMENTS_PATH, name), &query)
            .await?;
        decode_results_page(&body).map_err(|e| StatementError::InvalidResponse(e.to_string()))
    }

    async fn wait_for(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
        done: fn(StatementPhase) -> bool,
    ) -> Result<Statement> {
        if statement.is_local {
            return Ok(statement);
        }
        let name = statement.name.clone();
        poll_phase(
            cancel,
            self.poll_interval,
            statement,
            || self.get_statement(&name),
            done,
        )
        .await
    }
}

#[async_trait]
impl StatementStore for RestStatementStore {
    async fn submit(&self, sql: &str) -> Result<Statement> {
        let mut session = self.session.lock().await;

        if let Some(local) = LocalStatement::parse(sql) {
            let detail = session.apply(&local);
            return Ok(local_statement(sql, session.principal(), detail));
        }

        let name = format!("shell-{}", Uuid::new_v4());
        let request = CreateStatementRequest {
            name: &name,
            statement: sql,
            principal: session.principal(),
        };
        let resource: StatementResource = self.client.post(STATEMENTS_PATH, &request).await?;
        debug!(statement = %resource.name, phase = %resource.phase, "Statement created");
        Ok(resource.into_statement(None))
    }

    async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement> {
        self.wait_for(cancel, statement, |phase| phase.is_ready())
            .await
    }

    async fn fetch_result_page(&self, statement: Statement) -> Result<Statement> {
        if statement.is_local {
            return Ok(Statement {
                page: Some(ResultsPage::default()),
                ..statement
            });
        }

        let mut current = self.get_statement(&statement.name).await?;
        if current.has_results() {
            let token = statement
                .page
                .as_ref()
                .and_then(|p| p.next_page_token.as_deref());
            current.page = Some(self.fetch_page(&statement.name, token).await?);
        }
        Ok(current)
    }

    async fn wait_until_terminal(
        &self,
        cancel: &CancellationToken,
        statement: Statement,
    ) -> Result<Statement> {
        self.wait_for(cancel, statement, |phase| phase.is_terminal())
            .await
    }

    async fn stop(&self, name: &str) -> Result<Statement> {
        let resource: StatementResource = self
            .client
            .post(&format!("{}/{}/stop", STATEMENTS_PATH, name), &serde_json::json!({}))
            .await?;
        Ok(resource.into_statement(None))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.client
            .delete(&format!("{}/{}", STATEMENTS_PATH, name))
            .await
    }
}

fn local_statement(sql: &str, principal: &str, detail: String) -> Statement {
    Statement {
        name: format!("local-{}", Uuid::new_v4()),
        sql: sql.to_string(),
        principal: principal.to_string(),
        phase: StatementPhase::Completed,
        status_detail: Some(detail),
        created_at: Utc::now(),
        is_local: true,
        result_schema: Vec::new(),
        page: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nothing listens on the discard port, so every request fails fast
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    #[test]
    fn test_client_creation() {
        let client = RestClient::new("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(
            client.url("/api/v1/statements"),
            "http://localhost:8080/api/v1/statements"
        );
    }

    #[test]
    fn test_statement_resource_mapping() {
        let body = r#"{
            "name": "shell-1",
            "statement": "SELECT * FROM orders;",
            "principal": "sa-123",
            "phase": "RUNNING",
            "created_at": "2024-05-01T10:00:00Z",
            "result_schema": [
                {"name": "id", "type": {"type": "INTEGER", "nullable": false}},
                {"name": "tags", "type": {"type": "ARRAY", "element_type": {"type": "VARCHAR"}}}
            ]
        }"#;
        let resource: StatementResource = serde_json::from_str(body).unwrap();
        let statement = resource.into_statement(None);

        assert_eq!(statement.name, "shell-1");
        assert_eq!(statement.sql, "SELECT * FROM orders;");
        assert_eq!(statement.phase, StatementPhase::Running);
        assert!(statement.status_detail.is_none());
        assert!(!statement.is_local);
        assert_eq!(statement.headers(), vec!["id", "tags"]);
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(401, Some("Unauthorized"), String::new());
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 401: Unauthorized");

        let err = status_error(400, Some("Bad Request"), "syntax error at line 1".to_string());
        assert_eq!(err.to_string(), "HTTP 400: syntax error at line 1");
    }

    #[test]
    fn test_create_request_serialization() {
        let request = CreateStatementRequest {
            name: "shell-1",
            statement: "SELECT 1;",
            principal: "u-abc",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "shell-1");
        assert_eq!(json["statement"], "SELECT 1;");
        assert_eq!(json["principal"], "u-abc");
    }

    #[tokio::test]
    async fn test_local_statements_stay_client_side() {
        let store = RestStatementStore::new(UNREACHABLE, "u-abc");

        let set = store.submit("SET 'client.principal' = 'sa-9';").await.unwrap();
        assert!(set.is_local);
        assert_eq!(set.principal, "sa-9");

        let token = CancellationToken::new();
        let ready = store.wait_until_ready(&token, set).await.unwrap();
        let fetched = store.fetch_result_page(ready).await.unwrap();
        assert!(fetched.page.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let store = RestStatementStore::new(UNREACHABLE, "u-abc");
        let err = store.submit("SELECT 1;").await.unwrap_err();
        assert!(matches!(err, StatementError::Transport(_)));
        assert!(!err.is_unauthorized());
    }
}
