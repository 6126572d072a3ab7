//! Structured JSON queries evaluated by `jq`

use std::process::Stdio;

#[cfg(test)]
use mockall::automock;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::remote::error::QueryError;

/// Trait for evaluating a query against a JSON document
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait QueryRunner: Send + Sync {
    /// Runs `query` on `input` with each entry of `vars` bound as `$name`
    async fn run(
        &self,
        query: &str,
        input: &Value,
        vars: &Map<String, Value>,
    ) -> Result<Value, QueryError>;
}

/// [`QueryRunner`] backed by the `jq` binary
pub struct JqRunner {
    program: String,
}

impl JqRunner {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for JqRunner {
    fn default() -> Self {
        Self::new("jq")
    }
}

#[async_trait::async_trait]
impl QueryRunner for JqRunner {
    async fn run(
        &self,
        query: &str,
        input: &Value,
        vars: &Map<String, Value>,
    ) -> Result<Value, QueryError> {
        let mut command = Command::new(&self.program);
        command.arg("--compact-output");
        for (name, value) in vars {
            command
                .arg("--argjson")
                .arg(name)
                .arg(value.to_string());
        }
        command
            .arg("--exit-status")
            .arg(query)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("jq {}", query);
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.to_string().as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("jq query {:?} failed: {}", query, message);
            return Err(QueryError::Failed {
                query: query.to_string(),
                message: if message.is_empty() {
                    "query produced null or false".to_string()
                } else {
                    message
                },
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().next().unwrap_or_default();
        serde_json::from_str(first).map_err(|e| QueryError::Output {
            query: query.to_string(),
            message: e.to_string(),
        })
    }
}

/// Converts a query result to the string it stands for.
///
/// Only strings and numbers are usable as tags, versions, URLs and timestamps.
pub fn scalar_to_string(query: &str, value: &Value) -> Result<String, QueryError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(QueryError::Output {
            query: query.to_string(),
            message: format!("expected a string or number, got {}", other),
        }),
    }
}
