//! JSON-callable operations for an orchestrating agent. Each tool takes a
//! JSON object of arguments and returns a JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::diagnostics::DEFAULT_PROBE_LIMIT;
use crate::error::{Error, Result};
use crate::sync::{NoopProgress, SyncOptions};
use crate::RadSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    TestConnection,
    SyncIssues,
    SyncAll,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::TestConnection, Tool::SyncIssues, Tool::SyncAll];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TestConnection => "test_connection",
            Self::SyncIssues => "sync_issues",
            Self::SyncAll => "sync_all",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw {
            "test_connection" => Some(Self::TestConnection),
            "sync_issues" => Some(Self::SyncIssues),
            "sync_all" => Some(Self::SyncAll),
            _ => None,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            Self::TestConnection => (
                "Check that both Radicle and GitHub are reachable",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "minimum": 1 },
                    },
                    "additionalProperties": false,
                }),
            ),
            Self::SyncIssues => (
                "Mirror issues between Radicle and GitHub in both directions",
                dry_run_schema(),
            ),
            Self::SyncAll => (
                "Mirror issues and patches between Radicle and GitHub",
                dry_run_schema(),
            ),
        };
        ToolDefinition {
            name: self.name().to_owned(),
            description: description.to_owned(),
            parameters,
        }
    }
}

fn dry_run_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dry_run": { "type": "boolean" },
        },
        "additionalProperties": false,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProbeArgs {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncArgs {
    #[serde(default)]
    dry_run: bool,
}

pub fn list_tools() -> Vec<ToolDefinition> {
    Tool::ALL.iter().map(Tool::definition).collect()
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    Ok(serde_json::from_value(args)?)
}

/// Invoke a tool by name. Returns the serialized `ProbeReport` or
/// `RunSummary`.
pub async fn call(radsync: &RadSync, name: &str, args: &Value) -> Result<Value> {
    let tool = Tool::from_name(name).ok_or_else(|| {
        let known: Vec<&str> = Tool::ALL.iter().map(Tool::name).collect();
        Error::Config(format!("unknown tool '{name}'; expected one of {}", known.join(", ")))
    })?;
    log::debug!("Tool call {name} {args}");

    let payload = match tool {
        Tool::TestConnection => {
            let args: ProbeArgs = parse_args(args)?;
            let report = radsync
                .test_connection(args.limit.unwrap_or(DEFAULT_PROBE_LIMIT).max(1))
                .await;
            serde_json::to_value(report)?
        }
        Tool::SyncIssues => {
            let args: SyncArgs = parse_args(args)?;
            serde_json::to_value(radsync.sync_issues(args.dry_run, &NoopProgress).await)?
        }
        Tool::SyncAll => {
            let args: SyncArgs = parse_args(args)?;
            let options = SyncOptions {
                dry_run: args.dry_run,
                ..SyncOptions::default()
            };
            serde_json::to_value(radsync.sync(&options, &NoopProgress).await)?
        }
    };
    Ok(payload)
}
