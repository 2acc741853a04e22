//! Scheduled fetch/submit tasks bound to bank-account resources.

use serde::{Deserialize, Serialize};

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
  Fetch,
  Submit,
}

/// The resource a task is bound to. Only bank accounts are schedulable
/// today; the tag mirrors the connection-type escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
  BankAccount,
}

/// A periodic task: `(resource, name)` is unique; the scheduler rewrites the
/// two bookkeeping columns on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
  pub resource_type: ResourceType,
  pub resource_id:   String,
  pub task_name:     String,
  pub task_type:     TaskType,
  pub cron_spec:     String,
  /// Task-type specific parameters; a fetch task holds a `FetchSpec`,
  /// a submit task holds `null` or `{}`.
  pub params:        serde_json::Value,
  pub next_scheduled_execution_sec: Option<i64>,
  pub prev_scheduled_execution_sec: Option<i64>,
}
