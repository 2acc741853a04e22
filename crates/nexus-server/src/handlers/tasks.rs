//! Handlers for `/bank-accounts/{acct}/schedule`.

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::json;

use nexus_core::{
  clock::Clock as _,
  store::NexusStore,
  task::{ResourceType, ScheduledTask, TaskType},
};

use crate::{
  auth::{authenticate, authenticate_superuser},
  cron::CronSpec,
  error::{AppError, Result},
  handlers::accounts::require_account,
  state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
  pub name:     String,
  pub cronspec: String,
  #[serde(rename = "type")]
  pub task_type: TaskType,
  #[serde(default)]
  pub params:   serde_json::Value,
}

/// `POST /bank-accounts/{acct}/schedule`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
  Json(body): Json<CreateTaskBody>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;

  if body.name.is_empty() {
    return Err(AppError::BadRequest("task name must be non-empty".into()));
  }
  let spec = CronSpec::parse(&body.cronspec)
    .map_err(|e| AppError::BadRequest(format!("invalid cronspec: {e}")))?;

  if state
    .store
    .get_task(&acct, &body.name)
    .await
    .map_err(AppError::store)?
    .is_some()
  {
    return Err(AppError::Conflict(format!(
      "task {} already exists",
      body.name
    )));
  }

  let now_sec = state.clock.now_unix();
  state
    .store
    .create_task(ScheduledTask {
      resource_type: ResourceType::BankAccount,
      resource_id:   acct,
      task_name:     body.name.clone(),
      task_type:     body.task_type,
      cron_spec:     body.cronspec,
      params:        body.params,
      next_scheduled_execution_sec: spec.next_after_unix(now_sec),
      prev_scheduled_execution_sec: None,
    })
    .await
    .map_err(AppError::store)?;

  Ok(Json(json!({ "name": body.name })))
}

/// `GET /bank-accounts/{acct}/schedule`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
) -> Result<Json<Vec<ScheduledTask>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;
  Ok(Json(state.store.list_tasks(&acct).await.map_err(AppError::store)?))
}

/// `GET /bank-accounts/{acct}/schedule/{name}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path((acct, name)): Path<(String, String)>,
) -> Result<Json<ScheduledTask>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  let task = state
    .store
    .get_task(&acct, &name)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("task {name}")))?;
  Ok(Json(task))
}

/// `DELETE /bank-accounts/{acct}/schedule/{name}`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path((acct, name)): Path<(String, String)>,
) -> Result<StatusCode>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  if state
    .store
    .get_task(&acct, &name)
    .await
    .map_err(AppError::store)?
    .is_none()
  {
    return Err(AppError::NotFound(format!("task {name}")));
  }
  state
    .store
    .delete_task(&acct, &name)
    .await
    .map_err(AppError::store)?;
  Ok(StatusCode::NO_CONTENT)
}
