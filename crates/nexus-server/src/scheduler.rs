//! The cooperative scheduler: a single task that wakes every second,
//! dispatches due fetch/submit tasks, and reschedules them from their cron
//! spec. Failures are logged and never disable a task.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};

use nexus_core::{
  clock::Clock as _,
  message::{FetchLevel, FetchRange, FetchSpec},
  store::NexusStore,
  task::{ScheduledTask, TaskType},
};

use crate::{
  cron::CronSpec,
  state::AppState,
  workers::{fetch_transactions, submit_all_pending},
};

/// Fetch parameters of a task whose params are `null` or `{}`.
fn default_fetch_spec() -> FetchSpec {
  FetchSpec { level: FetchLevel::All, range: FetchRange::SinceLast }
}

fn fetch_spec_of(params: &Value) -> FetchSpec {
  if params.is_null() {
    return default_fetch_spec();
  }
  serde_json::from_value(params.clone()).unwrap_or_else(|_| default_fetch_spec())
}

async fn run_task<S>(state: &AppState<S>, task: &ScheduledTask)
where
  S: NexusStore,
{
  let outcome = match task.task_type {
    TaskType::Fetch => {
      fetch_transactions(state, &task.resource_id, fetch_spec_of(&task.params))
        .await
        .map(|stats| {
          debug!(
            task = %task.task_name,
            account = %task.resource_id,
            new = stats.new_transactions,
            "scheduled fetch done"
          );
        })
    }
    TaskType::Submit => {
      submit_all_pending(state, &task.resource_id).await.map(|submitted| {
        debug!(
          task = %task.task_name,
          account = %task.resource_id,
          submitted,
          "scheduled submit done"
        );
      })
    }
  };

  if let Err(e) = outcome {
    // The task stays scheduled; the next firing retries from scratch.
    error!(
      task = %task.task_name,
      account = %task.resource_id,
      error = %e,
      "scheduled task failed"
    );
  }
}

/// One scheduler pass: run everything due at `now_sec` and reschedule it.
pub async fn tick<S>(state: &AppState<S>)
where
  S: NexusStore,
{
  let now_sec = state.clock.now_unix();
  let due = match state.store.due_tasks(now_sec).await {
    Ok(due) => due,
    Err(e) => {
      error!(error = %e, "cannot read due tasks");
      return;
    }
  };

  for task in due {
    run_task(state, &task).await;

    let next = CronSpec::parse(&task.cron_spec)
      .ok()
      .and_then(|spec| spec.next_after_unix(now_sec))
      // Unschedulable specs park one day ahead instead of hot-looping.
      .unwrap_or(now_sec + 86_400);

    if let Err(e) = state
      .store
      .update_task_times(&task.resource_id, &task.task_name, now_sec, next)
      .await
    {
      error!(task = %task.task_name, error = %e, "cannot reschedule task");
    }
  }
}

/// Run the scheduler until `shutdown` flips to `true`.
pub async fn run<S>(state: AppState<S>, mut shutdown: watch::Receiver<bool>)
where
  S: NexusStore,
{
  info!("scheduler running");
  let mut interval = tokio::time::interval(Duration::from_secs(1));
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = shutdown.changed() => {
        if *shutdown.borrow() {
          info!("scheduler stopping");
          return;
        }
      }
      _ = interval.tick() => tick(&state).await,
    }
  }
}
