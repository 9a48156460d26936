use botfleet_agent::{mailbox, run_unit, Connector, Reporter, UnitExit, UnitId, UnitMailbox, UnitSpec};
use botfleet_core::{AgentHandle, UnitEvent};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error};

use super::log;
use super::types::{ExitReport, Internal};

/// Supervisor-side handle on a running unit.
#[derive(Debug)]
pub struct UnitLink {
    pub mailbox: UnitMailbox,
    pub abort: AbortHandle,
}

/// Start the unit task and a watcher that reports how it ended.
pub(crate) fn launch(
    spec: UnitSpec,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<(UnitId, UnitEvent)>,
    internal: mpsc::UnboundedSender<Internal>,
) -> UnitLink {
    let id = spec.id;
    let handle = spec.handle.clone();
    let (mailbox, inbox) = mailbox();
    let reporter = Reporter::new(id, events);

    let task = tokio::spawn(run_unit(spec, connector, inbox, reporter));
    let abort = task.abort_handle();

    tokio::spawn(async move {
        let report = match task.await {
            Ok(exit) => ExitReport::Exited(exit),
            Err(e) if e.is_cancelled() => ExitReport::Exited(UnitExit::Terminated),
            Err(e) => {
                let msg = panic_message(e);
                error!(bot = %handle, unit = %id, "unit panicked: {}", msg);
                ExitReport::Fault(msg)
            }
        };
        if internal.send(Internal::Exited { id, report }).is_err() {
            debug!(unit = %id, "supervisor gone before exit was reported");
        }
    });

    UnitLink { mailbox, abort }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => describe_panic(payload),
        Err(e) => e.to_string(),
    }
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Fire `RespawnDue(handle)` after `delay`. Abort the returned handle to cancel.
pub(crate) fn schedule_respawn(
    handle: AgentHandle,
    delay: Duration,
    internal: mpsc::UnboundedSender<Internal>,
) -> AbortHandle {
    log::info(
        "respawn_scheduled",
        &handle,
        None,
        serde_json::json!({ "delay_secs": delay.as_secs_f64() }),
    );
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = internal.send(Internal::RespawnDue(handle));
    })
    .abort_handle()
}

/// Temporary handle for a device-code login: prefix plus 8 hex chars.
pub fn temp_name(prefix: &str) -> AgentHandle {
    let id = uuid::Uuid::new_v4().simple().to_string();
    AgentHandle::new(format!("{}{}", prefix, &id[..8]))
}
