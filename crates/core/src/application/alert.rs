// Fire-and-forget failure alerts
use crate::port::{FailureNotice, Notifier};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Deliver a failure notice on its own task
///
/// Delivery errors are logged and dropped; the queue never waits on the channel.
pub(crate) fn spawn_failure_alert(
    notifier: Arc<dyn Notifier>,
    notice: FailureNotice,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify_failure(&notice).await {
            warn!(
                job_id = notice.job_id,
                task_type = %notice.task_type,
                error = %e,
                "Failure alert not delivered"
            );
        }
    })
}
