//! Task plumbing shared by the two roles.
//!
//! Each running role owns one spawned task. The task is the only code that
//! touches radio state while the role runs; `stop` cancels it, waits for it to
//! finish, and only then releases the radio, so no radio call can race a stop.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::events::{EventSink, RoleEvent};
use crate::radio::{RadioError, RadioPort, ScanEvent, ScanStream};
use crate::types::RoleKind;

/// Handle to a running role task.
#[derive(Debug)]
pub(crate) struct RoleRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RoleRun {
    /// Spawn `task` inside `span`, handing it a fresh cancellation token.
    pub(crate) fn spawn<F, Fut>(span: Span, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()).instrument(span));
        Self { cancel, handle }
    }

    /// Cancel the task and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                warn!(error = %err, "Role task panicked");
            }
        }
    }
}

/// Span for one role run, tagged with a fresh run id.
pub(crate) fn run_span(kind: RoleKind) -> Span {
    info_span!("role", kind = %kind, run_id = %Uuid::new_v4())
}

/// Sleep for `duration` unless cancelled first. Returns `true` if the full
/// duration elapsed.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Best-effort release of both radio resources.
pub(crate) async fn release_radio(radio: &dyn RadioPort) {
    if let Err(err) = radio.stop_advertising().await {
        debug!(error = %err, "Ignoring stop advertising failure");
    }
    if let Err(err) = radio.stop_scanning().await {
        debug!(error = %err, "Ignoring stop scanning failure");
    }
}

/// Log a radio failure and surface it as an error event.
pub(crate) fn report_radio_error(events: &dyn EventSink, context: &str, err: &RadioError) {
    warn!(error = %err, "{context}");
    events.emit(RoleEvent::error(format!("{context}: {err}")));
}

/// Next event from an optional scan stream. Pends forever without a stream,
/// so it can sit in a `select!` while scanning is down.
pub(crate) async fn next_scan_event(stream: &mut Option<ScanStream>) -> Option<ScanEvent> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(&cancel, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        assert!(!sleep_or_cancel(&cancel, Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_task_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();

        let run = RoleRun::spawn(Span::none(), move |cancel| async move {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        run.shutdown().await;
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_next_scan_event_reads_stream() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut stream = Some(rx);
        tx.send(ScanEvent::Failed { code: 1 }).unwrap();
        assert_eq!(
            next_scan_event(&mut stream).await,
            Some(ScanEvent::Failed { code: 1 })
        );
        drop(tx);
        assert_eq!(next_scan_event(&mut stream).await, None);
    }
}
