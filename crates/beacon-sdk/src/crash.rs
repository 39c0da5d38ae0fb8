//! Panic hook turning unhandled panics into fatal crash reports.

use std::{
    backtrace::Backtrace,
    panic,
    sync::{mpsc, Weak},
    thread,
    time::Duration,
};

use tokio::runtime::Handle;
use tracing::warn;

use crate::session::SessionController;

/// Upper bound on how long a panicking thread waits for its report.
const REPORT_TIMEOUT: Duration = Duration::from_secs(2);

const REPORTER_THREAD: &str = "beacon-crash-report";

/// Chains a reporting hook in front of the current panic hook.
pub(crate) fn install_panic_hook(controller: Weak<SessionController>, handle: Handle) {
    let previous = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let trace = format!("{info}\n\n{}", Backtrace::force_capture());
        report(&controller, &handle, trace);
        previous(info);
    }));
}

// The panicking thread may be a runtime worker, so the report is driven from
// a fresh thread and awaited with a timeout.
fn report(controller: &Weak<SessionController>, handle: &Handle, trace: String) {
    // A panic inside the reporter itself must not recurse.
    if thread::current().name() == Some(REPORTER_THREAD) {
        return;
    }
    let Some(controller) = controller.upgrade() else {
        return;
    };

    let (done, wait) = mpsc::channel();
    let handle = handle.clone();
    let spawned = thread::Builder::new().name(REPORTER_THREAD.to_string()).spawn(move || {
        let result = handle.block_on(controller.log_exception(&trace, false));
        let _ = done.send(result);
    });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start crash reporter thread");
        return;
    }

    match wait.recv_timeout(REPORT_TIMEOUT) {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!(error = %e, "failed to queue crash report"),
        Err(_) => warn!("timed out queueing crash report"),
    }
}
