use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mio::Waker;
use tracing::{error, info, warn};

/// Process-wide stop flag, checked once per loop iteration.
///
/// Triggering it also wakes the poll so the loop does not sit out its
/// full timeout before noticing.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);

        let guard = match self.waker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(waker) = guard.as_ref() {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake event loop");
            }
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Points the flag at the waker of the current poll instance.
    pub(crate) fn attach(&self, waker: Arc<Waker>) {
        let mut guard = match self.waker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(waker);
    }
}

/// Watches for SIGINT/SIGTERM on a background thread and triggers
/// `shutdown` when one arrives.
pub fn listen_for_signals(shutdown: Arc<Shutdown>) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_signal());
            info!("Shutdown signal received");
            shutdown.trigger();
        })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
