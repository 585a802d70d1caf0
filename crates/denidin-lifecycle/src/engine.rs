use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use denidin_agent::Summariser;
use denidin_core::clock::Clock;
use denidin_sessions::{Session, SessionStore};

/// Periodically (and once at startup) drives sessions through the cleanup
/// pipeline: `Archive → Summarise+Remember → RemoveFromIndex →
/// MarkTransferred`. Runs a cancellation-aware `interval.tick()` /
/// `watch::Receiver<bool>` select loop around that fixed four-step protocol.
pub struct LifecycleWorker {
    sessions: Arc<SessionStore>,
    summariser: Arc<Summariser>,
    clock: Arc<dyn Clock>,
    cleanup_interval: Duration,
}

impl LifecycleWorker {
    pub fn new(
        sessions: Arc<SessionStore>,
        summariser: Arc<Summariser>,
        clock: Arc<dyn Clock>,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            summariser,
            clock,
            cleanup_interval,
        }
    }

    /// Runs the startup sweep, then the periodic loop until `shutdown`
    /// broadcasts `true`. An in-flight sweep is allowed to finish the
    /// session it is currently processing; cancellation is only observed
    /// between sessions and between ticks.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.startup_sweep(&shutdown).await;
        self.run_periodic(shutdown).await;
    }

    /// The crash-recovery sweep spec.md §4.6 requires to complete before any
    /// foreground traffic is handled. Callers that need that ordering
    /// guarantee (`denidin-gateway::main`) should `.await` this directly
    /// before spawning their inbound loop, then hand the worker to
    /// `run_periodic` for the rest of its life.
    pub async fn startup_sweep(&self, shutdown: &watch::Receiver<bool>) {
        info!("lifecycle worker started, running startup sweep");
        self.run_once(shutdown).await;
    }

    /// The periodic tick loop, without the initial startup sweep — use this
    /// after a separate call to `startup_sweep` so the sweep runs exactly
    /// once.
    pub async fn run_periodic(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.cleanup_interval);
        interval.tick().await; // first tick fires immediately; the startup sweep already covered it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.run_once(&shutdown).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("lifecycle worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep: recover orphaned sessions, then drive every candidate
    /// through the four-step protocol.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) {
        self.recover_orphans();

        let candidates = match self.sessions.sessions_needing_cleanup() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("failed to enumerate sessions needing cleanup: {e}");
                return;
            }
        };

        for session in candidates {
            if *shutdown.borrow() {
                info!("lifecycle sweep interrupted by shutdown between sessions");
                break;
            }
            self.process_session(session).await;
        }
    }

    /// Enumerate active-directory sessions not present in the in-memory
    /// index and either insert them ("loaded to short-term") or, if already
    /// stale, leave them for the cleanup pass that follows in the same
    /// sweep.
    fn recover_orphans(&self) {
        let orphans = match self.sessions.orphan_sessions() {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!("failed to enumerate orphan sessions: {e}");
                return;
            }
        };

        let now = self.clock.now();
        for session in orphans {
            self.sessions.index_session(&session);
            if session.is_expired(now, self.sessions.timeout_hours()) {
                info!("recovered stale orphan session {}, queued for transfer", session.id);
            } else {
                info!("recovered fresh orphan session {}, loaded to short-term", session.id);
            }
        }
    }

    /// The four-step protocol for one session. Every step
    /// logs its elapsed time and swallows its own errors so one bad session
    /// never poisons the sweep.
    async fn process_session(&self, mut session: Session) {
        let start = Instant::now();
        let session_id = session.id.to_string();

        if session.storage_path.is_none() {
            match self.sessions.archive(&mut session) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("archive step failed for session {session_id}, will retry next cycle");
                    return;
                }
                Err(e) => {
                    error!("archive step errored for session {session_id}: {e}");
                    return;
                }
            }
        }

        if !session.transferred_to_longterm {
            let outcome = self.summariser.summarise(&session).await;
            if !outcome.ok {
                warn!(
                    "summarise+remember failed for session {session_id}, removing from index but leaving untransferred for retry"
                );
                self.sessions.remove_from_index(&session);
                return;
            }
            if outcome.used_fallback {
                warn!("session {session_id} transferred via raw-transcript fallback");
            }
        }

        self.sessions.remove_from_index(&session);
        if let Err(e) = self.sessions.mark_transferred(&mut session) {
            error!("failed to persist transferred flag for session {session_id}: {e}");
            return;
        }

        info!(elapsed_ms = start.elapsed().as_millis() as u64, "session {session_id} retired");
    }
}
