//! One poll pass: liveness marker, timeouts, extension hook

use drover_config::ConfigSource;
use drover_util::{EntityName, TickRunId, format_elapsed};
use std::fmt;
use std::fs::OpenOptions;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::{Dispatcher, DriverError, DriverResult, DriverStats, MachineFactory, error::panic_message};

/// Extra periodic work run at the end of every tick
pub trait PollHook: Send + Sync + 'static {
    fn poll_others(&self) -> DriverResult<()>;
}

/// Hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl PollHook for NoopHook {
    fn poll_others(&self) -> DriverResult<()> {
        Ok(())
    }
}

impl<F> PollHook for F
where
    F: Fn() -> DriverResult<()> + Send + Sync + 'static,
{
    fn poll_others(&self) -> DriverResult<()> {
        self()
    }
}

/// What a tick run is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPhase {
    Heartbeat,
    ListingTimeouts,
    HandlingTimeout(EntityName),
    PollOthers,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => write!(f, "touching liveness marker"),
            Self::ListingTimeouts => write!(f, "listing timed-out entities"),
            Self::HandlingTimeout(name) => write!(f, "handling timeout on {name}"),
            Self::PollOthers => write!(f, "running poll_others"),
        }
    }
}

/// The in-flight tick run as seen from outside
#[derive(Debug, Clone)]
pub struct Activity {
    pub run_id: TickRunId,
    pub thread: String,
    pub started_at: Instant,
    pub phase: TickPhase,
    pub phase_since: Instant,
}

/// Where the running tick publishes its progress for diagnostics
#[derive(Debug, Default)]
pub struct ActivityBoard {
    current: Mutex<Option<Activity>>,
}

impl ActivityBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Activity> {
        self.slot().clone()
    }

    pub(crate) fn begin(&self, run_id: TickRunId) {
        let now = Instant::now();
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        *self.slot() = Some(Activity {
            run_id,
            thread,
            started_at: now,
            phase: TickPhase::Heartbeat,
            phase_since: now,
        });
    }

    pub(crate) fn set_phase(&self, phase: TickPhase) {
        if let Some(activity) = self.slot().as_mut() {
            activity.phase = phase;
            activity.phase_since = Instant::now();
        }
    }

    pub(crate) fn end(&self) {
        *self.slot() = None;
    }

    fn slot(&self) -> MutexGuard<'_, Option<Activity>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs single ticks for one driver
pub struct TickExecutor<F: MachineFactory> {
    dispatcher: Arc<Dispatcher<F>>,
    config: Arc<dyn ConfigSource>,
    hook: Arc<dyn PollHook>,
    activity: Arc<ActivityBoard>,
    stats: Arc<DriverStats>,
}

impl<F: MachineFactory> TickExecutor<F> {
    pub fn new(
        dispatcher: Arc<Dispatcher<F>>,
        config: Arc<dyn ConfigSource>,
        hook: Arc<dyn PollHook>,
        activity: Arc<ActivityBoard>,
        stats: Arc<DriverStats>,
    ) -> Self {
        Self {
            dispatcher,
            config,
            hook,
            activity,
            stats,
        }
    }

    pub fn activity(&self) -> &Arc<ActivityBoard> {
        &self.activity
    }

    /// One bounded pass. Never fails: errors end the pass early and the next
    /// scheduled tick tries again.
    pub fn tick(&self, run_id: TickRunId) {
        let started = Instant::now();
        self.activity.begin(run_id);
        self.touch_heartbeat();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.poll()))
            .unwrap_or_else(|payload| Err(DriverError::hook(format!(
                "tick panicked: {}",
                panic_message(&*payload)
            ))));

        if let Err(e) = outcome {
            self.stats.tick_failed();
            error!(
                entity_type = %self.dispatcher.entity_type(),
                run_id = %run_id,
                error = %e,
                "failure in tick"
            );
        }

        self.activity.end();
        self.stats.tick_completed();
        debug!(
            entity_type = %self.dispatcher.entity_type(),
            run_id = %run_id,
            elapsed = %format_elapsed(started.elapsed()),
            "Tick finished"
        );
    }

    fn poll(&self) -> DriverResult<()> {
        self.dispatcher.poll_for_timeouts(&self.activity)?;
        self.activity.set_phase(TickPhase::PollOthers);
        self.hook.poll_others()
    }

    /// Truncate-or-create the liveness marker, if one is configured
    fn touch_heartbeat(&self) {
        let Some(path) = self
            .config
            .get("server", "heartbeat_file")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
        else {
            return;
        };

        self.activity.set_phase(TickPhase::Heartbeat);
        if let Err(e) = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
        {
            warn!(path = %path.display(), error = %e, "Failed to touch heartbeat file");
        }
    }
}

impl<F: MachineFactory> fmt::Debug for TickExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickExecutor")
            .field("dispatcher", &self.dispatcher)
            .field("activity", &self.activity)
            .finish_non_exhaustive()
    }
}
