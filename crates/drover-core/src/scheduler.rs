//! The long-lived control loop and the driver handle around it
//!
//! A [`StateDriver`] owns one control thread. Every poll interval that thread
//! launches a fresh tick-run thread and sleeps; when it wakes, the run must
//! have reported completion on its channel before the next one is launched.
//! A run that is still going is an overrun: it is logged, snapshotted and
//! re-checked with backoff, never killed.

use drover_config::{ConfigSource, DriverSettings};
use drover_store::Store;
use drover_util::{EntityName, EntityType, TickRunId, format_elapsed};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    ActivityBoard, Diagnostics, Dispatcher, DriverError, DriverResult, DriverStats, EventArgs,
    LogBridge, MachineFactory, NoopHook, OverrunBackoff, PollHook, StatsSnapshot, TickExecutor,
    error::panic_message,
};

/// Lifecycle of a driver's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

/// Assembles a [`StateDriver`]
pub struct DriverBuilder<F: MachineFactory> {
    factory: F,
    store: Arc<dyn Store>,
    config: Arc<dyn ConfigSource>,
    settings: DriverSettings,
    hook: Arc<dyn PollHook>,
    thread_name: Option<String>,
}

impl<F: MachineFactory> DriverBuilder<F> {
    pub fn new(factory: F, store: Arc<dyn Store>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            factory,
            store,
            config,
            settings: DriverSettings::default(),
            hook: Arc::new(NoopHook),
            thread_name: None,
        }
    }

    pub fn settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    /// Work to run at the end of every tick
    pub fn poll_hook(mut self, hook: impl PollHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Name of the control thread; tick runs get a `-tick` suffix.
    /// Defaults to `<entity_type>-driver`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn build(self) -> DriverResult<StateDriver<F>> {
        let entity_type = self.factory.entity_type().clone();
        entity_type.validate()?;

        let stats = Arc::new(DriverStats::new());
        let bridge = Arc::new(LogBridge::new(entity_type.clone(), self.store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(self.factory),
            self.store,
            bridge.clone(),
            stats.clone(),
        ));
        let executor = Arc::new(TickExecutor::new(
            dispatcher.clone(),
            self.config,
            self.hook,
            Arc::new(ActivityBoard::new()),
            stats.clone(),
        ));

        Ok(StateDriver {
            thread_name: self
                .thread_name
                .unwrap_or_else(|| format!("{entity_type}-driver")),
            dispatcher,
            executor,
            bridge,
            stats,
            settings: self.settings,
            lifecycle: Mutex::new(Lifecycle {
                state: DriverState::Created,
                stop_tx: None,
                handle: None,
            }),
        })
    }
}

struct Lifecycle {
    state: DriverState,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Drives all entities of one type: periodic timeout polling plus the
/// synchronous entry points request handlers call.
pub struct StateDriver<F: MachineFactory> {
    thread_name: String,
    dispatcher: Arc<Dispatcher<F>>,
    executor: Arc<TickExecutor<F>>,
    bridge: Arc<LogBridge>,
    stats: Arc<DriverStats>,
    settings: DriverSettings,
    lifecycle: Mutex<Lifecycle>,
}

impl<F: MachineFactory> StateDriver<F> {
    pub fn builder(
        factory: F,
        store: Arc<dyn Store>,
        config: Arc<dyn ConfigSource>,
    ) -> DriverBuilder<F> {
        DriverBuilder::new(factory, store, config)
    }

    pub fn entity_type(&self) -> &EntityType {
        self.dispatcher.entity_type()
    }

    pub fn state(&self) -> DriverState {
        self.lifecycle().state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn log_bridge(&self) -> &Arc<LogBridge> {
        &self.bridge
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Launch the control thread and attach the log bridge
    pub fn start(&self) -> DriverResult<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != DriverState::Created {
            return Err(DriverError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let run_loop = RunLoop {
            entity_type: self.entity_type().clone(),
            thread_name: self.thread_name.clone(),
            executor: self.executor.clone(),
            stats: self.stats.clone(),
            diagnostics: Diagnostics::new(&self.settings.diagnostics_dir),
            settings: self.settings.clone(),
            stop_rx,
        };

        self.bridge.attach();
        let handle = match thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run_loop.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.bridge.detach();
                return Err(DriverError::Spawn(e));
            }
        };

        lifecycle.state = DriverState::Running;
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.handle = Some(handle);
        info!(
            entity_type = %self.entity_type(),
            poll_interval = %format_elapsed(self.settings.poll_interval),
            "Driver started"
        );
        Ok(())
    }

    /// Ask the loop to stop, wait for it (and any in-flight tick run) to
    /// exit, then detach the log bridge. A tick run already in flight is
    /// never interrupted. Calling this again is a no-op; calling it before
    /// `start` retires the driver without ever running it.
    pub fn stop(&self) {
        let (stop_tx, handle) = {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                DriverState::Created => {
                    lifecycle.state = DriverState::Stopped;
                    return;
                }
                DriverState::StopRequested | DriverState::Stopped => return,
                DriverState::Running => {}
            }
            lifecycle.state = DriverState::StopRequested;
            (lifecycle.stop_tx.take(), lifecycle.handle.take())
        };

        // Hanging up wakes the loop out of its interval sleep.
        drop(stop_tx);
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(entity_type = %self.entity_type(), "Control thread panicked");
        }

        self.bridge.detach();
        self.lifecycle().state = DriverState::Stopped;
        info!(entity_type = %self.entity_type(), "Driver stopped");
    }

    /// Run one tick synchronously on the calling thread
    pub fn tick(&self) {
        self.executor.tick(TickRunId::new());
    }

    /// Handle a timeout on every entity currently due; see
    /// [`Dispatcher::poll_for_timeouts`]
    pub fn poll_for_timeouts(&self) -> DriverResult<usize> {
        self.dispatcher.poll_for_timeouts(self.executor.activity())
    }

    pub fn handle_event(&self, name: &EntityName, event: &str, args: &EventArgs) -> DriverResult<()> {
        self.dispatcher.handle_event(name, event, args)
    }

    pub fn handle_timeout(&self, name: &EntityName) -> bool {
        self.dispatcher.handle_timeout(name)
    }

    pub fn conditional_transition(
        &self,
        name: &EntityName,
        old_state: &str,
        new_state: &str,
    ) -> DriverResult<bool> {
        self.dispatcher.conditional_transition(name, old_state, new_state)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<F: MachineFactory> fmt::Debug for StateDriver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDriver")
            .field("entity_type", self.entity_type())
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Everything the control thread owns
struct RunLoop<F: MachineFactory> {
    entity_type: EntityType,
    thread_name: String,
    executor: Arc<TickExecutor<F>>,
    stats: Arc<DriverStats>,
    diagnostics: Diagnostics,
    settings: DriverSettings,
    stop_rx: Receiver<()>,
}

impl<F: MachineFactory> RunLoop<F> {
    /// Anything escaping the loop body ends the loop for good
    fn run(self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_inner()));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(&*payload),
        };

        self.stats.loop_failed();
        error!(entity_type = %self.entity_type, error = %failure, "run loop failed");
        warn!(entity_type = %self.entity_type, "run loop returned (this should not happen!)");
    }

    fn run_inner(&self) -> DriverResult<()> {
        loop {
            if self.stop_requested() {
                info!(entity_type = %self.entity_type, "stopping on request");
                return Ok(());
            }

            let mut run = TickRun::launch(&self.executor, &self.stats, &self.thread_name)?;

            if self.sleep_or_stop(self.settings.poll_interval) {
                run.wait();
                run.finish(&self.stats);
                info!(entity_type = %self.entity_type, "stopping on request");
                return Ok(());
            }

            if !run.is_finished() {
                self.wait_out_overrun(&mut run);
            }
            run.finish(&self.stats);
        }
    }

    /// Re-check a still-running tick run until it completes, warning and
    /// snapshotting on every re-check
    fn wait_out_overrun(&self, run: &mut TickRun) {
        let mut backoff = OverrunBackoff::new(
            self.settings.backoff_initial,
            self.settings.backoff_factor,
            self.settings.backoff_cap,
        );

        loop {
            let elapsed = run.started_at.elapsed();
            self.stats.overrun();
            warn!(
                entity_type = %self.entity_type,
                run_id = %run.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "polling thread still running at {}s; not starting another",
                elapsed.as_secs()
            );
            if self
                .diagnostics
                .write_current_frames(self.executor.activity(), run.handle.as_ref())
                .is_some()
            {
                self.stats.snapshot_written();
            }

            let delay = backoff.next().unwrap_or(self.settings.backoff_cap);
            if run.wait_timeout(delay) {
                return;
            }
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `interval`; returns early with `true` once stop is requested
    fn sleep_or_stop(&self, interval: Duration) -> bool {
        !matches!(
            self.stop_rx.recv_timeout(interval),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

/// One tick executing on its own thread, with an explicit completion signal
struct TickRun {
    id: TickRunId,
    started_at: Instant,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl TickRun {
    fn launch<F: MachineFactory>(
        executor: &Arc<TickExecutor<F>>,
        stats: &DriverStats,
        thread_name: &str,
    ) -> DriverResult<Self> {
        let id = TickRunId::new();
        let (done_tx, done) = mpsc::channel();
        let executor = executor.clone();
        let started_at = Instant::now();

        let handle = thread::Builder::new()
            .name(format!("{thread_name}-tick"))
            .spawn(move || {
                executor.tick(id);
                let _ = done_tx.send(());
            })
            .map_err(DriverError::Spawn)?;

        stats.tick_started();
        debug!(run_id = %id, "Tick run launched");
        Ok(Self {
            id,
            started_at,
            done,
            handle: Some(handle),
            finished: false,
        })
    }

    /// A dropped sender counts as completion: the run thread is gone either way
    fn is_finished(&mut self) -> bool {
        if !self.finished {
            self.finished = !matches!(self.done.try_recv(), Err(TryRecvError::Empty));
        }
        self.finished
    }

    fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if !self.finished {
            self.finished = !matches!(
                self.done.recv_timeout(timeout),
                Err(RecvTimeoutError::Timeout)
            );
        }
        self.finished
    }

    fn wait(&mut self) {
        if !self.finished {
            let _ = self.done.recv();
            self.finished = true;
        }
    }

    /// Reap the finished run thread
    fn finish(mut self, stats: &DriverStats) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(payload) = handle.join() {
            stats.tick_failed();
            error!(
                run_id = %self.id,
                error = %panic_message(&*payload),
                "failure in tick"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MachineContext, MachineResult, StateMachine};
    use drover_config::StaticConfig;
    use drover_store::SqliteStore;

    struct Quiet(EntityType);

    struct QuietMachine;

    impl StateMachine for QuietMachine {
        fn handle_event(&self, _event: &str, _args: &EventArgs) -> MachineResult<()> {
            Ok(())
        }

        fn handle_timeout(&self) -> MachineResult<()> {
            Ok(())
        }

        fn conditional_transition(&self, _old: &str, _new: &str) -> MachineResult<bool> {
            Ok(true)
        }
    }

    impl MachineFactory for Quiet {
        type Machine = QuietMachine;

        fn entity_type(&self) -> &EntityType {
            &self.0
        }

        fn build(&self, _ctx: MachineContext) -> QuietMachine {
            QuietMachine
        }
    }

    fn driver(kind: &str, interval: Duration) -> DriverResult<StateDriver<Quiet>> {
        StateDriver::builder(
            Quiet(EntityType::new(kind)),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(StaticConfig::new()),
        )
        .poll_interval(interval)
        .build()
    }

    #[test]
    fn build_rejects_invalid_entity_type() {
        assert!(matches!(
            driver("bad.type", Duration::from_millis(10)),
            Err(DriverError::InvalidName(_))
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        let driver = driver("device", Duration::from_millis(10)).unwrap();
        assert_eq!(driver.state(), DriverState::Created);
        assert!(!driver.log_bridge().is_attached());

        driver.start().unwrap();
        assert_eq!(driver.state(), DriverState::Running);
        assert!(driver.log_bridge().is_attached());
        assert!(matches!(driver.start(), Err(DriverError::AlreadyStarted)));

        driver.stop();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(!driver.log_bridge().is_attached());

        // Second stop is a no-op
        driver.stop();
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    #[test]
    fn stop_before_start_never_runs() {
        let driver = driver("device", Duration::from_millis(10)).unwrap();
        driver.stop();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(matches!(driver.start(), Err(DriverError::AlreadyStarted)));
        assert_eq!(driver.stats().ticks_started, 0);
    }

    #[test]
    fn stop_interrupts_a_long_interval() {
        let driver = driver("device", Duration::from_secs(3600)).unwrap();
        driver.start().unwrap();

        let started = Instant::now();
        driver.stop();
        assert!(started.elapsed() < Duration::from_secs(30));

        // Stop may land before or after the first launch
        let stats = driver.stats();
        assert!(stats.ticks_started <= 1);
        assert_eq!(stats.ticks_started, stats.ticks_completed);
        assert!(!stats.loop_failed);
    }

    #[test]
    fn ticks_repeat_at_interval() {
        let driver = driver("device", Duration::from_millis(20)).unwrap();
        driver.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        driver.stop();

        let stats = driver.stats();
        assert!(stats.ticks_started >= 3, "only {} ticks", stats.ticks_started);
        assert_eq!(stats.ticks_started, stats.ticks_completed);
        assert_eq!(stats.tick_failures, 0);
    }

    fn executor(
        stats: &Arc<DriverStats>,
        hook: impl PollHook,
    ) -> Arc<TickExecutor<Quiet>> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let kind = EntityType::new("device");
        let bridge = Arc::new(LogBridge::new(kind.clone(), store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(Quiet(kind)),
            store,
            bridge,
            stats.clone(),
        ));
        Arc::new(TickExecutor::new(
            dispatcher,
            Arc::new(StaticConfig::new()),
            Arc::new(hook),
            Arc::new(ActivityBoard::new()),
            stats.clone(),
        ))
    }

    #[test]
    fn tick_run_clock_starts_before_the_tick() {
        let stats = Arc::new(DriverStats::new());
        let (seen_tx, seen_rx) = mpsc::channel();
        let seen_tx = std::sync::Mutex::new(seen_tx);
        let executor = executor(&stats, move || -> DriverResult<()> {
            let _ = seen_tx.lock().unwrap().send(Instant::now());
            Ok(())
        });

        let mut run = TickRun::launch(&executor, &stats, "test").unwrap();
        let hook_ran_at = seen_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(run.started_at <= hook_ran_at);
        run.wait();
        run.finish(&stats);
    }

    #[test]
    fn tick_run_reports_completion() {
        let stats = Arc::new(DriverStats::new());
        let executor = executor(&stats, || -> DriverResult<()> {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        });

        let mut run = TickRun::launch(&executor, &stats, "test").unwrap();
        assert!(!run.is_finished());
        assert!(run.wait_timeout(Duration::from_secs(10)));
        assert!(run.is_finished());
        run.finish(&stats);

        assert_eq!(stats.snapshot().ticks_completed, 1);
    }
}
