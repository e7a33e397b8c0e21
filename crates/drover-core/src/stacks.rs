//! Sampling another thread's call stack
//!
//! The target thread is interrupted with [`SAMPLE_SIGNAL`]. Its handler walks
//! its own stack into a fixed buffer of instruction pointers without
//! allocating, and the requesting thread resolves them to symbols afterwards.
//! One sample is in flight per process at a time.

use nix::sys::pthread::{Pthread, pthread_kill, pthread_self};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::ffi::{c_int, c_void};
use std::fmt::Write as _;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// Signal used to ask a thread for its stack
pub const SAMPLE_SIGNAL: Signal = Signal::SIGUSR2;

const MAX_FRAMES: usize = 128;

static FRAMES: [AtomicUsize; MAX_FRAMES] = [const { AtomicUsize::new(0) }; MAX_FRAMES];
static FRAME_COUNT: AtomicUsize = AtomicUsize::new(0);
static TARGET: AtomicU64 = AtomicU64::new(0);
static ARMED: AtomicBool = AtomicBool::new(false);
static DONE: AtomicBool = AtomicBool::new(false);
static SAMPLING: Mutex<()> = Mutex::new(());
static HANDLER: OnceLock<nix::Result<()>> = OnceLock::new();

/// Runs on the sampled thread; touches only atomics and the unwinder
extern "C" fn record_frames(_: c_int) {
    if TARGET.load(Ordering::Acquire) != pthread_self() as u64 {
        return;
    }
    if !ARMED.swap(false, Ordering::AcqRel) {
        return;
    }

    let mut count = 0;
    // SAFETY: ARMED admits a single walker per sample; the walk only reads
    // the current stack and stores into preallocated atomics.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            FRAMES[count].store(frame.ip() as usize, Ordering::Relaxed);
            count += 1;
            count < MAX_FRAMES
        });
    }
    FRAME_COUNT.store(count, Ordering::Relaxed);
    DONE.store(true, Ordering::Release);
}

fn install_handler() -> Result<(), nix::Error> {
    *HANDLER.get_or_init(|| {
        let action = SigAction::new(
            SigHandler::Handler(record_frames),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: record_frames is async-signal-safe (see above)
        unsafe { sigaction(SAMPLE_SIGNAL, &action) }.map(drop)
    })
}

/// Capture the call stack of a running (not yet joined) thread, one
/// resolved frame per entry. `None` if the thread did not answer within
/// `wait` or the signal could not be delivered.
pub fn sample_stack(thread: &JoinHandle<()>, wait: Duration) -> Option<Vec<String>> {
    if let Err(e) = install_handler() {
        warn!(error = %e, "Cannot install stack sampling handler");
        return None;
    }

    let _guard = SAMPLING.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let target: Pthread = thread.as_pthread_t();

    DONE.store(false, Ordering::Release);
    FRAME_COUNT.store(0, Ordering::Relaxed);
    TARGET.store(target as u64, Ordering::Release);
    ARMED.store(true, Ordering::Release);

    if let Err(e) = pthread_kill(target, SAMPLE_SIGNAL) {
        ARMED.store(false, Ordering::Release);
        warn!(error = %e, "Cannot signal thread for its stack");
        return None;
    }

    // A handler that started but never finishes must not hold up the caller
    let deadline = Instant::now() + wait;
    while !DONE.load(Ordering::Acquire) {
        if Instant::now() >= deadline {
            ARMED.store(false, Ordering::Release);
            return None;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let count = FRAME_COUNT.load(Ordering::Relaxed);
    let ips: Vec<usize> = FRAMES[..count]
        .iter()
        .map(|ip| ip.load(Ordering::Relaxed))
        .collect();
    Some(resolve(&ips))
}

fn resolve(ips: &[usize]) -> Vec<String> {
    ips.iter()
        .enumerate()
        .map(|(i, &ip)| {
            let mut line = format!("{i:>4}: {ip:#x}");
            backtrace::resolve(ip as *mut c_void, |symbol| {
                if let Some(name) = symbol.name() {
                    let _ = write!(line, " {name}");
                }
                if let (Some(file), Some(lineno)) = (symbol.filename(), symbol.lineno()) {
                    let _ = write!(line, "\n             at {}:{lineno}", file.display());
                }
            });
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[inline(never)]
    fn waiting_in_helper(release: &AtomicBool) {
        while !release.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn samples_other_thread() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let handle = thread::spawn(move || waiting_in_helper(&flag));
        thread::sleep(Duration::from_millis(50));

        let frames = sample_stack(&handle, Duration::from_secs(2)).unwrap();
        release.store(true, Ordering::Release);
        handle.join().unwrap();

        assert!(!frames.is_empty());
        assert!(frames.iter().any(|f| f.contains("waiting_in_helper")));
        assert!(!frames.iter().any(|f| f.contains("sample_stack")));
    }

    #[test]
    fn finished_thread_is_not_sampled() {
        let handle = thread::spawn(|| {});
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        // Let the OS thread finish exiting, not just the closure
        thread::sleep(Duration::from_millis(50));
        assert!(sample_stack(&handle, Duration::from_millis(50)).is_none());
        handle.join().unwrap();
    }
}
