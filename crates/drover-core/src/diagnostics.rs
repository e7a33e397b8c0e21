//! Overrun snapshots of what every thread in the process is doing
//!
//! A snapshot combines the phase the tick run published on its
//! [`ActivityBoard`], the tick thread's sampled call stack, and what the
//! kernel reports per task under `/proc/self/task`.

use drover_util::{format_elapsed, frames_file_path, unix_timestamp};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

use crate::{ActivityBoard, sample_stack};

const PROC_TASKS: &str = "/proc/self/task";

/// How long a tick thread gets to answer a stack sample
const SAMPLE_WAIT: Duration = Duration::from_secs(1);

/// Writes `current-frames-<unix_ts>` files into a directory
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one snapshot, including the call stack of `tick_thread` when
    /// given. Never fails: I/O errors are logged and `None` is returned.
    pub fn write_current_frames(
        &self,
        activity: &ActivityBoard,
        tick_thread: Option<&JoinHandle<()>>,
    ) -> Option<PathBuf> {
        let path = frames_file_path(&self.dir, unix_timestamp());
        let report = render_report(activity, tick_thread);

        match fs::write(&path, report) {
            Ok(()) => {
                warn!(path = %path.display(), " wrote {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write diagnostics snapshot");
                None
            }
        }
    }
}

fn render_report(activity: &ActivityBoard, tick_thread: Option<&JoinHandle<()>>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "== tick run");
    match activity.current() {
        Some(a) => {
            let _ = writeln!(out, "run {} on thread {}", a.run_id, a.thread);
            let _ = writeln!(out, "running for {}", format_elapsed(a.started_at.elapsed()));
            let _ = writeln!(
                out,
                "{} (for {})",
                a.phase,
                format_elapsed(a.phase_since.elapsed())
            );
        }
        None => {
            let _ = writeln!(out, "idle");
        }
    }
    out.push('\n');

    if let Some(handle) = tick_thread {
        let _ = writeln!(
            out,
            "== stack of {}",
            handle.thread().name().unwrap_or("unnamed")
        );
        match sample_stack(handle, SAMPLE_WAIT) {
            Some(frames) => {
                for frame in frames {
                    let _ = writeln!(out, "{frame}");
                }
            }
            None => {
                let _ = writeln!(out, "unavailable");
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "== tasks");
    for task in read_tasks(Path::new(PROC_TASKS)) {
        let _ = writeln!(out, "{} {} state={} wchan={}", task.tid, task.comm, task.state, task.wchan);
        if let Some(stack) = task.stack {
            out.push_str(&stack);
        }
        out.push('\n');
    }

    out
}

/// One kernel task (thread) of this process
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskInfo {
    tid: u64,
    comm: String,
    state: String,
    wchan: String,
    /// Kernel stack; usually only readable with elevated privileges
    stack: Option<String>,
}

fn read_tasks(root: &Path) -> Vec<TaskInfo> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut tasks: Vec<TaskInfo> = entries
        .flatten()
        .filter_map(|entry| {
            let tid = entry.file_name().to_string_lossy().parse::<u64>().ok()?;
            Some(read_task(&entry.path(), tid))
        })
        .collect();
    tasks.sort_by_key(|t| t.tid);
    tasks
}

fn read_task(dir: &Path, tid: u64) -> TaskInfo {
    let read = |file: &str| {
        fs::read_to_string(dir.join(file))
            .ok()
            .map(|s| s.trim().to_string())
    };

    let state = read("status")
        .and_then(|status| {
            status
                .lines()
                .find_map(|l| l.strip_prefix("State:").map(|s| s.trim().to_string()))
        })
        .unwrap_or_else(|| "?".to_string());

    TaskInfo {
        tid,
        comm: read("comm").unwrap_or_else(|| "?".to_string()),
        state,
        wchan: read("wchan")
            .filter(|w| !w.is_empty() && w != "0")
            .unwrap_or_else(|| "-".to_string()),
        stack: read("stack").filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_util::{FRAMES_FILE_PREFIX, TickRunId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn writes_snapshot_with_activity() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());
        let board = ActivityBoard::new();
        board.begin(TickRunId::new());
        board.set_phase(crate::TickPhase::HandlingTimeout("dev-3".into()));

        let path = diagnostics.write_current_frames(&board, None).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(FRAMES_FILE_PREFIX));
        assert!(name[FRAMES_FILE_PREFIX.len()..].parse::<u64>().is_ok());

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("handling timeout on dev-3"));
        assert!(contents.contains("== tasks"));
        assert!(!contents.contains("== stack of"));
    }

    #[inline(never)]
    fn blocked_in_timeout_handler(release: &AtomicBool) {
        while !release.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn snapshot_shows_where_tick_thread_is_stuck() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let handle = thread::Builder::new()
            .name("drover-device-tick".into())
            .spawn(move || blocked_in_timeout_handler(&flag))
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let path = diagnostics
            .write_current_frames(&ActivityBoard::new(), Some(&handle))
            .unwrap();
        release.store(true, Ordering::Release);
        handle.join().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("== stack of drover-device-tick"));
        assert!(contents.contains("blocked_in_timeout_handler"));
    }

    #[test]
    fn idle_board_is_reported() {
        let report = render_report(&ActivityBoard::new(), None);
        assert!(report.contains("== tick run\nidle"));
    }

    #[test]
    fn missing_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("does/not/exist"));
        assert!(diagnostics.write_current_frames(&ActivityBoard::new(), None).is_none());
    }

    #[test]
    fn reads_fake_task_tree() {
        let root = tempfile::tempdir().unwrap();
        let task = root.path().join("4242");
        fs::create_dir(&task).unwrap();
        fs::write(task.join("comm"), "drover-tick\n").unwrap();
        fs::write(task.join("status"), "Name:\tdrover-tick\nState:\tS (sleeping)\n").unwrap();
        fs::write(task.join("wchan"), "hrtimer_nanosleep").unwrap();
        fs::create_dir(root.path().join("not-a-tid")).unwrap();

        let tasks = read_tasks(root.path());
        assert_eq!(
            tasks,
            vec![TaskInfo {
                tid: 4242,
                comm: "drover-tick".into(),
                state: "S (sleeping)".into(),
                wchan: "hrtimer_nanosleep".into(),
                stack: None,
            }]
        );
    }
}
