//! Day-named, append-only log files with a scheduled daily swap.
//!
//! A [`DailyLog`] owns exactly one open file at a time. Writers and the
//! rotation timer share one lock: a write lands entirely in the file that was
//! active when it took the lock, and the previous file is closed only after
//! the new one has been swapped in. Mirrors (usually stderr) live beside the
//! file and are untouched by a swap.
//!
//! The sink plugs into `tracing-subscriber` through [`MakeWriter`], so each
//! formatted event is one `write` call and never straddles two files.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

use crate::shutdown::ShutdownListener;

/// File name format of a day key, e.g. `2026-Oct-19`.
pub const DAY_KEY_FORMAT: &str = "%Y-%b-%d";

pub fn day_key(at: DateTime<Local>) -> String {
    at.format(DAY_KEY_FORMAT).to_string()
}

/// Extra destination that receives every line written to the file.
pub type Mirror = Box<dyn Write + Send>;

/// Local wall-clock time of day at which the active file is swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationBoundary {
    hour: u32,
    minute: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid rotation boundary '{0}', expected HH:MM")]
pub struct BoundaryError(String);

impl RotationBoundary {
    pub const MIDNIGHT: RotationBoundary = RotationBoundary { hour: 0, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Result<Self, BoundaryError> {
        if hour > 23 || minute > 59 {
            return Err(BoundaryError(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Time left until the next occurrence of this boundary. A boundary equal
    /// to `now` counts as already passed.
    pub fn until_next(&self, now: DateTime<Local>) -> Duration {
        let now = now.naive_local();
        let at = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_default();
        let mut target = now.date().and_time(at);
        if target <= now {
            target += chrono::Duration::days(1);
        }
        (target - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for RotationBoundary {
    fn default() -> Self {
        Self::MIDNIGHT
    }
}

impl FromStr for RotationBoundary {
    type Err = BoundaryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || BoundaryError(raw.to_string());
        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for RotationBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

struct ActiveFile {
    day_key: String,
    file: File,
}

struct SinkState {
    /// `None` once closed, either on shutdown or after a failed rotation.
    active: Option<ActiveFile>,
    mirrors: Vec<Mirror>,
}

struct Inner {
    dir: PathBuf,
    state: Mutex<SinkState>,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide rotating log sink. Cheap to clone; clones share the file.
#[derive(Clone)]
pub struct DailyLog {
    inner: Arc<Inner>,
}

impl DailyLog {
    /// Prepare `dir` and open today's file in append mode.
    pub fn open(dir: impl AsRef<Path>, mirrors: Vec<Mirror>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let key = day_key(Local::now());
        let file = open_append(&dir.join(&key))?;

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                state: Mutex::new(SinkState {
                    active: Some(ActiveFile { day_key: key, file }),
                    mirrors,
                }),
                rotation: Mutex::new(None),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn path_for(&self, day_key: &str) -> PathBuf {
        self.inner.dir.join(day_key)
    }

    /// Day key of the active file, `None` when closed.
    pub fn current_day(&self) -> Option<String> {
        self.state().active.as_ref().map(|a| a.day_key.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.state().active.is_none()
    }

    /// Append `line` to the active file and every mirror. The whole buffer is
    /// written under the lock. Fails with `BrokenPipe` once the sink is
    /// closed; nothing is written anywhere in that case.
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        let SinkState { active, mirrors } = &mut *state;
        let Some(active) = active.as_mut() else {
            return Err(closed_error());
        };
        active.file.write_all(line)?;
        for mirror in mirrors.iter_mut() {
            // A broken console must not cost us the file copy.
            let _ = mirror.write_all(line);
        }
        Ok(())
    }

    /// Swap the active file for the one named `day_key`.
    ///
    /// The new file is opened before taking the lock; the old handle is
    /// dropped after the lock is released. If the new file cannot be opened
    /// the sink closes for good instead of carrying on with the stale handle.
    pub fn swap_to(&self, day_key: &str) -> io::Result<()> {
        let opened = open_append(&self.path_for(day_key));
        let previous = {
            let mut state = self.state();
            if state.active.is_none() {
                return Err(closed_error());
            }
            match opened {
                Ok(file) => state.active.replace(ActiveFile {
                    day_key: day_key.to_string(),
                    file,
                }),
                Err(err) => {
                    let stale = state.active.take();
                    drop(state);
                    drop(stale);
                    return Err(err);
                }
            }
        };
        drop(previous);
        Ok(())
    }

    /// Swap to the file of the current local day.
    pub fn rotate(&self) -> io::Result<()> {
        self.swap_to(&day_key(Local::now()))
    }

    /// Start the rotation timer: wait for the next `boundary`, rotate, repeat
    /// daily. The timer stops on shutdown, on [`DailyLog::close`], or after a
    /// failed rotation.
    pub fn spawn_rotation(&self, boundary: RotationBoundary, mut shutdown: ShutdownListener) {
        let log = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let wait = boundary.until_next(Local::now());
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if let Err(err) = log.rotate() {
                    // The sink is gone, stderr is all that is left.
                    eprintln!(
                        "log rotation in {} failed, logging stopped: {}",
                        log.dir().display(),
                        err
                    );
                    break;
                }
                tracing::debug!(dir = %log.dir().display(), "rotated daily log");
            }
        });

        let mut slot = self.inner.rotation.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the rotation timer and close the active file. Later writes fail.
    pub fn close(&self) {
        if let Some(timer) = self
            .inner
            .rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }

        let closed = {
            let mut state = self.state();
            for mirror in state.mirrors.iter_mut() {
                let _ = mirror.flush();
            }
            state.active.take()
        };
        if let Some(mut active) = closed {
            let _ = active.file.flush();
        }
    }

    #[cfg(test)]
    fn rotation_active(&self) -> bool {
        self.inner
            .rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "log sink is closed")
}

/// Borrowing writer handed out to `tracing-subscriber` per event.
pub struct SinkWriter<'a> {
    log: &'a DailyLog,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.write_line(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DailyLog {
    type Writer = SinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter { log: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    use crate::shutdown::Shutdown;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            "06:30".parse::<RotationBoundary>().unwrap(),
            RotationBoundary::new(6, 30).unwrap()
        );
        assert!("24:00".parse::<RotationBoundary>().is_err());
        assert!("0630".parse::<RotationBoundary>().is_err());
        assert_eq!(RotationBoundary::new(0, 5).unwrap().to_string(), "00:05");
    }

    #[test]
    fn boundary_later_today_or_tomorrow() {
        let now = Local.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        let later = RotationBoundary::new(12, 30).unwrap();
        assert_eq!(later.until_next(now), Duration::from_secs(2 * 3600 + 1800));

        let earlier = RotationBoundary::new(9, 0).unwrap();
        assert_eq!(earlier.until_next(now), Duration::from_secs(23 * 3600));

        let exact = RotationBoundary::new(10, 0).unwrap();
        assert_eq!(exact.until_next(now), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn opens_todays_file_and_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let log = DailyLog::open(&dir, vec![]).unwrap();

        log.write_line(b"hello\n").unwrap();

        let today = day_key(Local::now());
        assert_eq!(log.current_day().as_deref(), Some(today.as_str()));
        assert_eq!(read(dir.join(&today)), "hello\n");
    }

    #[test]
    fn mirrors_survive_rotation() {
        let tmp = TempDir::new().unwrap();
        let mirror = Captured::default();
        let log = DailyLog::open(tmp.path(), vec![Box::new(mirror.clone())]).unwrap();

        log.write_line(b"before\n").unwrap();
        log.swap_to("2099-Jan-01").unwrap();
        log.write_line(b"after\n").unwrap();

        let mirrored = String::from_utf8(mirror.0.lock().unwrap().clone()).unwrap();
        assert_eq!(mirrored, "before\nafter\n");
        assert_eq!(read(log.path_for("2099-Jan-01")), "after\n");
        assert!(!read(log.path_for(&day_key(Local::now()))).contains("after"));
    }

    #[test]
    fn writes_after_close_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mirror = Captured::default();
        let log = DailyLog::open(tmp.path(), vec![Box::new(mirror.clone())]).unwrap();

        log.close();

        assert!(log.is_closed());
        let err = log.write_line(b"late\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(mirror.0.lock().unwrap().is_empty());
        assert!(log.swap_to("2099-Jan-01").is_err());
    }

    #[test]
    fn failed_rotation_stops_logging() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        let today = day_key(Local::now());

        // A directory where the next file should be makes the open fail.
        fs::create_dir(log.path_for("2099-Jan-01")).unwrap();
        assert!(log.swap_to("2099-Jan-01").is_err());

        assert!(log.is_closed());
        assert!(log.write_line(b"stale\n").is_err());
        assert!(!read(log.path_for(&today)).contains("stale"));
    }

    #[test]
    fn concurrent_writes_land_in_exactly_one_file() {
        const WRITERS: usize = 8;
        const LINES: usize = 500;

        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        log.swap_to("day-a").unwrap();
        let start = Arc::new(Barrier::new(WRITERS + 1));

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let log = log.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for i in 0..LINES {
                        let line = format!("writer-{w} line-{i} {}\n", "x".repeat(64));
                        log.write_line(line.as_bytes()).unwrap();
                    }
                })
            })
            .collect();

        start.wait();
        log.swap_to("day-b").unwrap();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for key in ["day-a", "day-b"] {
            for line in read(log.path_for(key)).lines() {
                assert!(line.ends_with(&"x".repeat(64)), "torn line: {line}");
                *seen.entry(line.to_string()).or_default() += 1;
            }
        }
        assert_eq!(seen.len(), WRITERS * LINES);
        assert!(seen.values().all(|count| *count == 1));
    }

    /// Let the timer task observe whatever just happened.
    async fn settle(log: &DailyLog) {
        for _ in 0..10 {
            if !log.rotation_active() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_rotates_to_today_once_the_boundary_passes() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        log.swap_to("2000-Jan-01").unwrap();
        let shutdown = Shutdown::new();

        log.spawn_rotation(RotationBoundary::MIDNIGHT, shutdown.listener());
        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;

        assert_eq!(log.current_day(), Some(day_key(Local::now())));
        assert!(log.rotation_active());
        log.write_line(b"rotated\n").unwrap();
        assert_eq!(read(log.path_for(&day_key(Local::now()))), "rotated\n");
        assert!(read(log.path_for("2000-Jan-01")).is_empty());

        shutdown.trigger();
        settle(&log).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_timer_before_the_boundary() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        log.swap_to("2000-Jan-01").unwrap();
        let shutdown = Shutdown::new();

        log.spawn_rotation(RotationBoundary::MIDNIGHT, shutdown.listener());
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.trigger();
        settle(&log).await;
        assert!(!log.rotation_active());

        tokio::time::sleep(Duration::from_secs(48 * 3600)).await;
        assert_eq!(log.current_day().as_deref(), Some("2000-Jan-01"));
        assert!(!log.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn close_aborts_the_timer() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        let shutdown = Shutdown::new();

        log.spawn_rotation(RotationBoundary::MIDNIGHT, shutdown.listener());
        assert!(log.rotation_active());

        log.close();
        assert!(!log.rotation_active());
        tokio::time::sleep(Duration::from_secs(48 * 3600)).await;
        assert!(log.is_closed());
        assert!(log.write_line(b"late\n").is_err());
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn failed_timed_rotation_ends_the_timer_and_logging() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        log.swap_to("2000-Jan-01").unwrap();

        // Today's name taken by a directory: the timed open must fail.
        let today = log.path_for(&day_key(Local::now()));
        fs::remove_file(&today).unwrap();
        fs::create_dir(&today).unwrap();

        let shutdown = Shutdown::new();
        log.spawn_rotation(RotationBoundary::MIDNIGHT, shutdown.listener());
        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;
        settle(&log).await;

        assert!(log.is_closed());
        assert!(!log.rotation_active());
        assert!(log.write_line(b"stale\n").is_err());
        assert!(read(log.path_for("2000-Jan-01")).is_empty());
    }

    #[test]
    fn tracing_events_go_through_the_sink() {
        let tmp = TempDir::new().unwrap();
        let log = DailyLog::open(tmp.path(), vec![]).unwrap();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(log.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(task = "disk", "completed successfully");
        });

        let contents = read(log.path_for(&log.current_day().unwrap()));
        assert!(contents.contains("completed successfully"));
        assert!(contents.contains("task=\"disk\""));
        assert!(contents.ends_with('\n'));
    }
}
