//! Change detection for loaded script files
//!
//! Only files that have been explicitly tracked are watched. A tracked file
//! whose modification time moves is reported as changed; one that can no
//! longer be read is reported as removed and stops being tracked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Default scan interval (1000ms = 1Hz)
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub changed: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.removed.is_empty()
    }
}

pub struct ScriptScanner {
    scan_interval: Duration,
    last_scan: Option<Instant>,
    /// path -> modification time seen at the last scan
    tracked: HashMap<PathBuf, Option<SystemTime>>,
}

impl ScriptScanner {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SCAN_INTERVAL)
    }

    pub fn with_interval(scan_interval: Duration) -> Self {
        Self {
            scan_interval,
            last_scan: None,
            tracked: HashMap::new(),
        }
    }

    /// Start watching `path`, remembering its current modification time so
    /// the next scan does not report it.
    pub fn track(&mut self, path: &Path) {
        self.tracked.insert(path.to_path_buf(), modified_time(path));
    }

    pub fn untrack(&mut self, path: &Path) -> bool {
        self.tracked.remove(path).is_some()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.tracked.contains_key(path)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn should_scan(&self) -> bool {
        match self.last_scan {
            Some(last) => last.elapsed() >= self.scan_interval,
            None => true,
        }
    }

    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());

        let mut result = ScanResult::default();
        for (path, cached) in self.tracked.iter_mut() {
            match modified_time(path) {
                Some(current) if *cached != Some(current) => {
                    debug!(
                        target: "scripting",
                        "Script changed: {} (old: {:?}, new: {:?})",
                        path.display(),
                        cached,
                        current
                    );
                    *cached = Some(current);
                    result.changed.push(path.clone());
                }
                Some(_) => {}
                None => {
                    debug!(target: "scripting", "Script removed: {}", path.display());
                    result.removed.push(path.clone());
                }
            }
        }

        for path in &result.removed {
            self.tracked.remove(path);
        }
        result
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = interval;
    }
}

impl Default for ScriptScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path).and_then(|metadata| metadata.modified()) {
        Ok(time) => Some(time),
        Err(e) => {
            debug!(
                target: "scripting",
                "Failed to read modification time for {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}
