//! Evidence persistence.
//!
//! The `EvidenceRecorder` is the production `CaptureSink`: it names and
//! writes the annotated JPEG, appends the CSV row, inserts the database
//! row, and then runs the housekeeping the original deployment relies on
//! for unattended operation: dated subdirectory rotation, max-files
//! pruning, free-disk-space reclamation and the "recent" symlink folder.
//! Everything past the image write is best-effort; failures are logged
//! and never stop the tracking loop.

mod csv;
mod db;

pub use self::csv::CsvLog;
pub use self::db::{InMemorySpeedLog, SpeedLogStore, SpeedRecord, SqliteSpeedLog};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::SpeedwatchConfig;
use crate::pipeline::CaptureSink;
use crate::SpeedEvent;

/// Never delete more than this share of candidate files in one
/// reclamation session.
const MAX_DELETE_FRACTION: usize = 4;

const MB: u64 = 1024 * 1024;

pub struct EvidenceRecorder {
    cfg: SpeedwatchConfig,
    csv: Option<CsvLog>,
    store: Option<Box<dyn SpeedLogStore>>,
    last_space_check: Instant,
}

impl EvidenceRecorder {
    pub fn new(cfg: &SpeedwatchConfig) -> Result<Self> {
        let store: Option<Box<dyn SpeedLogStore>> = if cfg.storage.db_enabled {
            fs::create_dir_all(&cfg.storage.data_dir)
                .with_context(|| format!("create data dir {}", cfg.storage.data_dir.display()))?;
            Some(Box::new(SqliteSpeedLog::open(&cfg.storage.db_path())?))
        } else {
            None
        };
        Self::with_store(cfg, store)
    }

    /// Recorder with an explicit (possibly in-memory) store.
    pub fn with_store(
        cfg: &SpeedwatchConfig,
        store: Option<Box<dyn SpeedLogStore>>,
    ) -> Result<Self> {
        fs::create_dir_all(&cfg.image.path)
            .with_context(|| format!("create image dir {}", cfg.image.path.display()))?;
        if cfg.image.recent_max > 0 {
            fs::create_dir_all(&cfg.image.recent_dir).with_context(|| {
                format!("create recent dir {}", cfg.image.recent_dir.display())
            })?;
        }
        let csv = if cfg.storage.csv_enabled {
            fs::create_dir_all(&cfg.storage.data_dir)
                .with_context(|| format!("create data dir {}", cfg.storage.data_dir.display()))?;
            Some(CsvLog::open(cfg.storage.csv_path())?)
        } else {
            None
        };
        Ok(Self {
            cfg: cfg.clone(),
            csv,
            store,
            last_space_check: Instant::now(),
        })
    }

    /// Current image directory, rotating into a dated subdirectory when
    /// the configured file-count or age limit is exceeded.
    fn rotated_image_dir(&self) -> PathBuf {
        let base = &self.cfg.image.path;
        let max_files = self.cfg.image.subdir_max_files;
        let max_hours = self.cfg.image.subdir_max_hours;
        if max_files == 0 && max_hours == 0 {
            return base.clone();
        }

        let current = match latest_subdir(base) {
            Some(dir) => dir,
            None => return create_dated_subdir(base),
        };

        let over_files = max_files > 0 && jpg_count(&current) > max_files as usize;
        let over_age = max_hours > 0 && dir_age_hours(&current) > max_hours as u64;
        if over_files || over_age {
            create_dated_subdir(base)
        } else {
            current
        }
    }

    fn free_space_check(&mut self) {
        if self.cfg.storage.space_timer_hrs == 0 {
            return;
        }
        let interval = u64::from(self.cfg.storage.space_timer_hrs) * 3600;
        if self.last_space_check.elapsed().as_secs() < interval {
            return;
        }
        self.last_space_check = Instant::now();
        // Keep the reclamation floor sane.
        let free_mb = self.cfg.storage.space_free_mb.max(100);
        free_space_up_to(free_mb, &self.cfg.image.path, "jpg");
    }
}

impl CaptureSink for EvidenceRecorder {
    fn plan_image_path(&mut self, logged_at: DateTime<Local>, ave_speed: f64) -> PathBuf {
        let dir = self.rotated_image_dir();
        let prefix = if self.cfg.calibration.calibrate {
            "calib-".to_string()
        } else if self.cfg.image.filename_speed {
            format!("{:.0}-{}", ave_speed.round(), self.cfg.image.prefix)
        } else {
            self.cfg.image.prefix.clone()
        };
        let tenths = logged_at.timestamp_subsec_millis() / 100;
        dir.join(format!(
            "{}{}{}.jpg",
            prefix,
            logged_at.format("%Y%m%d-%H%M%S"),
            tenths
        ))
    }

    fn record(&mut self, event: &SpeedEvent, image: &RgbImage) -> Result<()> {
        if let Some(parent) = event.image_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create image dir {}", parent.display()))?;
        }
        image
            .save(&event.image_path)
            .with_context(|| format!("write evidence image {}", event.image_path.display()))?;
        log::info!("saved {}", event.image_path.display());

        if let Some(csv) = &mut self.csv {
            if let Err(e) = csv.append(event) {
                log::error!("csv append failed: {}", e);
            }
        }
        if let Some(store) = &mut self.store {
            let record = SpeedRecord::from_event(event, &self.cfg);
            if let Err(e) = store.insert(&record) {
                log::error!("database insert failed: {}", e);
            }
        }

        self.free_space_check();
        if self.cfg.image.max_files > 0 {
            delete_old_files(
                self.cfg.image.max_files,
                &self.cfg.image.path,
                &self.cfg.image.prefix,
            );
        }
        if self.cfg.image.recent_max > 0 && !self.cfg.calibration.calibrate {
            save_recent(
                self.cfg.image.recent_max,
                &self.cfg.image.recent_dir,
                &event.image_path,
                &self.cfg.image.prefix,
            );
        }
        Ok(())
    }
}

// -------------------- Housekeeping --------------------

/// Delete the oldest prefixed files until fewer than `max_files` remain.
pub fn delete_old_files(max_files: u32, dir: &Path, prefix: &str) {
    let mut files = prefixed_files_oldest_first(dir, prefix);
    while files.len() >= max_files as usize {
        let oldest = files.remove(0);
        match fs::remove_file(&oldest) {
            Ok(()) => log::info!("deleted old file {}", oldest.display()),
            Err(e) => log::error!("cannot remove {}: {}", oldest.display(), e),
        }
    }
}

/// Maintain a bounded folder of symlinks to the most recent evidence
/// images; falls back to copying where symlinks are unsupported.
pub fn save_recent(recent_max: u32, recent_dir: &Path, filename: &Path, prefix: &str) {
    delete_old_files(recent_max, recent_dir, prefix);

    let Some(name) = filename.file_name() else {
        return;
    };
    let dest = recent_dir.join(name);
    let src = filename
        .canonicalize()
        .unwrap_or_else(|_| filename.to_path_buf());

    #[cfg(unix)]
    let linked = std::os::unix::fs::symlink(&src, &dest);
    #[cfg(not(unix))]
    let linked: std::io::Result<()> = Err(std::io::Error::other("symlinks unsupported"));

    match linked {
        Ok(()) => log::info!("symlink {}", dest.display()),
        Err(e) => {
            log::warn!("symlink failed ({}), copying instead", e);
            if let Err(e) = fs::copy(&src, &dest) {
                log::error!(
                    "copy from {} to {} failed: {}",
                    src.display(),
                    recent_dir.display(),
                    e
                );
            }
        }
    }
}

/// Delete the oldest matching files under `media_dir` until the
/// filesystem has at least `free_mb` megabytes available, bounded to a
/// quarter of the candidates per session.
pub fn free_space_up_to(free_mb: u64, media_dir: &Path, extension: &str) {
    if !media_dir.is_dir() {
        log::error!("directory not found - {}", media_dir.display());
        return;
    }
    let mut files = files_by_age(media_dir, extension);
    let total = files.len();
    let mut deleted = 0usize;
    log::info!(
        "disk reclamation started: target {} MB free in {}",
        free_mb,
        media_dir.display()
    );
    while let Some(oldest) = files.pop() {
        match available_mb(media_dir) {
            Some(avail) if avail >= free_mb => break,
            None => break,
            _ => {}
        }
        match fs::remove_file(&oldest) {
            Ok(()) => {
                deleted += 1;
                log::info!("del {}", oldest.display());
            }
            Err(e) => log::error!("del failed {}: {}", oldest.display(), e),
        }
        if deleted > total / MAX_DELETE_FRACTION {
            log::warn!(
                "deletions restricted to 1/{} of {} files per session",
                MAX_DELETE_FRACTION,
                total
            );
            break;
        }
    }
    log::info!("disk reclamation ended: deleted {} of {} files", deleted, total);
}

/// Free megabytes on the filesystem holding `path`.
#[cfg(target_os = "linux")]
fn available_mb(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stats) };
    if rc != 0 {
        return None;
    }
    Some((stats.f_bavail as u64).saturating_mul(stats.f_frsize as u64) / MB)
}

#[cfg(not(target_os = "linux"))]
fn available_mb(_path: &Path) -> Option<u64> {
    None
}

/// Matching files, newest first (so `pop()` yields the oldest).
fn files_by_age(media_dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = walkdir::WalkDir::new(media_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext == extension)
        })
        .filter_map(|entry| {
            let mtime = entry.metadata().ok()?.modified().ok()?;
            Some((mtime, entry.into_path()))
        })
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0));
    files.into_iter().map(|(_, path)| path).collect()
}

fn prefixed_files_oldest_first(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("problem reading directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(prefix)
        })
        .filter_map(|entry| {
            // symlink_metadata so dangling links in the recent folder
            // still age out.
            let meta = entry.path().symlink_metadata().ok()?;
            if !meta.is_file() && !meta.file_type().is_symlink() {
                return None;
            }
            Some((meta.modified().ok()?, entry.path()))
        })
        .collect();
    files.sort_by_key(|(mtime, _)| *mtime);
    files.into_iter().map(|(_, path)| path).collect()
}

// -------------------- Subdirectory rotation --------------------

fn latest_subdir(base: &Path) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(base)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    dirs.pop()
}

fn create_dated_subdir(base: &Path) -> PathBuf {
    let name = Local::now().format("%Y%m%d-%H%M").to_string();
    let dir = base.join(name);
    match fs::create_dir_all(&dir) {
        Ok(()) => {
            log::info!("created {}", dir.display());
            dir
        }
        Err(e) => {
            log::error!(
                "cannot create dir {} ({}), using base location",
                dir.display(),
                e
            );
            base.to_path_buf()
        }
    }
}

fn jpg_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext == "jpg")
                })
                .count()
        })
        .unwrap_or(0)
}

fn dir_age_hours(dir: &Path) -> u64 {
    fs::metadata(dir)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .map(|age| age.as_secs() / 3600)
        .unwrap_or(0)
}
