//! Speed log database.
//!
//! One row per recorded speed event, carrying the measurement plus the
//! configuration context it was taken under, so rows stay interpretable
//! after the config changes. The store is a trait with a SQLite
//! implementation for production and an in-memory implementation for
//! tests.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::config::SpeedwatchConfig;
use crate::SpeedEvent;

/// Flattened row for the `speed` table.
#[derive(Clone, Debug)]
pub struct SpeedRecord {
    /// Datetime-derived primary key, `YYYYMMDD-HHMMSST`.
    pub idx: String,
    pub log_date: String,
    pub log_hour: String,
    pub log_minute: String,
    pub camera: String,
    pub ave_speed: f64,
    pub speed_units: String,
    pub image_path: String,
    pub image_w: u32,
    pub image_h: u32,
    pub image_bigger: f64,
    pub direction: String,
    pub cx: u32,
    pub cy: u32,
    pub mw: u32,
    pub mh: u32,
    pub m_area: u32,
    pub x_left: u32,
    pub x_right: u32,
    pub y_upper: u32,
    pub y_lower: u32,
    pub max_speed_over: f64,
    pub min_area: u32,
    pub track_counter: u32,
    pub cal_obj_px: u32,
    pub cal_obj_mm: f64,
}

impl SpeedRecord {
    pub fn from_event(event: &SpeedEvent, cfg: &SpeedwatchConfig) -> Self {
        let (image_w, image_h) = cfg.image_dimensions();
        let tenths = event.logged_at.timestamp_subsec_millis() / 100;
        Self {
            idx: format!("{}{}", event.logged_at.format("%Y%m%d-%H%M%S"), tenths),
            log_date: event.logged_at.format("%Y%m%d").to_string(),
            log_hour: event.logged_at.format("%H").to_string(),
            log_minute: event.logged_at.format("%M").to_string(),
            camera: cfg.camera.backend.label().to_string(),
            ave_speed: event.ave_speed,
            speed_units: event.unit.to_string(),
            image_path: event.image_path.display().to_string(),
            image_w,
            image_h,
            image_bigger: cfg.image.bigger as f64,
            direction: event.direction.to_string(),
            cx: event.region.x,
            cy: event.region.y,
            mw: event.region.w,
            mh: event.region.h,
            m_area: event.region.w * event.region.h,
            x_left: cfg.motion.x_left,
            x_right: cfg.motion.x_right,
            y_upper: cfg.motion.y_upper,
            y_lower: cfg.motion.y_lower,
            max_speed_over: cfg.motion.max_speed_over,
            min_area: cfg.motion.min_area,
            track_counter: cfg.motion.track_counter,
            cal_obj_px: cfg.calibration.cal_obj_px,
            cal_obj_mm: cfg.calibration.cal_obj_mm,
        }
    }
}

pub trait SpeedLogStore {
    fn insert(&mut self, record: &SpeedRecord) -> Result<()>;
    fn count(&mut self) -> Result<u64>;
}

pub struct SqliteSpeedLog {
    conn: Connection,
}

impl SqliteSpeedLog {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        log::info!("sqlite speed log open at {}", db_path.display());
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS speed (
              idx TEXT PRIMARY KEY,
              log_date TEXT, log_hour TEXT, log_minute TEXT,
              camera TEXT,
              ave_speed REAL, speed_units TEXT, image_path TEXT,
              image_w INTEGER, image_h INTEGER, image_bigger REAL,
              direction TEXT,
              cx INTEGER, cy INTEGER,
              mw INTEGER, mh INTEGER, m_area INTEGER,
              x_left INTEGER, x_right INTEGER,
              y_upper INTEGER, y_lower INTEGER,
              max_speed_over REAL,
              min_area INTEGER, track_counter INTEGER,
              cal_obj_px INTEGER, cal_obj_mm REAL
            );

            CREATE INDEX IF NOT EXISTS idx_speed_log_date ON speed(log_date);
            "#,
        )?;
        Ok(())
    }
}

impl SpeedLogStore for SqliteSpeedLog {
    fn insert(&mut self, r: &SpeedRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO speed VALUES (
              ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
              ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
            )
            "#,
            params![
                r.idx,
                r.log_date,
                r.log_hour,
                r.log_minute,
                r.camera,
                r.ave_speed,
                r.speed_units,
                r.image_path,
                r.image_w,
                r.image_h,
                r.image_bigger,
                r.direction,
                r.cx,
                r.cy,
                r.mw,
                r.mh,
                r.m_area,
                r.x_left,
                r.x_right,
                r.y_upper,
                r.y_lower,
                r.max_speed_over,
                r.min_area,
                r.track_counter,
                r.cal_obj_px,
                r.cal_obj_mm,
            ],
        )?;
        Ok(())
    }

    fn count(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM speed", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemorySpeedLog {
    rows: Vec<SpeedRecord>,
}

impl InMemorySpeedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[SpeedRecord] {
        &self.rows
    }
}

impl SpeedLogStore for InMemorySpeedLog {
    fn insert(&mut self, record: &SpeedRecord) -> Result<()> {
        self.rows.push(record.clone());
        Ok(())
    }

    fn count(&mut self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MotionRegion;
    use crate::{SpeedUnit, TravelDirection};
    use std::path::PathBuf;

    fn sample_record() -> SpeedRecord {
        let cfg = SpeedwatchConfig::load_from(None).unwrap();
        let event = SpeedEvent {
            logged_at: chrono::Local::now(),
            ave_speed: 42.5,
            unit: SpeedUnit::Kph,
            direction: TravelDirection::LeftToRight,
            region: MotionRegion {
                x: 50,
                y: 12,
                w: 40,
                h: 22,
                area: 700,
            },
            contours: 3,
            image_path: PathBuf::from("media/images/speed-20260101-1200001.jpg"),
        };
        SpeedRecord::from_event(&event, &cfg)
    }

    #[test]
    fn sqlite_store_inserts_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteSpeedLog::open(&dir.path().join("speed_cam.db")).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.insert(&sample_record()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn in_memory_store_mirrors_sqlite_behavior() {
        let mut store = InMemorySpeedLog::new();
        assert_eq!(store.count().unwrap(), 0);
        store.insert(&sample_record()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.rows()[0].direction, "L2R");
        assert_eq!(store.rows()[0].m_area, 40 * 22);
    }

    #[test]
    fn record_captures_config_context() {
        let record = sample_record();
        assert_eq!(record.x_left, 25);
        assert_eq!(record.track_counter, 5);
        assert_eq!(record.speed_units, "kph");
        assert_eq!(record.camera, "PiCam");
    }
}
