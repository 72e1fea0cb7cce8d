//! CSV speed log.
//!
//! One quoted row per recorded event, appended to a single file that is
//! created on first open. The column layout is stable:
//! date, hour, minute, speed, unit, image path, x, y, w, h, area,
//! direction.

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::SpeedEvent;

pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create csv log directory {}", parent.display()))?;
        }
        if !path.exists() {
            std::fs::File::create(&path)
                .with_context(|| format!("create csv log {}", path.display()))?;
            log::info!("created new data log file {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn append(&mut self, event: &SpeedEvent) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open csv log {}", self.path.display()))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::NonNumeric)
            .from_writer(file);

        let region = event.region;
        writer.write_record(&[
            event.logged_at.format("%Y%m%d").to_string(),
            event.logged_at.format("%H").to_string(),
            event.logged_at.format("%M").to_string(),
            format!("{:.2}", event.ave_speed),
            event.unit.to_string(),
            event.image_path.display().to_string(),
            region.x.to_string(),
            region.y.to_string(),
            region.w.to_string(),
            region.h.to_string(),
            (region.w * region.h).to_string(),
            event.direction.to_string(),
        ])?;
        writer.flush()?;
        log::info!("csv - appended row to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MotionRegion;
    use crate::{SpeedUnit, TravelDirection};

    fn sample_event() -> SpeedEvent {
        SpeedEvent {
            logged_at: chrono::Local::now(),
            ave_speed: 61.27,
            unit: SpeedUnit::Mph,
            direction: TravelDirection::RightToLeft,
            region: MotionRegion {
                x: 88,
                y: 14,
                w: 35,
                h: 20,
                area: 600,
            },
            contours: 2,
            image_path: PathBuf::from("media/images/speed-x.jpg"),
        }
    }

    #[test]
    fn append_creates_file_and_writes_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed_cam.csv");
        let mut log = CsvLog::open(path.clone()).unwrap();
        log.append(&sample_event()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("61.27"));
        assert!(lines[0].contains("\"mph\""));
        assert!(lines[0].ends_with("\"R2L\""));
    }

    #[test]
    fn append_accumulates_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed_cam.csv");
        let mut log = CsvLog::open(path.clone()).unwrap();
        log.append(&sample_event()).unwrap();
        log.append(&sample_event()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
