//! Recorded session logs.
//!
//! Three layouts are understood, each optionally gzip-compressed (`.gz`):
//! - session logs `{"readings": [{timestamp, accel, gyro, gps}, ...]}` as
//!   written by the motion tracker;
//! - JSON lines, one `Fix` per line (`.jsonl`);
//! - CSV fix tables (`.csv`), see [`RecordedLog::from_csv`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::error::SourceError;
use crate::sources::VecSource;
use crate::types::{Fix, ImuSample, Vec3};

#[derive(Deserialize)]
struct GpsData {
    timestamp: f64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
}

#[derive(Deserialize)]
struct AxisData {
    timestamp: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    #[allow(dead_code)]
    timestamp: f64,
    #[serde(default)]
    accel: Option<AxisData>,
    #[serde(default)]
    gyro: Option<AxisData>,
    #[serde(default)]
    gps: Option<GpsData>,
}

#[derive(Deserialize)]
struct SessionLog {
    readings: Vec<Reading>,
}

/// Column positions in a CSV fix table.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CsvColumns {
    latitude: usize,
    longitude: usize,
    timestamp: usize,
    speed: Option<usize>,
    heading: Option<usize>,
}

impl CsvColumns {
    const POSITIONAL: CsvColumns = CsvColumns {
        latitude: 0,
        longitude: 1,
        timestamp: 2,
        speed: Some(3),
        heading: Some(4),
    };

    fn from_header(fields: &[&str]) -> Result<Self, String> {
        let find = |names: &[&str]| {
            fields
                .iter()
                .position(|f| names.iter().any(|n| f.eq_ignore_ascii_case(n)))
        };
        let required = |names: &[&str]| find(names).ok_or(format!("missing {} column", names[0]));
        Ok(CsvColumns {
            latitude: required(&["latitude", "lat"])?,
            longitude: required(&["longitude", "lon", "lng"])?,
            timestamp: required(&["timestamp", "time"])?,
            speed: find(&["speed"]),
            heading: find(&["heading", "bearing"]),
        })
    }

    fn parse_row(&self, fields: &[&str]) -> Result<GpsData, String> {
        let required = |idx: usize, name: &str| -> Result<f64, String> {
            let raw = fields.get(idx).ok_or(format!("missing {}", name))?;
            raw.parse().map_err(|_| format!("bad {} '{}'", name, raw))
        };
        // Short rows and empty cells leave optional columns unset.
        let optional = |idx: Option<usize>, name: &str| -> Result<Option<f64>, String> {
            match idx.and_then(|i| fields.get(i)).filter(|raw| !raw.is_empty()) {
                Some(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| format!("bad {} '{}'", name, raw)),
                None => Ok(None),
            }
        };
        Ok(GpsData {
            latitude: required(self.latitude, "latitude")?,
            longitude: required(self.longitude, "longitude")?,
            timestamp: required(self.timestamp, "timestamp")?,
            speed: optional(self.speed, "speed")?,
            bearing: optional(self.heading, "heading")?,
        })
    }
}

/// Fixes and IMU samples loaded from disk, each in timestamp order.
#[derive(Clone, Debug, Default)]
pub struct RecordedLog {
    fixes: Vec<Fix>,
    imu: Vec<ImuSample>,
    skipped: usize,
}

impl RecordedLog {
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if name.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let reader = BufReader::new(reader);

        let recorded = if name.ends_with(".jsonl") || name.ends_with(".jsonl.gz") {
            Self::from_json_lines(reader)?
        } else if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            Self::from_csv(reader)?
        } else {
            Self::from_session(reader)?
        };
        log::info!(
            "Loaded {}: {} fixes, {} IMU samples ({} skipped)",
            path.display(),
            recorded.fixes.len(),
            recorded.imu.len(),
            recorded.skipped
        );
        Ok(recorded)
    }

    /// Parse a session log. Readings repeat the latest GPS fix, so fixes and
    /// samples that do not advance in time are dropped.
    pub fn from_session<R: Read>(reader: R) -> Result<Self, SourceError> {
        let session: SessionLog = serde_json::from_reader(reader)?;
        let mut recorded = RecordedLog::default();
        let mut last_gyro = Vec3::zeros();

        for reading in session.readings {
            if let Some(g) = reading.gyro.as_ref() {
                last_gyro = Vec3::new(g.x, g.y, g.z);
            }
            if let Some(a) = reading.accel.as_ref() {
                let sample = ImuSample::new(a.timestamp, Vec3::new(a.x, a.y, a.z), last_gyro);
                if recorded.imu.last().map_or(true, |s| sample.timestamp > s.timestamp) {
                    recorded.imu.push(sample);
                }
            }
            if let Some(gps) = reading.gps.as_ref() {
                if recorded
                    .fixes
                    .last()
                    .is_some_and(|f| gps.timestamp <= f.timestamp)
                {
                    continue;
                }
                match Self::fix_from_gps(gps) {
                    Ok(fix) => recorded.fixes.push(fix),
                    Err(e) => {
                        log::warn!("Skipping GPS reading at {:.3}s: {}", gps.timestamp, e);
                        recorded.skipped += 1;
                    }
                }
            }
        }
        Ok(recorded)
    }

    /// Parse one `Fix` per non-empty line. Malformed lines are errors.
    pub fn from_json_lines<R: BufRead>(reader: R) -> Result<Self, SourceError> {
        let mut recorded = RecordedLog::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fix: Fix = serde_json::from_str(&line)
                .map_err(|e| SourceError::Parse(format!("line {}: {}", idx + 1, e)))?;
            match fix.validated() {
                Ok(fix) => recorded.fixes.push(fix),
                Err(e) => {
                    log::warn!("Skipping line {}: {}", idx + 1, e);
                    recorded.skipped += 1;
                }
            }
        }
        Ok(recorded)
    }

    /// Parse a CSV fix table.
    ///
    /// With a header row, columns are matched by name (`latitude`/`lat`,
    /// `longitude`/`lon`, `timestamp`/`time`, optional `speed` and
    /// `heading`/`bearing`; anything else such as `altitude` is ignored).
    /// Without one, columns are positional: `lat,lon,timestamp[,speed[,heading]]`.
    /// Lines starting with `#` are comments. Unparseable numbers are errors;
    /// out-of-range fixes are skipped.
    pub fn from_csv<R: BufRead>(reader: R) -> Result<Self, SourceError> {
        let mut recorded = RecordedLog::default();
        let mut columns: Option<CsvColumns> = None;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();

            let cols = match columns {
                Some(cols) => cols,
                None if fields[0].parse::<f64>().is_err() => {
                    let header = CsvColumns::from_header(&fields)
                        .map_err(|e| SourceError::Parse(format!("line {}: {}", idx + 1, e)))?;
                    columns = Some(header);
                    continue;
                }
                None => {
                    columns = Some(CsvColumns::POSITIONAL);
                    CsvColumns::POSITIONAL
                }
            };

            let gps = cols
                .parse_row(&fields)
                .map_err(|e| SourceError::Parse(format!("line {}: {}", idx + 1, e)))?;
            match Self::fix_from_gps(&gps) {
                Ok(fix) => recorded.fixes.push(fix),
                Err(e) => {
                    log::warn!("Skipping line {}: {}", idx + 1, e);
                    recorded.skipped += 1;
                }
            }
        }
        Ok(recorded)
    }

    fn fix_from_gps(gps: &GpsData) -> Result<Fix, crate::error::TrackerError> {
        let mut fix = Fix::new(gps.latitude, gps.longitude, gps.timestamp)?;
        if let Some(speed) = gps.speed {
            fix = fix.with_speed(speed)?;
        }
        // A bearing is only meaningful while moving.
        if let Some(bearing) = gps.bearing.filter(|_| gps.speed.unwrap_or(0.0) > 0.5) {
            fix = fix.with_heading(bearing)?;
        }
        Ok(fix)
    }

    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn imu(&self) -> &[ImuSample] {
        &self.imu
    }

    /// Up to `n` of the earliest IMU samples, for bias calibration.
    pub fn leading_imu(&self, n: usize) -> &[ImuSample] {
        &self.imu[..n.min(self.imu.len())]
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn into_sources(self) -> (VecSource<Fix>, VecSource<ImuSample>) {
        (VecSource::new(self.fixes), VecSource::new(self.imu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SESSION: &str = r#"{
        "readings": [
            {"timestamp": 0.00, "accel": {"timestamp": 0.00, "x": 0.1, "y": 0.0, "z": 9.8},
             "gyro": {"timestamp": 0.00, "x": 0.0, "y": 0.0, "z": 0.02}},
            {"timestamp": 0.02, "accel": {"timestamp": 0.02, "x": 0.2, "y": 0.0, "z": 9.8},
             "gps": {"timestamp": 0.02, "latitude": 37.7749, "longitude": -122.4194,
                     "accuracy": 5.0, "speed": 10.0, "bearing": 45.0}},
            {"timestamp": 0.04, "accel": {"timestamp": 0.04, "x": 0.3, "y": 0.0, "z": 9.8},
             "gps": {"timestamp": 0.02, "latitude": 37.7749, "longitude": -122.4194,
                     "accuracy": 5.0, "speed": 10.0, "bearing": 45.0}},
            {"timestamp": 1.02, "gps": {"timestamp": 1.02, "latitude": 95.0, "longitude": 0.0,
                     "accuracy": 5.0, "speed": 0.0}}
        ]
    }"#;

    #[test]
    fn test_session_log_dedupes_repeated_gps() {
        let log = RecordedLog::from_session(SESSION.as_bytes()).unwrap();
        assert_eq!(log.fixes().len(), 1);
        assert_eq!(log.skipped(), 1);
        let fix = log.fixes()[0];
        assert_eq!(fix.speed, Some(10.0));
        assert_eq!(fix.heading, Some(45.0));

        assert_eq!(log.imu().len(), 3);
        assert_eq!(log.imu()[2].angular_rate.z, 0.02);
        assert_eq!(log.imu()[1].acceleration.x, 0.2);
    }

    #[test]
    fn test_json_lines() {
        let lines = "{\"latitude\": 1.0, \"longitude\": 2.0, \"timestamp\": 0.0}\n\n\
                     {\"latitude\": 1.0, \"longitude\": 2.001, \"timestamp\": 1.0, \"speed\": 3.0}\n";
        let log = RecordedLog::from_json_lines(lines.as_bytes()).unwrap();
        assert_eq!(log.fixes().len(), 2);
        assert_eq!(log.fixes()[1].speed, Some(3.0));

        let bad = "{\"latitude\": 1.0}\n";
        assert!(matches!(
            RecordedLog::from_json_lines(bad.as_bytes()),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_csv_with_header() {
        let table = "latitude,longitude,altitude,timestamp,speed\n\
                     37.7749,-122.4194,12.0,0.0,\n\
                     37.7750,-122.4194,12.5,1.0,11.1\n\
                     95.0,0.0,0.0,2.0,1.0\n";
        let log = RecordedLog::from_csv(table.as_bytes()).unwrap();
        assert_eq!(log.fixes().len(), 2);
        assert_eq!(log.skipped(), 1);
        assert_eq!(log.fixes()[0].speed, None);
        assert_eq!(log.fixes()[1].speed, Some(11.1));
        assert_eq!(log.fixes()[1].timestamp, 1.0);
        assert_eq!(log.fixes()[1].latitude, 37.7750);
    }

    #[test]
    fn test_csv_positional_without_header() {
        let table = "# lat,lon,timestamp,speed,heading\n\
                     1.0, 2.0, 0.0\n\
                     1.0, 2.001, 1.0, 3.0, 90.0\n";
        let log = RecordedLog::from_csv(table.as_bytes()).unwrap();
        assert_eq!(log.fixes().len(), 2);
        assert_eq!(log.fixes()[0].longitude, 2.0);
        assert_eq!(log.fixes()[1].speed, Some(3.0));
        assert_eq!(log.fixes()[1].heading, Some(90.0));
    }

    #[test]
    fn test_csv_bad_value_is_parse_error() {
        let table = "lat,lon,timestamp\n1.0,2.0,0.0\n1.0,abc,1.0\n";
        match RecordedLog::from_csv(table.as_bytes()) {
            Err(SourceError::Parse(msg)) => assert!(msg.starts_with("line 3"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }

        let missing_columns = "speed,heading\n1.0,2.0\n";
        assert!(matches!(
            RecordedLog::from_csv(missing_columns.as_bytes()),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_load_csv_by_extension() {
        let path = std::env::temp_dir().join(format!("replay_test_{}.csv", std::process::id()));
        std::fs::write(&path, "lat,lon,timestamp\n1.0,2.0,0.0\n1.0,2.0001,1.0\n").unwrap();
        let log = RecordedLog::load(&path).unwrap();
        assert_eq!(log.fixes().len(), 2);
        assert!(log.imu().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_leading_imu() {
        let log = RecordedLog::from_session(SESSION.as_bytes()).unwrap();
        assert_eq!(log.leading_imu(2).len(), 2);
        assert_eq!(log.leading_imu(2)[1].timestamp, 0.02);
        assert_eq!(log.leading_imu(10).len(), 3);
        assert!(log.leading_imu(0).is_empty());
    }

    #[test]
    fn test_load_gzip_session() {
        let path = std::env::temp_dir().join(format!(
            "comparison_replay_test_{}.json.gz",
            std::process::id()
        ));
        let file = File::create(&path).unwrap();
        let mut gz = GzEncoder::new(file, Compression::default());
        gz.write_all(SESSION.as_bytes()).unwrap();
        gz.finish().unwrap();

        let log = RecordedLog::load(&path).unwrap();
        assert_eq!(log.fixes().len(), 1);
        let (mut fixes, _imu) = log.into_sources();
        use crate::sources::FixSource;
        assert!(fixes.next_fix().is_ok());
        assert_eq!(fixes.next_fix(), Err(SourceError::Exhausted));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = RecordedLog::load(Path::new("/nonexistent/session.json"));
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
