use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::consumers::FixConsumer;
use crate::correction::TrackEvent;
use crate::error::TrackerResult;
use crate::types::CorrectedFix;

/// Writes the corrected track as JSON lines: one `CorrectedFix` per line,
/// interleaved with `{"event": ...}` lines. Gzip when the path ends in `.gz`.
pub struct JsonLinesRecorder {
    path: PathBuf,
    writer: Option<Box<dyn Write + Send>>,
    lines: u64,
}

impl JsonLinesRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(File::create(&path)?);
        let writer: Box<dyn Write + Send> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        Ok(Self {
            path,
            writer: Some(writer),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn write_line<T: Serialize>(&mut self, value: &T) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = serde_json::to_writer(&mut *writer, value)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        match result {
            Ok(()) => self.lines += 1,
            Err(e) => {
                // Stop writing after the first failure; the pipeline keeps running.
                log::error!("Recorder {} failed: {}", self.path.display(), e);
                self.writer = None;
            }
        }
    }
}

impl FixConsumer for JsonLinesRecorder {
    fn consume(&mut self, fix: &CorrectedFix) {
        self.write_line(fix);
    }

    fn on_event(&mut self, event: &TrackEvent) {
        self.write_line(event);
    }

    fn finish(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log::error!("Recorder {} flush failed: {}", self.path.display(), e);
            }
            // Dropping the encoder writes the gzip trailer.
            drop(writer);
            log::info!("Wrote {} lines to {}", self.lines, self.path.display());
        }
    }
}

impl Drop for JsonLinesRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}
