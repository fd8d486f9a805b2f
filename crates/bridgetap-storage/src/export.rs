use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bridgetap_core::error::PersistenceError;
use bridgetap_core::packet::HttpPacket;
use serde_json::ser::PrettyFormatter;

/// A JSON export file that has been created but not written yet.
///
/// Creating the file first lets callers find out about a bad path before
/// they give up anything they would otherwise keep.
pub struct JsonExport {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonExport {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| io_error(&path, source))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `packets` as a pretty-printed JSON array (4-space indent).
    pub fn write(mut self, packets: &[HttpPacket]) -> Result<(), PersistenceError> {
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut self.writer, formatter);
        serde::Serialize::serialize(packets, &mut serializer).map_err(|e| {
            if e.is_io() {
                io_error(&self.path, std::io::Error::other(e))
            } else {
                PersistenceError::Serialization(e.to_string())
            }
        })?;

        self.writer
            .flush()
            .map_err(|source| io_error(&self.path, source))?;
        tracing::debug!(path = %self.path.display(), count = packets.len(), "wrote packets");
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `packets` to `path` as a pretty-printed JSON array (4-space indent).
/// An existing file is truncated.
pub fn write_json(path: impl AsRef<Path>, packets: &[HttpPacket]) -> Result<(), PersistenceError> {
    JsonExport::create(path)?.write(packets)
}
