use std::path::Path;
use std::sync::Arc;

use bridgetap_core::error::PersistenceError;
use bridgetap_core::packet::HttpPacket;
use bridgetap_core::storage::PacketStore;
use bridgetap_storage::JsonExport;
use tracing::{info, warn};

use crate::session::{SessionHandle, SessionState};

/// Read side of a capture: what the HTTP API hands out.
#[derive(Clone)]
pub struct Collector {
    store: Arc<dyn PacketStore>,
    session: SessionHandle,
}

impl Collector {
    pub fn new(store: Arc<dyn PacketStore>, session: SessionHandle) -> Self {
        Self { store, session }
    }

    /// Everything captured since the start or since the last [`collect`](Self::collect).
    pub fn get_all(&self) -> Vec<HttpPacket> {
        self.store.snapshot()
    }

    /// Remove and return everything captured since the last call.
    pub fn collect(&self) -> Vec<HttpPacket> {
        let packets = self.store.drain();
        info!(count = packets.len(), "collected packets");
        packets
    }

    /// [`collect`](Self::collect) into a JSON file. Returns the number of packets written.
    ///
    /// The file is created before the buffer is drained. If writing fails the
    /// drained packets go back into the buffer, ahead of anything captured
    /// in the meantime.
    pub fn collect_to_file(&self, path: impl AsRef<Path>) -> Result<usize, PersistenceError> {
        let path = path.as_ref();
        info!(path = %path.display(), "collecting packets to file");
        let export = JsonExport::create(path)?;
        let packets = self.collect();
        if let Err(e) = export.write(&packets) {
            warn!(count = packets.len(), "returning packets to the buffer after failed write");
            self.store.restore(packets);
            return Err(e);
        }
        info!(path = %path.display(), count = packets.len(), "stored collected packets");
        Ok(packets.len())
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }
}
