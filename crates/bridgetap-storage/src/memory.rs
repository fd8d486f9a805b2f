use std::sync::{Mutex, MutexGuard};

use bridgetap_core::packet::HttpPacket;
use bridgetap_core::storage::PacketStore;

/// Unbounded in-memory packet buffer.
///
/// A single mutex guards the vector, so appends, snapshots and drains are
/// serialized. `drain` swaps the vector out while holding the lock.
#[derive(Debug, Default)]
pub struct MemoryPacketBuffer {
    packets: Mutex<Vec<HttpPacket>>,
}

impl MemoryPacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HttpPacket>> {
        // Every critical section leaves the vector valid, so a poisoned lock is still usable.
        self.packets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PacketStore for MemoryPacketBuffer {
    fn append(&self, packet: HttpPacket) {
        self.lock().push(packet);
    }

    fn snapshot(&self) -> Vec<HttpPacket> {
        self.lock().clone()
    }

    fn drain(&self) -> Vec<HttpPacket> {
        std::mem::take(&mut *self.lock())
    }

    fn restore(&self, packets: Vec<HttpPacket>) {
        if packets.is_empty() {
            return;
        }
        let mut guard = self.lock();
        let newer = std::mem::replace(&mut *guard, packets);
        guard.extend(newer);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
