use crate::packet::HttpPacket;

/// Shared buffer of captured packets.
///
/// Written by the capture session, read by the collector. Implementations
/// must be safe to use from several threads at once.
pub trait PacketStore: Send + Sync {
    /// Append a packet at the tail.
    fn append(&self, packet: HttpPacket);

    /// Copy of everything currently held, oldest first.
    fn snapshot(&self) -> Vec<HttpPacket>;

    /// Remove and return everything currently held, oldest first.
    ///
    /// A packet appended concurrently ends up either in the returned batch or
    /// in the next one, never in both.
    fn drain(&self) -> Vec<HttpPacket>;

    /// Put a drained batch back in front of whatever was appended since.
    fn restore(&self, packets: Vec<HttpPacket>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
