mod export;
mod memory;

pub use export::{JsonExport, write_json};
pub use memory::MemoryPacketBuffer;
