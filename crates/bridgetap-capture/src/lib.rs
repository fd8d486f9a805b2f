mod collector;
mod parser;
mod session;
mod tshark;

#[cfg(test)]
mod testing;

pub use collector::Collector;
pub use parser::HttpPacketParser;
pub use session::{CaptureSession, HTTP_CAPTURE_FILTER, SessionHandle, SessionState};
pub use tshark::TsharkCaptureEngine;
