use tokio::sync::mpsc;

use crate::error::CaptureError;
use crate::frame::DissectedFrame;
use crate::network::InterfaceName;

/// Item delivered by a running engine: a frame, or the fatal error that ended delivery.
pub type FrameResult = Result<DissectedFrame, CaptureError>;

/// Abstraction over packet capture and dissection engines.
///
/// The engine owns everything below the dissected-frame boundary: opening the
/// interface, applying the capture filter and decoding protocol layers.
pub trait CaptureEngine: Send {
    /// Names of the interfaces the engine can capture on. May block.
    fn interfaces(&self) -> Result<Vec<String>, CaptureError>;

    /// Start a live capture on `interface` restricted by `capture_filter` (BPF syntax).
    /// Returns a receiver that yields dissected frames until the capture ends.
    fn start(
        &mut self,
        interface: &InterfaceName,
        capture_filter: &str,
    ) -> Result<mpsc::Receiver<FrameResult>, CaptureError>;

    /// Stop delivering frames. Calling it on an engine that is not running is a no-op.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Human-readable name of this engine (e.g., "tshark").
    fn name(&self) -> &str;
}
