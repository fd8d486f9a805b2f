//! Live capture lifecycle: `Idle → Running → Stopped`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bridgetap_core::capture::CaptureEngine;
use bridgetap_core::error::CaptureError;
use bridgetap_core::network::{InterfaceName, NetworkId, assert_interface_exists};
use bridgetap_core::storage::PacketStore;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::parser::HttpPacketParser;

/// BPF filter handed to the engine. HTTP is recognized by the dissector,
/// not by port, so every TCP segment is captured.
pub const HTTP_CAPTURE_FILTER: &str = "tcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Clonable handle for stopping a session from another task.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<AtomicU8>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stop a running session. Does nothing when the session is idle or already stopped.
    pub fn stop(&self) {
        let stopped = self
            .state
            .compare_exchange(
                SessionState::Running as u8,
                SessionState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if stopped {
            info!("stopping packet capture");
            self.shutdown_tx.send_replace(true);
        } else {
            debug!(state = %self.state(), "stop ignored, capture not running");
        }
    }
}

/// Captures HTTP packets on one interface and appends them to a [`PacketStore`].
///
/// Single-use: once stopped, a session cannot be started again.
pub struct CaptureSession {
    interface: InterfaceName,
    parser: HttpPacketParser,
    engine: Mutex<Box<dyn CaptureEngine>>,
    store: Arc<dyn PacketStore>,
    handle: SessionHandle,
}

impl CaptureSession {
    /// Create an idle session for `network_id`. Fails when the bridge
    /// interface of that network is unknown to the engine.
    pub fn new(
        network_id: NetworkId,
        engine: Box<dyn CaptureEngine>,
        store: Arc<dyn PacketStore>,
    ) -> Result<Self, CaptureError> {
        let interface = network_id.interface_name();
        assert_interface_exists(&interface, &engine.interfaces()?)?;
        info!(network = %network_id, %interface, engine = engine.name(), "capture session ready");

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            interface,
            parser: HttpPacketParser::new(network_id),
            engine: Mutex::new(engine),
            store,
            handle: SessionHandle {
                state: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
                shutdown_tx: Arc::new(shutdown_tx),
            },
        })
    }

    pub fn interface(&self) -> &InterfaceName {
        &self.interface
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Run the capture until [`stop`](Self::stop) is called, the engine runs
    /// out of frames or the engine fails. Only returns then.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let state = &self.handle.state;
        if let Err(current) = state.compare_exchange(
            SessionState::Idle as u8,
            SessionState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return Err(CaptureError::Lifecycle(format!(
                "cannot start a session that is {}",
                SessionState::from_u8(current)
            )));
        }

        let mut shutdown_rx = self.handle.shutdown_tx.subscribe();
        let frames = self.with_engine(|engine| engine.start(&self.interface, HTTP_CAPTURE_FILTER));
        let mut frames = match frames {
            Ok(rx) => rx,
            Err(e) => {
                state.store(SessionState::Stopped as u8, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!(interface = %self.interface, "started live capture");

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stopped| *stopped) => break Ok(()),
                next = frames.recv() => match next {
                    Some(Ok(frame)) => match self.parser.parse(&frame) {
                        Some(packet) => {
                            debug!(%packet, "captured packet");
                            self.store.append(packet);
                        }
                        None => trace!(frame = ?frame.number, "skipping frame"),
                    },
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                }
            }
        };

        state.store(SessionState::Stopped as u8, Ordering::SeqCst);
        if let Err(e) = self.with_engine(|engine| engine.stop()) {
            warn!("failed to stop capture engine: {e}");
        }
        match &result {
            Ok(()) => info!(interface = %self.interface, "live capture ended"),
            Err(e) => warn!(interface = %self.interface, "live capture failed: {e}"),
        }
        result
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut dyn CaptureEngine) -> T) -> T {
        let mut engine = self
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut **engine)
    }
}
