//! Scripted engine and frame builders shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bridgetap_core::capture::{CaptureEngine, FrameResult};
use bridgetap_core::error::CaptureError;
use bridgetap_core::frame::{DissectedFrame, Field, Layer};
use bridgetap_core::network::InterfaceName;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::mpsc;

/// Engine that replays whatever the test pushes into its sender.
pub struct ScriptedEngine {
    interfaces: Vec<String>,
    frames: Option<mpsc::Receiver<FrameResult>>,
    stopped: Arc<AtomicBool>,
    pub fail_start: bool,
}

impl ScriptedEngine {
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            interfaces,
            frames: None,
            stopped: Arc::new(AtomicBool::new(false)),
            fail_start: false,
        }
    }

    /// Engine that knows the bridge of network `abcdef012345`, plus the sender feeding it.
    pub fn for_bridge() -> (Self, mpsc::Sender<FrameResult>) {
        let (tx, rx) = mpsc::channel(64);
        let mut engine = Self::new(vec!["lo".to_string(), "br-abcdef012345".to_string()]);
        engine.frames = Some(rx);
        (engine, tx)
    }

    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }
}

impl CaptureEngine for ScriptedEngine {
    fn interfaces(&self) -> Result<Vec<String>, CaptureError> {
        Ok(self.interfaces.clone())
    }

    fn start(
        &mut self,
        _interface: &InterfaceName,
        _capture_filter: &str,
    ) -> Result<mpsc::Receiver<FrameResult>, CaptureError> {
        if self.fail_start {
            return Err(CaptureError::StartFailed("scripted failure".into()));
        }
        self.frames
            .take()
            .ok_or_else(|| CaptureError::StartFailed("no frames scripted".into()))
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn base_frame(number: u64, src: (&str, &str), dst: (&str, &str), http: Layer) -> DissectedFrame {
    let sniff_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        + Duration::milliseconds(number as i64);
    DissectedFrame {
        number: Some(number),
        sniff_time,
        transport_layer: Some("tcp".to_string()),
        layers: vec![
            Layer::new("ip")
                .with_field(Field::new("src", src.0))
                .with_field(Field::new("dst", dst.0)),
            Layer::new("tcp")
                .with_field(Field::new("srcport", src.1))
                .with_field(Field::new("dstport", dst.1)),
            http,
        ],
    }
}

/// `GET /` from the client container to the server container.
pub fn request_frame(number: u64) -> DissectedFrame {
    let http = Layer::new("http")
        .with_field(Field::new("request.method", "GET"))
        .with_field(Field::new("request.uri", "/"))
        .with_field(Field::new("request.version", "HTTP/1.1"))
        .with_field(Field::new("request.line", "").with_showname("Host: server\\r\\n"));
    base_frame(number, ("172.18.0.2", "40312"), ("172.18.0.3", "80"), http)
}

/// `200 OK` answering the request in frame `request_in`.
pub fn response_frame(number: u64, request_in: u64) -> DissectedFrame {
    let http = Layer::new("http")
        .with_field(Field::new("response.version", "HTTP/1.1"))
        .with_field(Field::new("response.code", "200"))
        .with_field(Field::new("response.code.desc", "OK"))
        .with_field(Field::new("response.line", "").with_showname("Content-Length: 2\\r\\n"))
        .with_field(Field::new("request_in", request_in.to_string()))
        .with_field(Field::new("time", "0.001"))
        .with_field(Field::new("file_data", "ok"));
    base_frame(number, ("172.18.0.3", "80"), ("172.18.0.2", "40312"), http)
}
