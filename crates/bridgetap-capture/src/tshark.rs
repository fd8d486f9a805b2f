//! tshark capture engine.
//!
//! Runs `tshark` as a child process in field-extraction mode, one line per
//! dissected packet, and converts each line into a [`DissectedFrame`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use bridgetap_core::capture::{CaptureEngine, FrameResult};
use bridgetap_core::error::CaptureError;
use bridgetap_core::frame::{DissectedFrame, Field, Layer};
use bridgetap_core::network::InterfaceName;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Fields requested from tshark, in output column order.
const FIELDS: &[&str] = &[
    "frame.number",
    "frame.time_epoch",
    "frame.protocols",
    "ip.src",
    "ip.dst",
    "ipv6.src",
    "ipv6.dst",
    "tcp.srcport",
    "tcp.dstport",
    "udp.srcport",
    "udp.dstport",
    "http.request.method",
    "http.request.uri",
    "http.request.version",
    "http.request.line",
    "http.response.version",
    "http.response.code",
    "http.response.code.desc",
    "http.response.line",
    "http.request_in",
    "http.time",
    "http.file_data",
];

/// Separates repeated occurrences of a field inside one column.
const AGGREGATOR: char = '\u{1f}';

const TRANSPORT_LAYERS: &[&str] = &["tcp", "udp"];

pub struct TsharkCaptureEngine {
    program: PathBuf,
    display_filter: Option<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TsharkCaptureEngine {
    /// Engine running `program` (usually just `tshark`), keeping only frames
    /// that match the `http` display filter.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            display_filter: Some("http".to_string()),
            shutdown_tx: None,
            task_handle: None,
        }
    }

    pub fn with_display_filter(mut self, filter: Option<String>) -> Self {
        self.display_filter = filter;
        self
    }

    fn capture_args(&self, interface: &InterfaceName, capture_filter: &str) -> Vec<String> {
        let mut args = vec![
            "-l".to_string(),
            "-n".to_string(),
            "-i".to_string(),
            interface.to_string(),
        ];
        if !capture_filter.is_empty() {
            args.extend(["-f".to_string(), capture_filter.to_string()]);
        }
        if let Some(filter) = &self.display_filter {
            args.extend(["-Y".to_string(), filter.clone()]);
        }
        args.extend(
            [
                "-T",
                "fields",
                "-E",
                "header=n",
                "-E",
                "separator=/t",
                "-E",
                "quote=n",
                "-E",
                "occurrence=a",
            ]
            .map(str::to_string),
        );
        args.extend(["-E".to_string(), format!("aggregator={AGGREGATOR}")]);
        for field in FIELDS {
            args.extend(["-e".to_string(), field.to_string()]);
        }
        args
    }
}

impl CaptureEngine for TsharkCaptureEngine {
    fn interfaces(&self) -> Result<Vec<String>, CaptureError> {
        let output = std::process::Command::new(&self.program)
            .arg("-D")
            .output()
            .map_err(|e| {
                CaptureError::StartFailed(format!("cannot run {}: {e}", self.program.display()))
            })?;
        if !output.status.success() {
            return Err(CaptureError::StartFailed(format!(
                "{} -D failed: {}",
                self.program.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_interface_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn start(
        &mut self,
        interface: &InterfaceName,
        capture_filter: &str,
    ) -> Result<mpsc::Receiver<FrameResult>, CaptureError> {
        if self.shutdown_tx.is_some() {
            return Err(CaptureError::StartFailed("tshark is already running".into()));
        }

        let args = self.capture_args(interface, capture_filter);
        debug!(program = %self.program.display(), ?args, "spawning tshark");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::StartFailed(format!("cannot spawn {}: {e}", self.program.display()))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::StartFailed("tshark stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CaptureError::StartFailed("tshark stderr not captured".into()))?;

        let (frame_tx, frame_rx) = mpsc::channel(4096);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(%interface, "starting tshark live capture");

        let task_handle = tokio::spawn(async move {
            let stderr_task = tokio::spawn(log_stderr(stderr));
            let mut lines = BufReader::new(stdout).lines();

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        if let Err(e) = child.kill().await {
                            warn!("failed to kill tshark: {e}");
                        }
                        break;
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => match parse_fields_line(&line) {
                                Some(frame) => {
                                    if frame_tx.send(Ok(frame)).await.is_err() {
                                        // Receiver gone, nobody wants more frames.
                                        let _ = child.kill().await;
                                        break;
                                    }
                                }
                                None => debug!(%line, "unparseable tshark line"),
                            },
                            Ok(None) => {
                                let last_error = stderr_task.await.unwrap_or_default();
                                if let Some(err) = exit_error(&mut child, last_error).await {
                                    let _ = frame_tx.send(Err(err)).await;
                                }
                                return;
                            }
                            Err(e) => {
                                let _ = child.kill().await;
                                let _ = frame_tx
                                    .send(Err(CaptureError::Engine(format!("reading tshark output: {e}"))))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
            stderr_task.abort();
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task_handle = Some(task_handle);
        Ok(frame_rx)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task_handle.take();
        Ok(())
    }

    fn name(&self) -> &str {
        "tshark"
    }
}

/// Forward tshark's stderr to the log. Returns the last line that looked like an error.
async fn log_stderr(stderr: tokio::process::ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut last_error = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with("tshark:") {
            warn!("{line}");
            last_error = line;
        } else {
            debug!("tshark: {line}");
        }
    }
    last_error
}

async fn exit_error(child: &mut Child, last_error: String) -> Option<CaptureError> {
    match child.wait().await {
        Ok(status) if status.success() => {
            info!("tshark exited");
            None
        }
        Ok(status) => Some(CaptureError::Engine(describe_exit(status, &last_error))),
        Err(e) => Some(CaptureError::Engine(format!("waiting for tshark: {e}"))),
    }
}

fn describe_exit(status: ExitStatus, last_error: &str) -> String {
    if last_error.is_empty() {
        format!("tshark exited with {status}")
    } else {
        format!("tshark exited with {status}: {last_error}")
    }
}

/// Parse `tshark -D` output (`1. eth0`, `2. br-abc (Docker bridge)`) into interface names.
pub(crate) fn parse_interface_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (_index, rest) = line.trim().split_once(". ")?;
            let name = rest.split(" (").next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Convert one line of `-T fields` output into a frame.
///
/// Columns follow [`FIELDS`]; a field `layer.rest` lands in layer `layer` as
/// field `rest`. Header lines keep their text as display string.
pub(crate) fn parse_fields_line(line: &str) -> Option<DissectedFrame> {
    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() < 2 {
        return None;
    }

    let mut layers: Vec<Layer> = Vec::new();
    for (name, column) in FIELDS.iter().zip(columns.iter()) {
        if column.is_empty() {
            continue;
        }
        let (layer_name, field_name) = name.split_once('.')?;
        let index = match layers.iter().position(|l| l.name == layer_name) {
            Some(index) => index,
            None => {
                layers.push(Layer::new(layer_name));
                layers.len() - 1
            }
        };
        for value in column.split(AGGREGATOR) {
            let mut field = Field::new(field_name, value);
            if field_name.ends_with(".line") {
                field = field.with_showname(value);
            }
            layers[index].fields.push(field);
        }
    }

    let frame_layer = layers.iter().find(|l| l.name == "frame");
    let number = frame_layer
        .and_then(|l| l.get("number"))
        .and_then(|n| n.trim().parse().ok());
    let sniff_time = frame_layer
        .and_then(|l| l.get("time_epoch"))
        .and_then(parse_epoch)
        .unwrap_or_else(Utc::now);
    let transport_layer = frame_layer
        .and_then(|l| l.get("protocols"))
        .and_then(detect_transport);

    Some(DissectedFrame {
        number,
        sniff_time,
        transport_layer,
        layers,
    })
}

/// `frame.time_epoch` (`seconds.fraction`) as UTC.
fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = raw.trim().split_once('.').unwrap_or((raw.trim(), ""));
    let secs: i64 = secs.parse().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = &frac[..frac.len().min(9)];
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };
    DateTime::from_timestamp(secs, nanos)
}

/// First transport protocol in a `frame.protocols` chain like `eth:ethertype:ip:tcp:http`.
fn detect_transport(protocols: &str) -> Option<String> {
    protocols
        .split(':')
        .find(|p| TRANSPORT_LAYERS.contains(p))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fields_line(values: &[(&str, &str)]) -> String {
        FIELDS
            .iter()
            .map(|name| {
                values
                    .iter()
                    .find(|(n, _)| n == name)
                    .map_or("", |(_, v)| *v)
            })
            .collect::<Vec<_>>()
            .join("\t")
    }

    #[test]
    fn test_parse_interface_list() {
        let output = "1. eth0\n2. br-abcdef012345\n3. any\n4. lo (Loopback)\n5. ciscodump (Cisco remote capture)\n";
        assert_eq!(
            parse_interface_list(output),
            vec!["eth0", "br-abcdef012345", "any", "lo", "ciscodump"]
        );
    }

    #[test]
    fn test_parse_request_line() {
        let headers = format!("Host: 172.18.0.3\\r\\n{AGGREGATOR}User-Agent: curl/8.5.0\\r\\n");
        let line = fields_line(&[
            ("frame.number", "12"),
            ("frame.time_epoch", "1709294400.250000000"),
            ("frame.protocols", "eth:ethertype:ip:tcp:http"),
            ("ip.src", "172.18.0.2"),
            ("ip.dst", "172.18.0.3"),
            ("tcp.srcport", "40312"),
            ("tcp.dstport", "80"),
            ("http.request.method", "GET"),
            ("http.request.uri", "/health"),
            ("http.request.version", "HTTP/1.1"),
            ("http.request.line", headers.as_str()),
        ]);

        let frame = parse_fields_line(&line).unwrap();
        assert_eq!(frame.number, Some(12));
        assert_eq!(frame.transport_layer.as_deref(), Some("tcp"));
        assert_eq!(
            frame.sniff_time,
            Utc.timestamp_opt(1_709_294_400, 250_000_000).unwrap()
        );

        let http = frame.layer("http").unwrap();
        assert_eq!(http.get("request.method"), Some("GET"));
        let lines: Vec<_> = http.all("request.line").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].showname_key(), "User-Agent");
        assert_eq!(lines[1].showname_value(), "curl/8.5.0\\r\\n");

        assert_eq!(frame.layer("tcp").unwrap().get("dstport"), Some("80"));
        assert!(frame.layer("udp").is_none());
        assert!(frame.layer("ipv6").is_none());
    }

    #[test]
    fn test_parse_line_without_http_fields() {
        let line = fields_line(&[
            ("frame.number", "3"),
            ("frame.time_epoch", "1709294400"),
            ("frame.protocols", "eth:ethertype:ip:tcp"),
        ]);
        let frame = parse_fields_line(&line).unwrap();
        assert!(!frame.has_layer("http"));
        assert_eq!(frame.sniff_time, Utc.timestamp_opt(1_709_294_400, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage_line() {
        assert!(parse_fields_line("Capturing on 'br-abcdef012345'").is_none());
    }

    #[test]
    fn test_parse_epoch_precision() {
        assert_eq!(
            parse_epoch("1.5"),
            Some(Utc.timestamp_opt(1, 500_000_000).unwrap())
        );
        assert_eq!(
            parse_epoch("1.0000000019"),
            Some(Utc.timestamp_opt(1, 1).unwrap())
        );
        assert_eq!(parse_epoch("abc"), None);
        assert_eq!(parse_epoch("1.\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}"), None);
        assert_eq!(parse_epoch("1.\u{ff15}"), None);
    }

    #[test]
    fn test_capture_args() {
        let engine = TsharkCaptureEngine::new("tshark");
        let args = engine.capture_args(&InterfaceName::new("br-abcdef012345"), "tcp");
        let joined = args.join(" ");
        assert!(joined.starts_with("-l -n -i br-abcdef012345 -f tcp -Y http -T fields"));
        assert_eq!(args.iter().filter(|a| *a == "-e").count(), FIELDS.len());

        let engine = TsharkCaptureEngine::new("tshark").with_display_filter(None);
        let args = engine.capture_args(&InterfaceName::new("eth0"), "");
        assert!(!args.contains(&"-Y".to_string()));
        assert!(!args.contains(&"-f".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let mut engine = TsharkCaptureEngine::new("/nonexistent/tshark");
        assert!(engine.interfaces().is_err());
        let err = engine
            .start(&InterfaceName::new("eth0"), "tcp")
            .unwrap_err();
        assert!(matches!(err, CaptureError::StartFailed(_)));
        assert!(engine.stop().is_ok());
    }

    /// Executable stand-in for tshark: answers `-D` with a fixed inventory
    /// and runs `body` for a capture. `frames.txt` next to it holds one
    /// fields line.
    #[cfg(unix)]
    fn fake_tshark(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let line = fields_line(&[
            ("frame.number", "7"),
            ("frame.time_epoch", "1709294400.5"),
            ("frame.protocols", "eth:ethertype:ip:tcp:http"),
            ("ip.src", "172.18.0.2"),
            ("ip.dst", "172.18.0.3"),
            ("tcp.srcport", "40312"),
            ("tcp.dstport", "80"),
            ("http.request.method", "GET"),
            ("http.request.uri", "/"),
            ("http.request.version", "HTTP/1.1"),
        ]);
        let frames = dir.join("frames.txt");
        std::fs::write(&frames, format!("{line}\n")).unwrap();

        let script = dir.join("tshark");
        let text = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"-D\" ]; then\n\
             printf '1. eth0\\n2. br-abcdef012345 (bridge)\\n'\n\
             exit 0\n\
             fi\n\
             FRAMES='{}'\n\
             {body}\n",
            frames.display()
        );
        std::fs::write(&script, text).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    async fn next_event(rx: &mut mpsc::Receiver<FrameResult>) -> Option<FrameResult> {
        tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .expect("no event from tshark within 10s")
    }

    #[cfg(unix)]
    #[test]
    fn test_interfaces_from_program() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TsharkCaptureEngine::new(fake_tshark(dir.path(), "exit 0"));
        assert_eq!(engine.interfaces().unwrap(), vec!["eth0", "br-abcdef012345"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_delivers_frames_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = TsharkCaptureEngine::new(fake_tshark(dir.path(), "cat \"$FRAMES\"\nexit 0"));

        let mut rx = engine
            .start(&InterfaceName::new("br-abcdef012345"), "tcp")
            .unwrap();

        let frame = next_event(&mut rx).await.unwrap().unwrap();
        assert_eq!(frame.number, Some(7));
        assert_eq!(frame.layer("http").unwrap().get("request.uri"), Some("/"));
        assert!(next_event(&mut rx).await.is_none());
        assert!(engine.stop().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = "echo 'tshark: The capture session could not be initiated' >&2\nexit 2";
        let mut engine = TsharkCaptureEngine::new(fake_tshark(dir.path(), body));

        let mut rx = engine
            .start(&InterfaceName::new("br-abcdef012345"), "tcp")
            .unwrap();

        match next_event(&mut rx).await {
            Some(Err(CaptureError::Engine(message))) => {
                assert!(message.contains("could not be initiated"), "{message}");
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        assert!(next_event(&mut rx).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_ends_running_capture() {
        let dir = tempfile::tempdir().unwrap();
        let body = "cat \"$FRAMES\"\nexec sleep 60";
        let mut engine = TsharkCaptureEngine::new(fake_tshark(dir.path(), body));

        let mut rx = engine
            .start(&InterfaceName::new("br-abcdef012345"), "tcp")
            .unwrap();
        assert!(next_event(&mut rx).await.unwrap().is_ok());

        let again = engine.start(&InterfaceName::new("br-abcdef012345"), "tcp");
        assert!(matches!(again, Err(CaptureError::StartFailed(_))));

        engine.stop().unwrap();
        assert!(next_event(&mut rx).await.is_none());
    }
}
