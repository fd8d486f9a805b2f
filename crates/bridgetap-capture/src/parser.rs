//! Turns dissected frames into [`HttpPacket`] records.

use bridgetap_core::frame::{DissectedFrame, Layer};
use bridgetap_core::network::NetworkId;
use bridgetap_core::packet::{
    HttpHeaderMap, HttpPacket, HttpPacketKind, HttpRequestInfo, HttpResponseInfo,
};
use tracing::{debug, trace};

pub struct HttpPacketParser {
    network_id: NetworkId,
}

impl HttpPacketParser {
    pub fn new(network_id: NetworkId) -> Self {
        Self { network_id }
    }

    /// Parse one frame. Returns `None` for frames without HTTP content and for
    /// frames too malformed to build a packet from.
    pub fn parse(&self, frame: &DissectedFrame) -> Option<HttpPacket> {
        let http = frame.layer("http")?;
        let number = frame.number?;

        match self.build(frame, http, number) {
            Ok(Some(packet)) => Some(packet),
            Ok(None) => {
                trace!(frame = number, "http layer carries neither request nor response");
                None
            }
            Err(reason) => {
                debug!(frame = number, %reason, "dropping malformed http frame");
                None
            }
        }
    }

    fn build(
        &self,
        frame: &DissectedFrame,
        http: &Layer,
        number: u64,
    ) -> Result<Option<HttpPacket>, String> {
        let kind = if let Some(request) = parse_request(http) {
            HttpPacketKind::Request(request)
        } else if let Some(response) = parse_response(http)? {
            HttpPacketKind::Response(response)
        } else {
            return Ok(None);
        };

        let (source_ip, destination_ip) = ip_addresses(frame)?;
        let (source_port, destination_port) = ports(frame)?;

        Ok(Some(HttpPacket {
            number,
            network_id: self.network_id.to_string(),
            timestamp: frame.sniff_time,
            source_ip,
            source_port,
            destination_ip,
            destination_port,
            kind,
        }))
    }
}

fn parse_request(http: &Layer) -> Option<HttpRequestInfo> {
    let method = http.get("request.method")?;
    Some(HttpRequestInfo {
        version: field_string(http, "request.version"),
        uri: field_string(http, "request.uri"),
        method: method.to_string(),
        headers: parse_headers(http, "request.line"),
        payload: http.get("file_data").map(str::to_string),
    })
}

fn parse_response(http: &Layer) -> Result<Option<HttpResponseInfo>, String> {
    let Some(code) = http.get("response.code") else {
        return Ok(None);
    };
    let status_code = code
        .trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid status code {code:?}"))?;

    Ok(Some(HttpResponseInfo {
        version: field_string(http, "response.version"),
        status_code,
        status_code_description: field_string(http, "response.code.desc"),
        request_in: http.get("request_in").and_then(|v| v.trim().parse().ok()),
        duration: http.get("time").and_then(|v| v.trim().parse().ok()),
        headers: parse_headers(http, "response.line"),
        payload: http.get("file_data").map(str::to_string),
    }))
}

fn field_string(layer: &Layer, name: &str) -> String {
    layer.get(name).unwrap_or_default().to_string()
}

/// Build the header map from the request/response line fields.
pub(crate) fn parse_headers(http: &Layer, line_field: &str) -> HttpHeaderMap {
    http.all(line_field)
        .map(|field| {
            (
                strip_line_breaks(field.showname_key()),
                strip_line_breaks(field.showname_value()),
            )
        })
        .collect()
}

/// Remove escaped (`\r`, `\n` as text) and raw line breaks left by the engine's rendering.
pub(crate) fn strip_line_breaks(value: &str) -> String {
    value
        .replace("\\r", "")
        .replace("\\n", "")
        .replace(['\r', '\n'], "")
}

fn ip_addresses(frame: &DissectedFrame) -> Result<(String, String), String> {
    let ip = frame
        .layer("ip")
        .or_else(|| frame.layer("ipv6"))
        .ok_or("missing network layer")?;
    let src = ip.get("src").ok_or("missing source address")?;
    let dst = ip.get("dst").ok_or("missing destination address")?;
    Ok((src.to_string(), dst.to_string()))
}

fn ports(frame: &DissectedFrame) -> Result<(u16, u16), String> {
    let transport_name = frame
        .transport_layer
        .as_deref()
        .ok_or("no transport layer detected")?;
    let transport = frame
        .layer(transport_name)
        .ok_or_else(|| format!("missing {transport_name} layer"))?;
    Ok((port(transport, "srcport")?, port(transport, "dstport")?))
}

fn port(layer: &Layer, name: &str) -> Result<u16, String> {
    let raw = layer
        .get(name)
        .ok_or_else(|| format!("missing {}.{name}", layer.name))?;
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid {}.{name} {raw:?}", layer.name))
}
