use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered header mapping (name → value).
///
/// Keeps insertion order. Inserting a name that is already present replaces
/// the value in place, so the first position wins and the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaderMap(Vec<(String, String)>);

impl HttpHeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HttpHeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for HttpHeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HttpHeaderMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeaderVisitor;

        impl<'de> Visitor<'de> for HeaderVisitor {
            type Value = HttpHeaderMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut headers = HttpHeaderMap::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    headers.insert(k, v);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeaderVisitor)
    }
}

/// Request-direction fields of a captured HTTP packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestInfo {
    /// Protocol version, e.g. "HTTP/1.1".
    pub version: String,
    pub uri: String,
    pub method: String,
    pub headers: HttpHeaderMap,
    /// Body as rendered by the dissection engine.
    pub payload: Option<String>,
}

/// Response-direction fields of a captured HTTP packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseInfo {
    pub version: String,
    pub status_code: u16,
    /// Reason phrase, e.g. "OK".
    pub status_code_description: String,
    /// Frame number of the request this response answers.
    pub request_in: Option<u64>,
    /// Seconds between the request and this response.
    pub duration: Option<f64>,
    pub headers: HttpHeaderMap,
    pub payload: Option<String>,
}

/// Direction of a captured HTTP packet. A dissected frame carries exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpPacketKind {
    Request(HttpRequestInfo),
    Response(HttpResponseInfo),
}

/// One captured HTTP packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "HttpPacketRecord", try_from = "HttpPacketRecord")]
pub struct HttpPacket {
    /// Frame number assigned by the capture engine.
    pub number: u64,
    /// Network the packet was captured in.
    pub network_id: String,
    pub timestamp: DateTime<Utc>,

    // -- Endpoints --
    pub source_ip: String,
    pub source_port: u16,
    pub destination_ip: String,
    pub destination_port: u16,

    pub kind: HttpPacketKind,
}

impl HttpPacket {
    pub fn request(&self) -> Option<&HttpRequestInfo> {
        match &self.kind {
            HttpPacketKind::Request(r) => Some(r),
            HttpPacketKind::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponseInfo> {
        match &self.kind {
            HttpPacketKind::Response(r) => Some(r),
            HttpPacketKind::Request(_) => None,
        }
    }
}

impl fmt::Display for HttpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}:{} -> {}:{} ",
            self.number, self.source_ip, self.source_port, self.destination_ip, self.destination_port
        )?;
        match &self.kind {
            HttpPacketKind::Request(r) => write!(f, "{} {} {}", r.method, r.uri, r.version),
            HttpPacketKind::Response(r) => {
                write!(f, "{} {} {}", r.version, r.status_code, r.status_code_description)
            }
        }
    }
}

/// Wire shape of [`HttpPacket`]: both directions present as keys, the unused one `null`.
#[derive(Serialize, Deserialize)]
struct HttpPacketRecord {
    number: u64,
    network_id: String,
    timestamp: DateTime<Utc>,
    source_ip: String,
    source_port: u16,
    destination_ip: String,
    destination_port: u16,
    request: Option<HttpRequestInfo>,
    response: Option<HttpResponseInfo>,
}

impl From<HttpPacket> for HttpPacketRecord {
    fn from(p: HttpPacket) -> Self {
        let (request, response) = match p.kind {
            HttpPacketKind::Request(r) => (Some(r), None),
            HttpPacketKind::Response(r) => (None, Some(r)),
        };
        Self {
            number: p.number,
            network_id: p.network_id,
            timestamp: p.timestamp,
            source_ip: p.source_ip,
            source_port: p.source_port,
            destination_ip: p.destination_ip,
            destination_port: p.destination_port,
            request,
            response,
        }
    }
}

impl TryFrom<HttpPacketRecord> for HttpPacket {
    type Error = String;

    fn try_from(r: HttpPacketRecord) -> Result<Self, Self::Error> {
        let kind = match (r.request, r.response) {
            (Some(req), None) => HttpPacketKind::Request(req),
            (None, Some(res)) => HttpPacketKind::Response(res),
            (Some(_), Some(_)) => {
                return Err(format!("packet #{} has both request and response", r.number));
            }
            (None, None) => {
                return Err(format!("packet #{} has neither request nor response", r.number));
            }
        };
        Ok(Self {
            number: r.number,
            network_id: r.network_id,
            timestamp: r.timestamp,
            source_ip: r.source_ip,
            source_port: r.source_port,
            destination_ip: r.destination_ip,
            destination_port: r.destination_port,
            kind,
        })
    }
}
