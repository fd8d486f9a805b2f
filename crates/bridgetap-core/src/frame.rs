//! Dissected frames as delivered by a capture engine.
//!
//! A frame is already decoded into named protocol layers; the types here only
//! carry what the engine produced and offer lookups over it.

use chrono::{DateTime, Utc};

/// A single dissected field inside a protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name relative to its layer, e.g. `request.method`.
    pub name: String,
    /// Value as shown by the engine.
    pub show: String,
    /// Human-readable rendering, e.g. `Host: example.com\r\n`.
    pub showname: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, show: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            show: show.into(),
            showname: None,
        }
    }

    pub fn with_showname(mut self, showname: impl Into<String>) -> Self {
        self.showname = Some(showname.into());
        self
    }

    fn display(&self) -> &str {
        self.showname.as_deref().unwrap_or(&self.show)
    }

    /// Text before the first `:` of the display string.
    pub fn showname_key(&self) -> &str {
        let display = self.display();
        display.split_once(':').map_or(display, |(k, _)| k)
    }

    /// Text after the first `: ` of the display string (empty if there is none).
    pub fn showname_value(&self) -> &str {
        self.display()
            .split_once(": ")
            .map_or("", |(_, v)| v)
    }
}

/// One protocol layer (`ip`, `tcp`, `http`, ...) with its fields in dissection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Shown value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.show.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Every occurrence of `name`, in order.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.name == name)
    }
}

/// A frame decoded into protocol layers by the capture engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DissectedFrame {
    /// Frame number within the capture, if the engine reported one.
    pub number: Option<u64>,
    pub sniff_time: DateTime<Utc>,
    /// Name of the transport layer the engine detected (`tcp`, `udp`).
    pub transport_layer: Option<String>,
    pub layers: Vec<Layer>,
}

impl DissectedFrame {
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }
}
