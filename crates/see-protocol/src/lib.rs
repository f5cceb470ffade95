// see-protocol: visualizer wire protocol, envelopes and batch framing.
//
// Every message on every transport is an `Envelope`: a JSON object selected
// by its `action` field. Transports carry batches (JSON arrays of envelopes),
// newline-terminated on line-delimited streams. Unknown envelope keys are
// preserved through a decode/encode round-trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Property and action names
// ---------------------------------------------------------------------------

/// Recognized envelope property names.
pub mod props {
    pub const ACTION: &str = "action";
    pub const OBJECT: &str = "object";
    pub const VALUE: &str = "value";
    pub const DATA: &str = "data";
    pub const ID: &str = "id";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Recognized `action` values.
pub mod actions {
    pub const RESET: &str = "reset";
    pub const OBJECT: &str = "object";
    pub const DATA: &str = "data";
    pub const ASSET: &str = "asset";
    pub const REMOVE: &str = "remove";
}

/// Content type stored for assets that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A visualized-world object: arbitrary JSON fields keyed by a string `id`.
///
/// Identity is the `id` field; updates replace the whole object (no merge).
pub type Object = Map<String, Value>;

/// Returns the object's `id` field, if it is a string.
pub fn object_id(obj: &Object) -> Option<&str> {
    obj.get(props::ID).and_then(Value::as_str)
}

/// A batch of envelopes as framed on the wire.
pub type Batch = Vec<Envelope>;

/// The universal message: a JSON object with an `action` field and
/// action-specific companions. Keys this crate does not recognize pass
/// through a round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(pub Map<String, Value>);

impl Envelope {
    /// Builds an `object` envelope carrying `obj` (used for connect replay
    /// and translator refreshes).
    pub fn for_object(obj: Object) -> Self {
        let mut map = Map::new();
        map.insert(props::ACTION.to_owned(), Value::from(actions::OBJECT));
        map.insert(props::OBJECT.to_owned(), Value::Object(obj));
        Envelope(map)
    }

    /// Builds a `data` envelope carrying a stored data value.
    pub fn for_data_value(id: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(props::ACTION.to_owned(), Value::from(actions::DATA));
        map.insert(props::ID.to_owned(), Value::from(id));
        map.insert(props::VALUE.to_owned(), value);
        Envelope(map)
    }

    /// Builds a `remove` envelope for the given id.
    pub fn for_remove(id: &str) -> Self {
        let mut map = Map::new();
        map.insert(props::ACTION.to_owned(), Value::from(actions::REMOVE));
        map.insert(props::ID.to_owned(), Value::from(id));
        Envelope(map)
    }

    pub fn action(&self) -> Option<&str> {
        self.0.get(props::ACTION).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(props::ID).and_then(Value::as_str)
    }

    /// The `object` payload, when present and actually an object.
    pub fn object(&self) -> Option<&Object> {
        self.0.get(props::OBJECT).and_then(Value::as_object)
    }

    /// The opaque `value` payload. May be any JSON fragment, including
    /// `null`, so presence is distinct from JSON nullness.
    pub fn value(&self) -> Option<&Value> {
        self.0.get(props::VALUE)
    }

    /// The asset `data` string, as-is. Producers and consumers must agree on
    /// the byte encoding; this crate never transforms it.
    pub fn data(&self) -> Option<&str> {
        self.0.get(props::DATA).and_then(Value::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.0.get(props::CONTENT_TYPE).and_then(Value::as_str)
    }

    /// Descends nested objects following `keys`. Returns `None` when the
    /// path leaves the object tree or `keys` is empty.
    pub fn by_keys(&self, keys: &[String]) -> Option<&Value> {
        let (first, rest) = keys.split_first()?;
        let mut current = self.0.get(first)?;
        for key in rest {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    /// Encodes this envelope alone (log lines, diagnostics). Batches on the
    /// wire always go through [`encode_batch`].
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }
}

// ---------------------------------------------------------------------------
// Batch encoding
// ---------------------------------------------------------------------------

/// Encodes a batch as one JSON array. A single envelope still gets the full
/// array form; line-delimited transports append the newline themselves.
pub fn encode_batch(batch: &[Envelope]) -> Result<String, serde_json::Error> {
    serde_json::to_string(batch)
}

// ---------------------------------------------------------------------------
// Batch decoding
// ---------------------------------------------------------------------------

/// Why a buffer failed to decode.
///
/// `Truncated` is only reported once the caller knows no more input is
/// coming; before that, an incomplete array simply means "feed more".
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message batch: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("input ended inside a message batch")]
    Truncated,
}

/// Decodes every batch in a complete buffer.
///
/// Concatenated arrays with no separator are supported; whitespace (including
/// the optional trailing newline) between and after arrays is skipped. A
/// buffer that ends mid-array is `Truncated`.
pub fn decode_batches(bytes: &[u8]) -> Result<Vec<Batch>, DecodeError> {
    let mut batches = Vec::new();
    let stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Batch>();
    for item in stream {
        match item {
            Ok(batch) => batches.push(batch),
            Err(e) if e.is_eof() => return Err(DecodeError::Truncated),
            Err(e) => return Err(DecodeError::Malformed(e)),
        }
    }
    Ok(batches)
}

/// Incremental batch decoder for stream transports.
///
/// Feed reader chunks in as they arrive and drain complete batches out; an
/// array split across reads is held until its closing bracket shows up.
#[derive(Debug, Default)]
pub struct BatchDecoder {
    buf: Vec<u8>,
}

impl BatchDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls the next complete batch out of the buffer.
    ///
    /// `Ok(None)` means more input is needed. On `Malformed` the offending
    /// bytes stay buffered; call [`resync`](Self::resync) to skip past them
    /// before decoding further.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, DecodeError> {
        self.skip_whitespace();
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Batch>();
        match stream.next() {
            Some(Ok(batch)) => {
                let consumed = stream.byte_offset();
                self.buf.drain(..consumed);
                Ok(Some(batch))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(DecodeError::Malformed(e)),
            None => Ok(None),
        }
    }

    /// Drops buffered bytes through the next newline so a line-delimited
    /// stream can continue past one malformed batch. Without a newline the
    /// whole buffer is dropped.
    pub fn resync(&mut self) {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.buf.drain(..=pos);
            }
            None => self.buf.clear(),
        }
    }

    /// Call at reader EOF: leftover bytes mean the stream died mid-batch,
    /// which is malformed input, not a clean end.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(DecodeError::Truncated)
        }
    }

    fn skip_whitespace(&mut self) {
        let start = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        if start > 0 {
            self.buf.drain(..start);
        }
    }
}
