use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier of a tuple within one topology run
pub type TupleId = u64;

/// A single typed field value carried by a tuple
///
/// Values cross the subprocess boundary as JSON, so the variants mirror the
/// JSON data model. Structured payloads (a full ledger transaction, a parsed
/// exchange) ride in the `Json` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    /// Get the value as a string slice if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if it is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Feed a stable encoding of this value into a hasher
    ///
    /// Used by keyed grouping; floats hash by bit pattern and structured
    /// values by their serialized form, so equal values always hash equal.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Self::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Self::Json(v) => {
                5u8.hash(state);
                v.to_string().hash(state);
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// Allocator for tuple ids, shared by every task of a topology run
#[derive(Debug, Default)]
pub struct TupleIds {
    next: AtomicU64,
}

impl TupleIds {
    /// Create a new allocator starting at id 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    pub fn next_id(&self) -> TupleId {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// An immutable, ordered sequence of typed fields flowing on a stream
///
/// Anchors are the ids of the root tuples this tuple is causally tied to;
/// a root tuple emitted by the source carries itself as sole anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    id: TupleId,
    stream: String,
    values: Vec<Value>,
    anchors: Vec<TupleId>,
}

impl Tuple {
    /// Create a root tuple, anchored to itself
    pub fn root(id: TupleId, stream: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            id,
            stream: stream.into(),
            values,
            anchors: vec![id],
        }
    }

    /// Create a tuple anchored to the given root ids
    pub fn anchored(
        id: TupleId,
        stream: impl Into<String>,
        values: Vec<Value>,
        anchors: Vec<TupleId>,
    ) -> Self {
        Self {
            id,
            stream: stream.into(),
            values,
            anchors,
        }
    }

    pub fn id(&self) -> TupleId {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get the field value at a schema position
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Root ids this tuple is causally tied to
    pub fn anchors(&self) -> &[TupleId] {
        &self.anchors
    }

    /// Whether this tuple was emitted directly by the source
    pub fn is_root(&self) -> bool {
        self.anchors.len() == 1 && self.anchors[0] == self.id
    }
}
