use std::hash::{DefaultHasher, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::error::RoutingError;
use crate::domain::{StreamSchema, Tuple, Value};

/// Declarative routing strategy for one topology edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grouping {
    /// Round-robin across destination tasks; no tuple-content dependency
    Shuffle,

    /// Keyed: hash of the named fields modulo destination task count.
    /// All tuples with identical key values land on the same task instance,
    /// which is what stateful per-key aggregation relies on.
    Fields(Vec<String>),
}

impl Grouping {
    /// Convenience constructor for a keyed grouping
    pub fn fields<F, I>(keys: I) -> Self
    where
        F: Into<String>,
        I: IntoIterator<Item = F>,
    {
        Self::Fields(keys.into_iter().map(Into::into).collect())
    }

    /// Resolve this grouping against the stream schema and destination task
    /// count, producing the routing function used on the hot path.
    ///
    /// All misconfiguration (zero tasks, unknown or empty key fields) is
    /// rejected here, at build time; `TaskSelector::select` cannot fail.
    pub fn compile(
        &self,
        schema: &StreamSchema,
        task_count: usize,
    ) -> Result<TaskSelector, RoutingError> {
        if task_count == 0 {
            return Err(RoutingError::NoDestinationTasks {
                stream: schema.name().to_string(),
            });
        }

        let kind = match self {
            Self::Shuffle => SelectorKind::Shuffle {
                cursor: AtomicUsize::new(0),
            },
            Self::Fields(keys) => {
                if keys.is_empty() {
                    return Err(RoutingError::EmptyKey);
                }
                let key_indices = keys
                    .iter()
                    .map(|key| {
                        schema
                            .field_index(key)
                            .ok_or_else(|| RoutingError::UnknownKeyField {
                                stream: schema.name().to_string(),
                                field: key.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                SelectorKind::Fields { key_indices }
            }
        };

        Ok(TaskSelector { task_count, kind })
    }
}

/// Compiled routing function for one edge: tuple -> destination task index
#[derive(Debug)]
pub struct TaskSelector {
    task_count: usize,
    kind: SelectorKind,
}

#[derive(Debug)]
enum SelectorKind {
    Shuffle { cursor: AtomicUsize },
    Fields { key_indices: Vec<usize> },
}

impl TaskSelector {
    /// Pick the destination task index in `[0, task_count)` for a tuple
    pub fn select(&self, tuple: &Tuple) -> usize {
        match &self.kind {
            SelectorKind::Shuffle { cursor } => {
                cursor.fetch_add(1, Ordering::Relaxed) % self.task_count
            }
            SelectorKind::Fields { key_indices } => {
                let mut hasher = DefaultHasher::new();
                for &index in key_indices {
                    match tuple.value(index) {
                        Some(value) => value.hash_into(&mut hasher),
                        // Arity is checked at emission; a short tuple still
                        // routes deterministically.
                        None => Value::Null.hash_into(&mut hasher),
                    }
                }
                (hasher.finish() % self.task_count as u64) as usize
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }
}
