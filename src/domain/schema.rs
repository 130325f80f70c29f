use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::tuple::Value;

/// Declared schema of one output stream: a name plus its ordered field names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchema {
    name: String,
    fields: Vec<String>,
}

impl StreamSchema {
    /// Create a schema from a stream name and ordered field names
    pub fn new<N, F, I>(name: N, fields: I) -> Self
    where
        N: Into<String>,
        F: Into<String>,
        I: IntoIterator<Item = F>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Position of a field within the schema
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Check that a value list matches the declared field count
    pub fn check_arity(&self, values: &[Value]) -> Result<(), DomainError> {
        if values.len() == self.fields.len() {
            Ok(())
        } else {
            Err(DomainError::ArityMismatch {
                stream: self.name.clone(),
                expected: self.fields.len(),
                actual: values.len(),
            })
        }
    }
}
