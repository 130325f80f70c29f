pub mod error;
pub mod schema;
pub mod tuple;

// Re-export commonly used types
pub use error::DomainError;
pub use schema::StreamSchema;
pub use tuple::{Tuple, TupleId, TupleIds, Value};
