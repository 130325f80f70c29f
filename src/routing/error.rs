use thiserror::Error;

/// Grouping misconfiguration, surfaced at topology build time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("stream {stream} routes to a stage with zero destination tasks")]
    NoDestinationTasks { stream: String },

    #[error("grouping key {field} is not a field of stream {stream}")]
    UnknownKeyField { stream: String, field: String },

    #[error("fields grouping requires at least one key field")]
    EmptyKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        assert_eq!(
            RoutingError::NoDestinationTasks {
                stream: "txStream".to_string(),
            }
            .to_string(),
            "stream txStream routes to a stage with zero destination tasks"
        );
        assert_eq!(
            RoutingError::UnknownKeyField {
                stream: "exchangeAggregation".to_string(),
                field: "account".to_string(),
            }
            .to_string(),
            "grouping key account is not a field of stream exchangeAggregation"
        );
        assert_eq!(
            RoutingError::EmptyKey.to_string(),
            "fields grouping requires at least one key field"
        );
    }
}
