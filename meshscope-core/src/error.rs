use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("routing optimization needs at least one node, got an empty graph")]
    EmptyGraph,
    #[error("{kind} '{id}' not found in the current snapshot")]
    NotFound { kind: &'static str, id: String },
    #[error("malformed input for {device}: {reason}")]
    MalformedInput { device: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
