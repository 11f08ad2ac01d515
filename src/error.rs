use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Type mismatch on '{attribute}': expected {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl SyncError {
    pub fn not_found_object(id: &str) -> Self {
        SyncError::NotFound(format!("object '{}'", id))
    }

    pub fn not_found_attribute(id: &str, name: &str) -> Self {
        SyncError::NotFound(format!("attribute '{}' on object '{}'", name, id))
    }

    /// Names the attribute a wire-level type mismatch belongs to.
    pub fn for_attribute(self, name: &str) -> Self {
        match self {
            SyncError::TypeMismatch { expected, actual, .. } => SyncError::TypeMismatch {
                attribute: name.to_string(),
                expected,
                actual,
            },
            other => other,
        }
    }

    /// Whether the error comes from a malformed payload rather than a missing entity.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            SyncError::Decode(_) | SyncError::Json(_) | SyncError::MsgPackDecode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
