use thiserror::Error;

/// Main error type for Lantern operations
#[derive(Debug, Error)]
pub enum LanternError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("The default room cannot be deleted")]
    DefaultRoomUndeletable,

    #[error("Invalid capacity {requested} (allowed range {min}-{max})")]
    InvalidCapacity {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame payload of {size} bytes exceeds limit of {max}")]
    OversizedFrame { size: usize, max: usize },

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Lantern operations
pub type Result<T> = std::result::Result<T, LanternError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LanternError::RoomNotFound("staging".to_string());
        assert_eq!(err.to_string(), "Room not found: staging");

        let err = LanternError::InvalidCapacity {
            requested: 10,
            min: 1_000,
            max: 1_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Invalid capacity 10 (allowed range 1000-1000000)"
        );

        assert_eq!(
            LanternError::AuthFailed.to_string(),
            "Authentication failed"
        );
        assert_eq!(
            LanternError::Serialization("bad json".to_string()).to_string(),
            "Serialization error: bad json"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: LanternError = io.into();
        assert!(matches!(err, LanternError::Io(_)));
    }

    #[test]
    fn test_all_error_variants() {
        // Every variant can be constructed
        let _ = LanternError::RoomNotFound("r".to_string());
        let _ = LanternError::DefaultRoomUndeletable;
        let _ = LanternError::InvalidCapacity {
            requested: 0,
            min: 1,
            max: 2,
        };
        let _ = LanternError::InvalidCommand("cmd".to_string());
        let _ = LanternError::Protocol("bad frame".to_string());
        let _ = LanternError::OversizedFrame { size: 2, max: 1 };
        let _ = LanternError::AuthFailed;
        let _ = LanternError::Serialization("err".to_string());
        let _ = LanternError::Io(std::io::Error::other("io"));
    }
}
