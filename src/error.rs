use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("message already recalled")]
    AlreadyRecalled,

    #[error("not a group conversation")]
    NotGroupConversation,

    #[error("user is already a member")]
    AlreadyMember,

    #[error("message body is empty")]
    EmptyMessage,

    #[error("message too long ({length} chars, max {max})")]
    MessageTooLong { length: usize, max: usize },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl AppError {
    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Storage(msg) => {
                msg.contains("PoolTimedOut") || msg.contains("PoolClosed") || msg.contains("Io")
            }
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_)
            | AppError::EmptyMessage
            | AppError::MessageTooLong { .. }
            | AppError::NotGroupConversation => 400,
            AppError::Unauthorized => 401,
            AppError::NotParticipant => 403,
            AppError::NotFound => 404,
            AppError::AlreadyMember => 409,
            AppError::AlreadyRecalled => 410, // 410 Gone
            AppError::Config(_) | AppError::Storage(_) => 500,
        }
    }

    /// Query surfaces must not reveal whether a conversation exists to users
    /// outside it: a failed participant check reads the same as an absent id.
    pub fn masked(self) -> Self {
        match self {
            AppError::NotParticipant => AppError::NotFound,
            other => other,
        }
    }

    /// Stable message for presentation layers. Storage causes stay in the
    /// `Display` output for logs; callers only ever see the generic text.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::Storage(_) => "internal error",
            AppError::BadRequest(_) => "bad request",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound | AppError::NotParticipant => "not found",
            AppError::AlreadyRecalled => "message already recalled",
            AppError::NotGroupConversation => "not a group conversation",
            AppError::AlreadyMember => "user is already a member",
            AppError::EmptyMessage => "message body is empty",
            AppError::MessageTooLong { .. } => "message too long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recall_conflict_maps_to_gone() {
        assert_eq!(AppError::AlreadyRecalled.status_code(), 410);
    }

    #[test]
    fn membership_failures_collapse_to_not_found() {
        assert_eq!(AppError::NotParticipant.masked(), AppError::NotFound);
        assert_eq!(AppError::NotFound.masked(), AppError::NotFound);
        assert_eq!(
            AppError::NotParticipant.public_message(),
            AppError::NotFound.public_message()
        );
    }

    #[test]
    fn storage_cause_is_not_user_visible() {
        let err = AppError::Storage("insert msg: connection reset".into());
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn pool_timeouts_are_retryable() {
        assert!(AppError::Storage("PoolTimedOut".into()).is_retryable());
        assert!(!AppError::NotFound.is_retryable());
    }
}
