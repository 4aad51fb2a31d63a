use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("no forwarding rule for chat {source_id}")]
    RuleNotFound { source_id: i64 },

    #[error("backup task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("circular forwarding rejected: {reason}")]
    CircularRule { reason: String },

    #[error("invalid rule option: {tag}")]
    InvalidOption { tag: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rule_not_found(source_id: i64) -> Self {
        Self::RuleNotFound { source_id }
    }

    #[must_use]
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    #[must_use]
    pub fn circular(reason: impl std::fmt::Display) -> Self {
        Self::CircularRule {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_option(tag: impl Into<String>) -> Self {
        Self::InvalidOption { tag: tag.into() }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// `true` for the "not found" family, which callers treat as a plain miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RuleNotFound { .. } | Self::TaskNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
