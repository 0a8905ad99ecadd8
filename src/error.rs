use chrono::NaiveDate;
use serde::{Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum CanteenError {
    #[error("The cutoff time ({cutoff}) for {date} has passed")]
    CutoffPassed { date: NaiveDate, cutoff: String },
    #[error("You've opted out of meals for {0}")]
    OptedOut(NaiveDate),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Only a {0} can do that")]
    Forbidden(&'static str),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Malformed data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    LockPoisoned,
    #[error("No async runtime available for the scheduler")]
    NoRuntime,
}

impl CanteenError {
    /// Errors the user caused and can act on, as opposed to storage faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CanteenError::CutoffPassed { .. }
                | CanteenError::OptedOut(_)
                | CanteenError::NotFound(_)
                | CanteenError::Forbidden(_)
                | CanteenError::InvalidInput(_)
        )
    }
}

// Front ends receive the message, not the variant.
impl Serialize for CanteenError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CanteenError>;
