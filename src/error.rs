use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {}", .message.as_deref().unwrap_or("no message"))]
    Api { status: u16, message: Option<String> },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Not logged in. Run `rollcall login` first")]
    NotLoggedIn,

    #[error("Too many failed login attempts. Try again after {until}")]
    LockedOut { until: DateTime<Utc> },

    #[error("Your role is not allowed to {0}")]
    Forbidden(&'static str),

    #[error("Please select an event first")]
    NoEventSelected,

    #[error("No rows selected")]
    EmptySelection,

    #[error("Tick the confirmation checkbox before continuing")]
    NotAcknowledged,

    #[error("This action is only available on the {0} table")]
    WrongTable(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Text for a user-facing notice: the server's message when it sent one,
    /// otherwise `fallback`. Client-side failures keep their own wording.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Error::Api {
                message: Some(m), ..
            } if !m.is_empty() => m.clone(),
            Error::Api { .. } | Error::Http(_) | Error::Json(_) => fallback.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_wins_over_fallback() {
        let err = Error::Api {
            status: 409,
            message: Some("Student ID already exists".into()),
        };
        assert_eq!(err.user_message("Failed to add student"), "Student ID already exists");
    }

    #[test]
    fn fallback_used_without_server_message() {
        let err = Error::Api {
            status: 500,
            message: None,
        };
        assert_eq!(err.user_message("Failed to add student"), "Failed to add student");
    }

    #[test]
    fn client_side_errors_keep_their_text() {
        assert_eq!(
            Error::NoEventSelected.user_message("ignored"),
            "Please select an event first"
        );
    }
}
