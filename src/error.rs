//! Unified error handling for the itinerary map library.
//!
//! Lower-level pieces (engine surface calls, fetchers, config parsing) return
//! [`Result`]. The [`MapController`](crate::MapController) never lets one of
//! these escape to the host: it logs them and keeps the last good state.

use thiserror::Error;

/// Unified error type for itinerary map operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    /// No rendering-engine access credential configured
    #[error("Map access token is not configured")]
    MissingAccessToken,

    /// The rendering engine rejected an operation
    #[error("Engine error: {message}")]
    Engine { message: String },

    /// HTTP/network failure while fetching an overlay
    #[error("{}", http_message(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Overlay document could not be parsed or held no path
    #[error("Overlay parse error: {message}")]
    OverlayParse { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MapError {
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        MapError::Engine {
            message: message.into(),
        }
    }

    pub(crate) fn overlay_parse(message: impl Into<String>) -> Self {
        MapError::OverlayParse {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MapError {
    fn from(e: serde_json::Error) -> Self {
        MapError::Config {
            message: e.to_string(),
        }
    }
}

fn http_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

/// Result type alias for itinerary map operations.
pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MapError::engine("source 'itinerary-route' is in use");
        assert_eq!(err.to_string(), "Engine error: source 'itinerary-route' is in use");

        let err: MapError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_http_error_display() {
        let with_code = MapError::Http {
            message: "Not Found".to_string(),
            status_code: Some(404),
        };
        assert_eq!(with_code.to_string(), "HTTP error (404): Not Found");

        let without = MapError::Http {
            message: "connection refused".to_string(),
            status_code: None,
        };
        assert_eq!(without.to_string(), "HTTP error: connection refused");
    }
}
