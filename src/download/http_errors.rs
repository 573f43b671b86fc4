use std::fmt;

/// Coarse classification of a failed HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorCategory {
    Network,
    Client,
    Server,
    Auth,
    RateLimit,
}

/// A non-success HTTP status, enriched with a hint for the person retrying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorInfo {
    pub status_code: Option<u16>,
    pub category: HttpErrorCategory,
    pub description: String,
    pub hint: &'static str,
    pub is_retryable: bool,
}

impl HttpErrorInfo {
    pub fn from_status(status: u16) -> Self {
        use HttpErrorCategory::*;

        let (category, description, hint, is_retryable) = match status {
            400 => (Client, "Bad Request".to_string(), "Check the download URL.", false),
            401 => (Auth, "Unauthorized".to_string(), "Pass an Authorization header with the request.", false),
            403 => (Auth, "Forbidden".to_string(), "The recording is not shared with this account.", false),
            404 => (Client, "Not Found".to_string(), "The file no longer exists at this URL.", false),
            410 => (Client, "Gone".to_string(), "The file has been permanently removed.", false),
            429 => (RateLimit, "Too Many Requests".to_string(), "Rate limited. Wait, then retry.", true),
            500 => (Server, "Internal Server Error".to_string(), "Server-side issue. Retry may succeed.", true),
            502 => (Server, "Bad Gateway".to_string(), "Upstream connection issue. Retry may succeed.", true),
            503 => (Server, "Service Unavailable".to_string(), "Server temporarily unavailable. Retry later.", true),
            504 => (Server, "Gateway Timeout".to_string(), "Upstream timed out. Retry may succeed.", true),
            400..=499 => (Client, format!("Client Error ({})", status), "Check the request details and URL.", false),
            500.. => (Server, format!("Server Error ({})", status), "Server-side issue. Retry may help.", true),
            _ => (Client, format!("Unexpected Status ({})", status), "Check logs for details.", false),
        };

        Self {
            status_code: Some(status),
            category,
            description,
            hint,
            is_retryable,
        }
    }

    /// Connection-level failure, no status line was received
    pub fn network(message: &str) -> Self {
        Self {
            status_code: None,
            category: HttpErrorCategory::Network,
            description: format!("Network Error: {}", message),
            hint: "Check network connectivity.",
            is_retryable: true,
        }
    }
}

impl fmt::Display for HttpErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "HTTP {} - {}", code, self.description),
            None => f.write_str(&self.description),
        }
    }
}
