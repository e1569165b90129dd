// Consistent exit codes for the warden CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = service unreachable
//   12 = conflict (lease held, task not owned)
//   13 = network error

use std::process;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Unreachable = 10,
    Conflict = 12,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain
    /// and, failing that, the rendered message.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(http_code) = cause.downcast_ref::<HttpStatusError>() {
                return Self::from_http_code(http_code.code.as_str());
            }
            if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
                if reqwest_err.is_timeout() {
                    return Self::Network;
                }
                if reqwest_err.is_connect() {
                    return Self::Unreachable;
                }
            }
        }

        let msg = format!("{err:#}").to_ascii_lowercase();
        if msg.contains("connection refused") || msg.contains("error sending request") {
            return Self::Unreachable;
        }
        if msg.contains("timed out") || msg.contains("timeout") {
            return Self::Network;
        }
        if msg.contains("conflict") {
            return Self::Conflict;
        }

        Self::Error
    }

    /// Map a service error-envelope `code` field to an exit code.
    pub fn from_http_code(code: &str) -> Self {
        match code {
            "conflict" => Self::Conflict,
            "validation_failed" => Self::Usage,
            _ => Self::Error,
        }
    }

    pub fn exit(self) -> ! {
        process::exit(self.code())
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// A typed service error carried in an `anyhow::Error` chain, built from the
/// `{"error": {"code", "message", "retryable"}}` envelope every HTTP service
/// here returns on non-2xx responses.
#[derive(Debug)]
pub struct HttpStatusError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HttpStatusError {}
