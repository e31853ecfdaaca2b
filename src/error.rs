//! Application-wide error types.
//!
//! Bootstrap-level failures live here. Each pipeline layer owns its own
//! domain error (`router::ParseError`, `lookup::LookupError`,
//! `render::RenderError`, `dispatch::DeliveryError`); this enum is what the
//! entry point and long-running components report upward.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn transport_error_display() {
        let e = AppError::Transport("stdin closed".into());
        assert!(e.to_string().contains("stdin closed"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        // satisfies std::error::Error trait
        let _: &dyn Error = &e;
    }
}
