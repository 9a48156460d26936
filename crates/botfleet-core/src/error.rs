//! Error types for Botfleet

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection failed for {handle}: {reason}")]
    ConnectFailed { handle: String, reason: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connect_failed(handle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            handle: handle.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failed_names_the_handle() {
        let e = Error::connect_failed("Alice", "refused");
        assert_eq!(e.to_string(), "connection failed for Alice: refused");
    }

    #[test]
    fn io_errors_convert() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(Error::IoError(_))));
    }
}
