use std::sync::{Mutex, OnceLock};

use ahash::AHashSet;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unimplemented wire type {0}")]
    UnknownWireType(u8),
    #[error("unknown geometry command {0}")]
    UnknownCommand(u32),
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("varint longer than 10 bytes")]
    VarintOverflow,
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("dependency request failed: {0}")]
    Dependency(String),
    #[error("tile fetch failed: {0}")]
    Fetch(String),
    #[error("tile load aborted")]
    Aborted,
    #[error("invalid geojson: {0}")]
    GeoJson(String),
    #[error("invalid style: {0}")]
    Style(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<futures::future::Aborted> for Error {
    fn from(_: futures::future::Aborted) -> Self {
        Error::Aborted
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn warned() -> &'static Mutex<AHashSet<String>> {
    static WARNED: OnceLock<Mutex<AHashSet<String>>> = OnceLock::new();
    WARNED.get_or_init(|| Mutex::new(AHashSet::new()))
}

/// Logs `message` at warn level the first time it is seen by this process.
/// Returns whether the message was emitted.
pub fn warn_once<S: Into<String>>(message: S) -> bool {
    let message = message.into();
    let Ok(mut warned) = warned().lock() else {
        return false;
    };

    if warned.contains(&message) {
        return false;
    }

    log::warn!("{message}");
    warned.insert(message);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_emits_a_message_once() {
        assert!(warn_once("warn_once test message"));
        assert!(!warn_once("warn_once test message"));
        assert!(warn_once(String::from("warn_once other message")));
    }
}
