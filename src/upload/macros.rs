//! Helper macros for the upload state machine modules.

/// Unwrap a `Result` inside a state's `run`, or end the upload by returning
/// the error as a `Done` event.
macro_rules! try_or_done {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => return Event::from(crate::error::Error::from(error)),
        }
    };
}
