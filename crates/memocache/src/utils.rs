use std::any::Any;

/// Extracts a readable message from a panic payload.
///
/// `panic!` with a literal produces a `&'static str` payload, formatted panics a `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
