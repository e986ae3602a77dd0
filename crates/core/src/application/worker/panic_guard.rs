// Panic isolation for worker safety
//
// Task bodies run in their own tokio task; a panic surfaces as a JoinError
// and is recorded as a PANIC failure instead of killing the slot.
use std::any::Any;

/// Best-effort text of a panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
