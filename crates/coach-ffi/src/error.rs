use std::cell::RefCell;
use std::ffi::CString;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Records the message `coach_last_error` hands out on this thread.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    tracing::debug!(error = %msg, "ffi call failed");
    LAST_ERROR.with(|e| {
        // Interior NULs cannot cross the boundary; drop them rather than the message.
        *e.borrow_mut() = CString::new(msg.replace('\0', "")).ok();
    });
}

/// Takes the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}
