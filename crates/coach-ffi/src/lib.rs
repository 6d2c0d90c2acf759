//! C ABI around [`InferenceFacade`](coach_session::InferenceFacade).
//!
//! Every function returns a [`CoachStatus`]; on failure the message is
//! available from `coach_last_error` on the calling thread. Strings handed
//! out must be released with `coach_free_string`.

mod error;
mod runtime;
mod types;

pub use error::*;
pub use runtime::CoachRuntime;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use coach_session::InferenceError;

/// Runs `f`, turning a panic into `CoachStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> CoachStatus>(f: F) -> CoachStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic");
            CoachStatus::ErrorInternal
        }
    }
}

fn fail(e: &InferenceError) -> CoachStatus {
    set_last_error(e.to_string());
    CoachStatus::from(e)
}

/// Reads a NUL-terminated UTF-8 argument.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, CoachStatus> {
    if ptr.is_null() {
        set_last_error(format!("{what} is null"));
        return Err(CoachStatus::ErrorInvalidArgument);
    }
    CStr::from_ptr(ptr).to_str().map_err(|e| {
        set_last_error(format!("{what} is not valid UTF-8: {e}"));
        CoachStatus::ErrorInvalidArgument
    })
}

unsafe fn runtime_arg<'a>(rt: *const CoachRuntime) -> Result<&'a CoachRuntime, CoachStatus> {
    rt.as_ref().ok_or_else(|| {
        set_last_error("runtime is null");
        CoachStatus::ErrorInvalidArgument
    })
}

/// Creates a runtime that looks for the model in `model_dir`.
///
/// A null `model_dir` falls back to `COACH_MODEL_DIR` or the default. The
/// model is not loaded until `coach_load` or the first `coach_generate`.
///
/// # Safety
/// `model_dir` must be null or a valid C string; `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn coach_runtime_create(
    model_dir: *const c_char,
    out: *mut *mut CoachRuntime,
) -> CoachStatus {
    catch_panic(|| {
        if out.is_null() {
            set_last_error("out is null");
            return CoachStatus::ErrorInvalidArgument;
        }
        let dir = if model_dir.is_null() {
            None
        } else {
            match str_arg(model_dir, "model_dir") {
                Ok(s) => Some(PathBuf::from(s)),
                Err(status) => return status,
            }
        };

        match CoachRuntime::new(dir) {
            Ok(rt) => {
                *out = Box::into_raw(Box::new(rt));
                CoachStatus::Ok
            }
            Err(e) => {
                set_last_error(format!("failed to start inference worker: {e}"));
                CoachStatus::ErrorInternal
            }
        }
    })
}

/// Destroys a runtime, cancelling any generation and releasing the model.
/// Null is a no-op.
///
/// # Safety
/// `rt` must come from `coach_runtime_create` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn coach_runtime_destroy(rt: *mut CoachRuntime) -> CoachStatus {
    if rt.is_null() {
        return CoachStatus::Ok;
    }
    catch_panic(|| {
        drop(Box::from_raw(rt));
        CoachStatus::Ok
    })
}

/// Loads the model if it is not loaded yet. Blocks until done.
///
/// # Safety
/// `rt` must be a live runtime.
#[no_mangle]
pub unsafe extern "C" fn coach_load(rt: *const CoachRuntime) -> CoachStatus {
    catch_panic(|| {
        let rt = match runtime_arg(rt) {
            Ok(rt) => rt,
            Err(status) => return status,
        };
        match rt.runtime.block_on(rt.facade.load_if_needed()) {
            Ok(()) => {
                clear_last_error();
                CoachStatus::Ok
            }
            Err(e) => fail(&e),
        }
    })
}

/// Generates a coaching reply for `user` given the health `context` block.
/// Blocks until the reply is complete; concurrent calls queue.
///
/// On success `*out_text` receives a string to free with `coach_free_string`.
/// Replies cut short by the token limit or the time limit still succeed.
///
/// # Safety
/// `rt` must be a live runtime, `user` a valid C string, `context` null or a
/// valid C string, and `out_text` writable.
#[no_mangle]
pub unsafe extern "C" fn coach_generate(
    rt: *const CoachRuntime,
    user: *const c_char,
    context: *const c_char,
    out_text: *mut *mut c_char,
) -> CoachStatus {
    catch_panic(|| {
        if out_text.is_null() {
            set_last_error("out_text is null");
            return CoachStatus::ErrorInvalidArgument;
        }
        let rt = match runtime_arg(rt) {
            Ok(rt) => rt,
            Err(status) => return status,
        };
        let user = match str_arg(user, "user") {
            Ok(s) => s,
            Err(status) => return status,
        };
        let context = if context.is_null() {
            ""
        } else {
            match str_arg(context, "context") {
                Ok(s) => s,
                Err(status) => return status,
            }
        };

        let generation = match rt.runtime.block_on(rt.facade.generate(user, context)) {
            Ok(g) => g,
            Err(e) => return fail(&e),
        };
        match CString::new(generation.text) {
            Ok(c) => {
                *out_text = c.into_raw();
                CoachStatus::Ok
            }
            Err(e) => {
                set_last_error(format!("reply contains NUL: {e}"));
                CoachStatus::ErrorGenerate
            }
        }
    })
}

/// Cancels the generation in flight, if any. Safe from any thread.
///
/// # Safety
/// `rt` must be a live runtime.
#[no_mangle]
pub unsafe extern "C" fn coach_cancel(rt: *const CoachRuntime) -> CoachStatus {
    catch_panic(|| match runtime_arg(rt) {
        Ok(rt) => {
            rt.facade.cancel();
            CoachStatus::Ok
        }
        Err(status) => status,
    })
}

/// Writes the current published state into `*out`.
///
/// # Safety
/// `rt` must be a live runtime and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn coach_status(rt: *const CoachRuntime, out: *mut CoachRuntimeStatus) -> CoachStatus {
    catch_panic(|| {
        if out.is_null() {
            set_last_error("out is null");
            return CoachStatus::ErrorInvalidArgument;
        }
        match runtime_arg(rt) {
            Ok(rt) => {
                *out = CoachRuntimeStatus::from(&rt.facade.status());
                CoachStatus::Ok
            }
            Err(status) => status,
        }
    })
}

/// Takes the last error message of the calling thread, or null.
/// Free it with `coach_free_string`.
#[no_mangle]
pub extern "C" fn coach_last_error() -> *mut c_char {
    match take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Frees a string returned by `coach_generate` or `coach_last_error`.
///
/// # Safety
/// `s` must be null or a pointer obtained from this library, freed once.
#[no_mangle]
pub unsafe extern "C" fn coach_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe fn last_error() -> Option<String> {
        let p = coach_last_error();
        if p.is_null() {
            return None;
        }
        let s = CStr::from_ptr(p).to_string_lossy().into_owned();
        coach_free_string(p);
        Some(s)
    }

    fn create(dir: &std::path::Path) -> *mut CoachRuntime {
        let dir = CString::new(dir.to_str().unwrap()).unwrap();
        let mut rt = ptr::null_mut();
        let status = unsafe { coach_runtime_create(dir.as_ptr(), &mut rt) };
        assert_eq!(status, CoachStatus::Ok);
        assert!(!rt.is_null());
        rt
    }

    #[test]
    fn test_null_arguments_are_rejected() {
        unsafe {
            assert_eq!(coach_runtime_create(ptr::null(), ptr::null_mut()), CoachStatus::ErrorInvalidArgument);
            assert_eq!(last_error().as_deref(), Some("out is null"));

            assert_eq!(coach_load(ptr::null()), CoachStatus::ErrorInvalidArgument);
            assert_eq!(coach_cancel(ptr::null()), CoachStatus::ErrorInvalidArgument);
            assert_eq!(coach_runtime_destroy(ptr::null_mut()), CoachStatus::Ok);
            coach_free_string(ptr::null_mut());
        }
    }

    #[test]
    fn test_missing_model_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let rt = create(dir.path());
        unsafe {
            assert_eq!(coach_load(rt), CoachStatus::ErrorModelNotFound);
            let msg = last_error().unwrap();
            assert!(msg.starts_with("model artifact not found"));
            assert!(last_error().is_none());

            let user = CString::new("How did I sleep?").unwrap();
            let mut text = ptr::null_mut();
            assert_eq!(
                coach_generate(rt, user.as_ptr(), ptr::null(), &mut text),
                CoachStatus::ErrorModelNotFound
            );
            assert!(text.is_null());

            let mut status = CoachRuntimeStatus::default();
            assert_eq!(coach_status(rt, &mut status), CoachStatus::Ok);
            assert!(!status.is_model_loaded);
            assert!(!status.is_generating);
            assert!(status.has_error);

            assert_eq!(coach_cancel(rt), CoachStatus::Ok);
            assert_eq!(coach_runtime_destroy(rt), CoachStatus::Ok);
        }
    }

    #[test]
    fn test_generate_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let rt = create(dir.path());
        let bad = [0xffu8, 0xfe, 0x00];
        let mut text = ptr::null_mut();
        unsafe {
            assert_eq!(
                coach_generate(rt, bad.as_ptr() as *const c_char, ptr::null(), &mut text),
                CoachStatus::ErrorInvalidArgument
            );
            assert!(last_error().unwrap().contains("user"));
            coach_runtime_destroy(rt);
        }
    }

    #[test]
    fn test_status_codes_follow_errors() {
        assert_eq!(CoachStatus::from(&InferenceError::Busy), CoachStatus::ErrorBusy);
        assert_eq!(CoachStatus::from(&InferenceError::Cancelled), CoachStatus::ErrorCancelled);
        assert_eq!(
            CoachStatus::from(&InferenceError::ContextOverflow { needed: 3, budget: 2 }),
            CoachStatus::ErrorGenerate
        );
        assert_eq!(
            CoachStatus::from(&InferenceError::ContextCreate("oom".into())),
            CoachStatus::ErrorModelLoad
        );
    }
}
