//! C ABI over the tracepack runtime.
//!
//! Every entry point returns an integer status (0 success, negative
//! failure) or a nullable pointer, and writes the failure message to a
//! thread-local slot readable through [`tracepack_get_error_message`]. The
//! slot's content after a successful call is undefined. Panics are caught
//! at the boundary and reported like any other failure.
//!
//! The platform loader is discovered through
//! [`tracepack::loader::register_backend`]; adapters must install a backend
//! before the first `tracepack_open_*` call.

use std::cell::RefCell;
use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use libc::{c_char, c_int, c_void, size_t};
use log::warn;

use tracepack::loader::default_backend;
use tracepack::{ArgOutcome, BpfSkeleton, Error, ExportFormat, PollingHandle};

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

fn set_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Opaque skeleton handle.
pub struct TracepackSkel {
    inner: Arc<BpfSkeleton>,
}

/// Opaque polling handle.
pub struct TracepackPollingHandle {
    inner: PollingHandle,
}

/// Event handler: `(ctx, bytes, length)`. The byte buffer is only valid for
/// the duration of the call and is not NUL terminated.
pub type TracepackEventHandler =
    unsafe extern "C" fn(ctx: *mut c_void, data: *const c_char, size: size_t);

unsafe fn cstr_arg<'a>(ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        set_error(format!("{what} is null"));
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(text) => Some(text),
        Err(_) => {
            set_error(format!("{what} is not valid UTF-8"));
            None
        }
    }
}

unsafe fn argv_to_vec(args: *const *const c_char, argc: c_int) -> Option<Vec<String>> {
    if args.is_null() || argc <= 0 {
        set_error("argument vector is empty");
        return None;
    }
    let mut out = Vec::with_capacity(argc as usize);
    for i in 0..argc as usize {
        let entry = *args.add(i);
        out.push(cstr_arg(entry, "argument")?.to_string());
    }
    Some(out)
}

fn guard_ptr<T>(body: impl FnOnce() -> Option<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(_) => {
            set_error("panic inside the tracepack runtime");
            None
        }
    }
}

fn guard_status(body: impl FnOnce() -> c_int) -> c_int {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => status,
        Err(_) => {
            set_error("panic inside the tracepack runtime");
            -1
        }
    }
}

fn open_skeleton(
    pkg: &str,
    btf_path: Option<&str>,
    args: Option<Vec<String>>,
) -> Result<BpfSkeleton, Error> {
    let backend = default_backend()?;
    let skel = match args {
        None => BpfSkeleton::open_from_package(pkg, backend)?,
        Some(argv) => {
            let (object, meta_text) = tracepack::package::split_package(pkg)?;
            let mut meta = tracepack::meta::ObjectMeta::from_json_str(&meta_text)?;
            match tracepack::parse_args(&mut meta, &argv)? {
                ArgOutcome::Continue => {}
                // help/version short-circuit the load path; the C contract
                // reports them as a failed open with a telling message
                ArgOutcome::Help => return Err(Error::BadArgument("help requested".into())),
                ArgOutcome::Version => {
                    return Err(Error::BadArgument("version requested".into()))
                }
            }
            BpfSkeleton::from_package(
                tracepack::Package {
                    object,
                    meta,
                },
                backend,
            )
        }
    };
    Ok(match btf_path {
        Some(path) => skel.with_btf_archive_path(path),
        None => skel,
    })
}

fn boxed(skel: BpfSkeleton) -> *mut TracepackSkel {
    Box::into_raw(Box::new(TracepackSkel {
        inner: Arc::new(skel),
    }))
}

/// Open a skeleton from a package envelope.
///
/// # Safety
/// `pkg` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tracepack_open_from_package(pkg: *const c_char) -> *mut TracepackSkel {
    guard_ptr(|| {
        let pkg = cstr_arg(pkg, "package")?;
        match open_skeleton(pkg, None, None) {
            Ok(skel) => Some(boxed(skel)),
            Err(err) => {
                set_error(err.to_string());
                None
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Open a skeleton from a package envelope with an explicit BTF file path.
///
/// # Safety
/// `pkg` and `btf_path` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn tracepack_open_from_package_with_btf_path(
    pkg: *const c_char,
    btf_path: *const c_char,
) -> *mut TracepackSkel {
    guard_ptr(|| {
        let pkg = cstr_arg(pkg, "package")?;
        let btf_path = cstr_arg(btf_path, "btf path")?;
        match open_skeleton(pkg, Some(btf_path), None) {
            Ok(skel) => Some(boxed(skel)),
            Err(err) => {
                set_error(err.to_string());
                None
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Open a skeleton from a package envelope, first binding argv-style tokens
/// to the package's data-section variables. Help or version requests make
/// the open fail with a telling error message, like a parse failure.
///
/// # Safety
/// `pkg` must be a valid NUL-terminated string and `args` must point to
/// `argc` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn tracepack_open_from_package_with_args(
    pkg: *const c_char,
    args: *const *const c_char,
    argc: c_int,
) -> *mut TracepackSkel {
    guard_ptr(|| {
        let pkg = cstr_arg(pkg, "package")?;
        let argv = argv_to_vec(args, argc)?;
        match open_skeleton(pkg, None, Some(argv)) {
            Ok(skel) => Some(boxed(skel)),
            Err(err) => {
                set_error(err.to_string());
                None
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Open a skeleton from separate meta text and object bytes.
///
/// # Safety
/// `meta` must be a valid NUL-terminated string; `object` must point to
/// `object_size` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn tracepack_open_from_meta_and_object(
    meta: *const c_char,
    object: *const u8,
    object_size: size_t,
) -> *mut TracepackSkel {
    guard_ptr(|| {
        let meta = cstr_arg(meta, "meta")?;
        if object.is_null() && object_size > 0 {
            set_error("object buffer is null");
            return None;
        }
        let bytes = if object_size == 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(object, object_size).to_vec()
        };
        let backend = match default_backend() {
            Ok(backend) => backend,
            Err(err) => {
                set_error(err.to_string());
                return None;
            }
        };
        match BpfSkeleton::open(meta, bytes, backend) {
            Ok(skel) => Some(boxed(skel)),
            Err(err) => {
                set_error(err.to_string());
                None
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// # Safety
/// `skel` must be a pointer returned by a `tracepack_open_*` call.
#[no_mangle]
pub unsafe extern "C" fn tracepack_load_and_attach(skel: *mut TracepackSkel) -> c_int {
    guard_status(|| {
        let Some(skel) = skel.as_ref() else {
            set_error("skeleton is null");
            return -1;
        };
        match skel.inner.load_and_attach() {
            Ok(()) => 0,
            Err(err) => {
                set_error(err.to_string());
                -1
            }
        }
    })
}

/// Block polling events into `handler` (format: 0 plain text, 1 JSON,
/// 2 raw). A null handler prints records to standard output.
///
/// # Safety
/// `skel` must be a pointer returned by a `tracepack_open_*` call; `handler`
/// and `ctx` must stay valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn tracepack_wait_and_poll_to_handler(
    skel: *mut TracepackSkel,
    format: c_int,
    handler: Option<TracepackEventHandler>,
    ctx: *mut c_void,
) -> c_int {
    struct SendPtr(*mut c_void);
    unsafe impl Send for SendPtr {}

    guard_status(|| {
        let Some(skel) = skel.as_ref() else {
            set_error("skeleton is null");
            return -1;
        };
        let Some(format) = u32::try_from(format).ok().and_then(ExportFormat::from_tag) else {
            set_error(format!("unknown export format tag {format}"));
            return -1;
        };
        let sink = handler.map(|handler| {
            let ctx = SendPtr(ctx);
            Box::new(move |bytes: &[u8]| {
                let ctx = &ctx;
                handler(ctx.0, bytes.as_ptr() as *const c_char, bytes.len());
            }) as tracepack::EventSink
        });
        match skel.inner.wait_and_poll_to_handler(format, sink) {
            Ok(()) => 0,
            Err(err) => {
                set_error(err.to_string());
                -1
            }
        }
    })
}

/// Stop polling, detach and free the skeleton. The pointer is invalid
/// afterwards; a null pointer is a no-op.
///
/// # Safety
/// `skel` must be a pointer returned by a `tracepack_open_*` call, passed at
/// most once.
#[no_mangle]
pub unsafe extern "C" fn tracepack_destroy(skel: *mut TracepackSkel) {
    if skel.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let skel = Box::from_raw(skel);
        skel.inner.destroy();
        drop(skel);
    }));
}

/// File descriptor of a map or program by meta name; -1 when unknown.
///
/// # Safety
/// `skel` must be a pointer returned by a `tracepack_open_*` call and `name`
/// a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tracepack_get_fd_by_name(
    skel: *mut TracepackSkel,
    name: *const c_char,
) -> c_int {
    guard_status(|| {
        let Some(skel) = skel.as_ref() else {
            set_error("skeleton is null");
            return -1;
        };
        let Some(name) = cstr_arg(name, "name") else {
            return -1;
        };
        skel.inner.get_fd(name)
    })
}

/// Run the argument binder over a meta document and write the mutated meta
/// back as JSON text. Returns 0 on success, 1 when help or version were
/// requested, and a negative status on failure (including an out buffer too
/// small for the result).
///
/// # Safety
/// `meta` must be a valid NUL-terminated string, `args` must point to `argc`
/// valid NUL-terminated strings, and `out_buffer` must be writable for
/// `out_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn tracepack_parse_args_to_json_config(
    meta: *const c_char,
    args: *const *const c_char,
    argc: c_int,
    out_buffer: *mut c_char,
    out_size: size_t,
) -> c_int {
    guard_status(|| {
        let Some(meta) = cstr_arg(meta, "meta") else {
            return -1;
        };
        let Some(argv) = argv_to_vec(args, argc) else {
            return -1;
        };
        if out_buffer.is_null() || out_size == 0 {
            set_error("output buffer is empty");
            return -1;
        }
        match tracepack::parse_args_to_json_config(meta, &argv) {
            Ok((ArgOutcome::Continue, text)) => {
                let bytes = text.as_bytes();
                if bytes.len() + 1 > out_size {
                    set_error(format!(
                        "mutated meta needs {} bytes, buffer holds {out_size}",
                        bytes.len() + 1
                    ));
                    return -1;
                }
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), out_buffer as *mut u8, bytes.len());
                *out_buffer.add(bytes.len()) = 0;
                0
            }
            Ok((_, _)) => 1,
            Err(err) => {
                set_error(err.to_string());
                -1
            }
        }
    })
}

/// Create a pause/terminate handle over a RUNNING skeleton.
///
/// # Safety
/// `skel` must be a pointer returned by a `tracepack_open_*` call.
#[no_mangle]
pub unsafe extern "C" fn tracepack_handle_create(
    skel: *mut TracepackSkel,
) -> *mut TracepackPollingHandle {
    guard_ptr(|| {
        let Some(skel) = skel.as_ref() else {
            set_error("skeleton is null");
            return None;
        };
        match PollingHandle::new(Arc::clone(&skel.inner)) {
            Ok(handle) => Some(Box::into_raw(Box::new(TracepackPollingHandle {
                inner: handle,
            }))),
            Err(err) => {
                set_error(err.to_string());
                None
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Pause (non-zero) or resume (zero) the poll loop.
///
/// # Safety
/// `handle` must be a pointer returned by `tracepack_handle_create`.
#[no_mangle]
pub unsafe extern "C" fn tracepack_handle_set_pause(
    handle: *mut TracepackPollingHandle,
    pause: u8,
) {
    let Some(handle) = handle.as_ref() else {
        warn!("pause requested on a null handle");
        return;
    };
    handle.inner.set_pause(pause != 0);
}

/// Terminate the poller; equivalent to destroying the underlying skeleton.
///
/// # Safety
/// `handle` must be a pointer returned by `tracepack_handle_create`.
#[no_mangle]
pub unsafe extern "C" fn tracepack_handle_terminate(handle: *mut TracepackPollingHandle) {
    let Some(handle) = handle.as_ref() else {
        warn!("terminate requested on a null handle");
        return;
    };
    handle.inner.terminate();
}

/// Free the handle; the underlying skeleton stays alive.
///
/// # Safety
/// `handle` must be a pointer returned by `tracepack_handle_create`, passed
/// at most once.
#[no_mangle]
pub unsafe extern "C" fn tracepack_handle_destroy(handle: *mut TracepackPollingHandle) {
    if handle.is_null() {
        return;
    }
    drop(Box::from_raw(handle));
}

/// Copy the current thread's last error message into `buffer`, truncated to
/// `buffer_size` bytes including the NUL terminator. Content after a
/// successful call is undefined.
///
/// # Safety
/// `buffer` must be writable for `buffer_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn tracepack_get_error_message(buffer: *mut c_char, buffer_size: size_t) {
    if buffer.is_null() || buffer_size == 0 {
        return;
    }
    LAST_ERROR.with(|slot| {
        let message = slot.borrow();
        let bytes = message.as_bytes();
        let n = bytes.len().min(buffer_size - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, n);
        *buffer.add(n) = 0;
    });
}
