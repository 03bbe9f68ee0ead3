//! Shared test utilities
//!
//! A small "native library" of `extern "C"` functions that call back into
//! whatever function pointer they are handed, plus helpers for attaching
//! them to a runtime.

#![allow(dead_code)]

use relay_runtime::{CallOptions, Callable, ForeignFunction, HostError, Runtime, TypeSpec, Value};
use std::ffi::{c_char, c_void, CStr};
use std::os::raw::{c_long, c_ulong};
use std::sync::Arc;

// ============================================================================
// Native library
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct S8F32S32 {
    pub s8: i8,
    pub f32: f32,
    pub s32: i32,
}

macro_rules! native_scalar {
    ($($returns:ident, $passes:ident, $t:ty);* $(;)?) => {
        $(
            /// Return whatever the callback returns
            pub extern "C" fn $returns(f: extern "C" fn() -> $t) -> $t {
                f()
            }

            /// Hand `v` to the callback and return its result
            pub extern "C" fn $passes(f: extern "C" fn($t) -> $t, v: $t) -> $t {
                f(v)
            }
        )*
    };
}

native_scalar! {
    closure_vr_s8, closure_pass_s8, i8;
    closure_vr_u8, closure_pass_u8, u8;
    closure_vr_s16, closure_pass_s16, i16;
    closure_vr_u16, closure_pass_u16, u16;
    closure_vr_s32, closure_pass_s32, i32;
    closure_vr_u32, closure_pass_u32, u32;
    closure_vr_s64, closure_pass_s64, i64;
    closure_vr_u64, closure_pass_u64, u64;
    closure_vr_long, closure_pass_long, c_long;
    closure_vr_ulong, closure_pass_ulong, c_ulong;
    closure_vr_f32, closure_pass_f32, f32;
    closure_vr_f64, closure_pass_f64, f64;
    closure_vr_bool, closure_pass_bool, bool;
    closure_vr_ptr, closure_pass_ptr, *mut c_void;
}

pub extern "C" fn closure_vr_v(f: extern "C" fn()) {
    f()
}

pub extern "C" fn closure_vr_struct(f: extern "C" fn() -> S8F32S32) -> S8F32S32 {
    f()
}

pub extern "C" fn closure_struct_arg(
    f: extern "C" fn(S8F32S32) -> i32,
    s8: i8,
    f32: f32,
    s32: i32,
) -> i32 {
    f(S8F32S32 { s8, f32, s32 })
}

pub extern "C" fn closure_struct_ref(f: extern "C" fn(*mut S8F32S32), s: *mut S8F32S32) {
    f(s)
}

pub extern "C" fn closure_string_arg(f: extern "C" fn(*const c_char) -> u64, s: *const c_char) -> u64 {
    f(s)
}

/// Calls the callback if present, otherwise returns -1
pub extern "C" fn closure_optional(f: Option<extern "C" fn(i32) -> i32>, v: i32) -> i32 {
    match f {
        Some(f) => f(v),
        None => -1,
    }
}

pub extern "C" fn is_null_callback(f: Option<extern "C" fn(i32) -> i32>) -> bool {
    f.is_none()
}

pub extern "C" fn double_it(v: i32) -> i32 {
    v * 2
}

pub extern "C" fn returns_function_pointer() -> extern "C" fn(i32) -> i32 {
    double_it
}

/// Hands `double_it` to the callback
pub extern "C" fn closure_callback_arg(f: extern "C" fn(extern "C" fn(i32) -> i32, i32) -> i32, v: i32) -> i32 {
    f(double_it, v)
}

/// Asks the callback for a function and calls it, or returns -1 on null
pub extern "C" fn closure_returns_closure(
    f: extern "C" fn() -> Option<extern "C" fn(i32) -> i32>,
    v: i32,
) -> i32 {
    match f() {
        Some(g) => g(v),
        None => -1,
    }
}

/// Calls the callback with 0..n in order
pub extern "C" fn closure_sequence(f: extern "C" fn(i32), n: i32) {
    for i in 0..n {
        f(i)
    }
}

/// Stores the callback result through `out`
pub extern "C" fn closure_store_result(f: extern "C" fn() -> i32, out: *mut i32) {
    unsafe { *out = f() }
}

/// Calls the callback from a freshly spawned native thread and joins it
pub extern "C" fn closure_on_thread(f: extern "C" fn(i32) -> i32, v: i32) -> i32 {
    std::thread::spawn(move || f(v)).join().unwrap_or(-1)
}

/// Calls whatever callback is currently stored in `slot`
pub extern "C" fn call_slot(slot: *const Option<extern "C" fn(i32) -> i32>, v: i32) -> i32 {
    match unsafe { *slot } {
        Some(f) => f(v),
        None => -1,
    }
}

/// Length of a C string, or u64::MAX for null
pub fn c_strlen(s: *const c_char) -> u64 {
    if s.is_null() {
        u64::MAX
    } else {
        unsafe { CStr::from_ptr(s).to_bytes().len() as u64 }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Attach a native test function
pub fn attach(
    runtime: &Runtime,
    code: *const (),
    params: &[TypeSpec],
    ret: impl Into<TypeSpec>,
) -> ForeignFunction {
    attach_with(runtime, code, params, ret, CallOptions::default())
}

pub fn attach_with(
    runtime: &Runtime,
    code: *const (),
    params: &[TypeSpec],
    ret: impl Into<TypeSpec>,
    options: CallOptions,
) -> ForeignFunction {
    unsafe { runtime.attach(code, params, ret, options) }.expect("attach failed")
}

/// Callable returning its first argument
pub fn identity() -> Callable {
    Callable::from_closure(|args| Ok(args.first().cloned().unwrap_or(Value::Nil)))
}

/// Callable returning a fixed value
pub fn constant(value: Value) -> Callable {
    Callable::from_closure(move |_| Ok(value.clone()))
}

/// Callable that always raises
pub fn failing(message: &'static str) -> Callable {
    Callable::from_closure(move |_| Err(HostError::raised(message)))
}

/// Callable recording every first argument it receives
pub fn recorder() -> (Callable, Arc<parking_lot::Mutex<Vec<Value>>>) {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callable = Callable::from_closure(move |args| {
        sink.lock().push(args.first().cloned().unwrap_or(Value::Nil));
        Ok(Value::Nil)
    });
    (callable, seen)
}

pub fn int(value: &Value) -> i128 {
    value
        .as_int()
        .unwrap_or_else(|| panic!("expected integer, got {:?}", value))
}
