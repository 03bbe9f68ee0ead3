//! Foreign function calls
//!
//! A [`ForeignFunction`] is a native function pointer with a declared
//! signature. Calls go through `ffi_call`, so any signature the compiler
//! accepts can be called, including struct-by-value arguments and returns.
//!
//! Each call is a safe point: failures deferred by callbacks dispatched
//! while the native function ran are re-raised as the call's error.

use crate::ffi::dispatch::FailureScope;
use crate::ffi::marshal::{MarshalContext, NativeValue};
use crate::ffi::memory::{word_buffer, Pointer};
use crate::ffi::signature::{Convention, Signature};
use crate::ffi::{FfiError, FfiResult};
use crate::runtime::RuntimeShared;
use crate::value::Value;
use libffi::middle::{Cif, CodePtr};
use libffi::raw;
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, Weak};

/// Options for attaching a foreign function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Release the execution lock while the native function runs
    pub blocking: bool,
    /// Calling convention of the native function
    pub convention: Convention,
}

impl CallOptions {
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }
}

/// Prepared call interface
struct CallInterface(Cif);

// A prepared cif is only read by `ffi_call`.
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

struct ForeignInner {
    code: Pointer,
    signature: Arc<Signature>,
    cif: CallInterface,
    blocking: bool,
    runtime: Weak<RuntimeShared>,
}

/// Native function pointer with a known signature
#[derive(Clone)]
pub struct ForeignFunction {
    inner: Arc<ForeignInner>,
}

impl ForeignFunction {
    pub(crate) fn from_raw(
        code: Pointer,
        signature: Arc<Signature>,
        runtime: Weak<RuntimeShared>,
        options: CallOptions,
    ) -> Self {
        let cif = CallInterface(signature.cif());
        Self {
            inner: Arc::new(ForeignInner {
                code,
                signature,
                cif,
                blocking: options.blocking,
                runtime,
            }),
        }
    }

    pub fn address(&self) -> Pointer {
        self.inner.code
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.inner.signature
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.blocking
    }

    /// Call the native function with host values
    ///
    /// Marshals arguments, calls the function, re-raises any deferred
    /// callback failure and marshals the result back.
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        let inner = &*self.inner;
        let runtime = inner.runtime.upgrade().ok_or(FfiError::RuntimeDropped)?;
        let params = inner.signature.params();

        // Validate argument count
        if args.len() != params.len() {
            return Err(FfiError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }

        let _guard = runtime.lock().acquire();

        // Marshal arguments
        let mut ctx = MarshalContext::new(&runtime);
        let mut natives = args
            .iter()
            .zip(params.iter())
            .map(|(arg, ty)| ctx.host_to_native(arg, ty))
            .collect::<Result<Vec<NativeValue>, _>>()?;
        let mut arg_ptrs: Vec<*mut c_void> = natives.iter_mut().map(NativeValue::arg_ptr).collect();

        let ret = inner.signature.ret();
        let mut ret_buf = word_buffer(ret.size().max(std::mem::size_of::<usize>()));

        tracing::trace!(
            signature = %inner.signature.key(),
            address = ?inner.code,
            blocking = inner.blocking,
            "calling foreign function"
        );

        let scope = FailureScope::enter();
        {
            let _region = inner.blocking.then(|| runtime.lock().release_blocking());
            let code = CodePtr::from_ptr(inner.code.as_ptr::<c_void>());
            // SAFETY: `attach` requires the pointer to match the signature;
            // argument storage outlives the call.
            unsafe {
                raw::ffi_call(
                    inner.cif.0.as_raw_ptr(),
                    Some(*code.as_fun()),
                    ret_buf.as_mut_ptr() as *mut c_void,
                    arg_ptrs.as_mut_ptr(),
                );
            }
        }
        if let Some(failure) = scope.finish() {
            return Err(failure);
        }

        let ret_ptr = Pointer::from_ptr(ret_buf.as_ptr());
        // SAFETY: the buffer was filled by `ffi_call` for this return type.
        let value = unsafe { ctx.read_return(ret_ptr, ret)? };
        Ok(value)
    }
}

impl PartialEq for ForeignFunction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.code == other.inner.code && self.inner.signature == other.inner.signature
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<foreign {} at {:?}>",
            self.inner.signature.key(),
            self.inner.code
        )
    }
}
