//! Callback dispatch - the host side of a native call-in
//!
//! Every trampoline forwards to [`entry`] with its [`Dispatcher`] as user
//! data. The dispatcher marshals the arguments, runs the callable under the
//! execution lock and writes the marshaled result into the native return
//! slot.
//!
//! Nothing unwinds into native code. On any failure the return slot is
//! zeroed and the failure is deferred: it is stored in the innermost
//! [`FailureScope`] of the calling thread (one per active foreign call) and
//! re-raised once that call returns to host code. A call-in with no
//! enclosing foreign call lands in the runtime's deferred-failure queue.
//!
//! A callable returned through a callback-typed result stays bound until the
//! enclosing foreign call returns. With no enclosing call it is pinned in the
//! callable cache until [`Runtime::release_pinned`](crate::Runtime::release_pinned).

use crate::ffi::marshal::MarshalContext;
use crate::ffi::memory::Pointer;
use crate::ffi::signature::Signature;
use crate::ffi::trampoline::Binding;
use crate::ffi::types::TypeKind;
use crate::ffi::{FfiError, FfiResult};
use crate::runtime::RuntimeShared;
use crate::value::{HostError, WeakCallable};
use libffi::low::ffi_cif;
use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

thread_local! {
    static CALL_FRAMES: RefCell<Vec<CallFrame>> = const { RefCell::new(Vec::new()) };
}

/// Per foreign call state of nested call-ins
#[derive(Default)]
struct CallFrame {
    failure: Option<FfiError>,
    /// Bindings returned to native code as callback results
    retained: Vec<Binding>,
}

/// Call-scoped slot for failures raised by nested call-ins
///
/// Callables returned to native code by nested call-ins also stay bound
/// until the scope closes.
#[must_use]
pub struct FailureScope {
    depth: usize,
    finished: bool,
}

impl FailureScope {
    pub fn enter() -> Self {
        let depth = CALL_FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(CallFrame::default());
            frames.len()
        });
        Self {
            depth,
            finished: false,
        }
    }

    /// Close the scope, returning the first failure recorded in it
    pub fn finish(mut self) -> Option<FfiError> {
        self.finished = true;
        self.pop().and_then(|frame| frame.failure)
    }

    fn pop(&self) -> Option<CallFrame> {
        CALL_FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if frames.len() == self.depth {
                frames.pop()
            } else {
                None
            }
        })
    }
}

impl Drop for FailureScope {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(failure) = self.pop().and_then(|frame| frame.failure) {
                tracing::warn!(%failure, "deferred callback failure discarded");
            }
        }
    }
}

/// Store a failure in the innermost scope of this thread.
///
/// Returns the failure back when the thread has no open scope. Only the
/// first failure per scope is kept.
fn stash(failure: FfiError) -> Result<(), FfiError> {
    CALL_FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        match frames.last_mut() {
            Some(frame) if frame.failure.is_none() => {
                frame.failure = Some(failure);
                Ok(())
            }
            Some(_) => {
                tracing::warn!(%failure, "additional callback failure in the same call dropped");
                Ok(())
            }
            None => Err(failure),
        }
    })
}

/// Keep bindings alive until the innermost scope of this thread closes.
///
/// Returns them back when the thread has no open scope.
fn retain(bindings: Vec<Binding>) -> Result<(), Vec<Binding>> {
    CALL_FRAMES.with(|frames| match frames.borrow_mut().last_mut() {
        Some(frame) => {
            frame.retained.extend(bindings);
            Ok(())
        }
        None => Err(bindings),
    })
}

/// Per-trampoline dispatch state
pub struct Dispatcher {
    signature: Arc<Signature>,
    target: WeakCallable,
    runtime: Weak<RuntimeShared>,
}

impl Dispatcher {
    pub(crate) fn new(
        signature: Arc<Signature>,
        target: WeakCallable,
        runtime: Weak<RuntimeShared>,
    ) -> Self {
        Self {
            signature,
            target,
            runtime,
        }
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    /// # Safety
    ///
    /// `args` and `result` must come from libffi for this signature.
    unsafe fn dispatch(&self, args: *const *const c_void, result: Pointer) -> FfiResult<()> {
        let runtime = self.runtime.upgrade().ok_or(FfiError::RuntimeDropped)?;
        let mut ctx = MarshalContext::new(&runtime);

        let params = self.signature.params();
        let mut host_args = Vec::with_capacity(params.len());
        for (index, ty) in params.iter().enumerate() {
            let arg = Pointer::from_ptr(*args.add(index));
            host_args.push(ctx.native_to_host(arg, ty)?);
        }

        let _guard = runtime.lock().acquire();
        let callable = self.target.upgrade().ok_or(FfiError::CallableReleased)?;

        tracing::trace!(
            signature = %self.signature.key(),
            callable = %callable.describe(),
            "dispatching callback"
        );

        let value = callable
            .call(&host_args)
            .map_err(FfiError::CallableInvocation)?;

        let ret = self.signature.ret();
        if !ret.is_void() {
            let native = ctx.host_to_native(&value, ret)?;
            native.write_return(result);
        }

        // A callable returned as a callback must outlive this call-in
        let bindings = ctx.take_bindings();
        if !bindings.is_empty() {
            if let Err(bindings) = retain(bindings) {
                for callable in bindings.iter().filter_map(Binding::callable) {
                    runtime.pin(callable);
                }
            }
        }
        Ok(())
    }

    /// All-zero bytes: 0, 0.0, false, null or a zeroed struct
    ///
    /// # Safety
    ///
    /// `result` must be the libffi return buffer for this signature.
    unsafe fn write_neutral(&self, result: Pointer) {
        let ret = self.signature.ret();
        let len = match ret.kind() {
            TypeKind::Void => 0,
            TypeKind::StructByValue(layout) => layout.size(),
            _ => ret.size().max(size_of::<usize>()),
        };
        std::ptr::write_bytes(result.as_mut_ptr::<u8>(), 0, len);
    }

    fn defer(&self, failure: FfiError) {
        tracing::warn!(
            signature = %self.signature.key(),
            %failure,
            "callback failed; returning neutral value"
        );
        if let Err(failure) = stash(failure) {
            match self.runtime.upgrade() {
                Some(runtime) => runtime.record_deferred(failure),
                None => tracing::error!(%failure, "callback failure lost: runtime dropped"),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("callable panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("callable panicked: {}", s)
    } else {
        "callable panicked".to_string()
    }
}

/// Native entry shared by every trampoline
pub(crate) unsafe extern "C" fn entry(
    _cif: &ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    dispatcher: &Dispatcher,
) {
    let result = Pointer::from(result as *mut c_void);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(args, result)));

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(failure)) => failure,
        Err(payload) => FfiError::CallableInvocation(HostError::Raised(panic_message(payload))),
    };

    dispatcher.write_neutral(result);
    dispatcher.defer(failure);
}
