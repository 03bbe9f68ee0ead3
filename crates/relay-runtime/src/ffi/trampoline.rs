//! Trampolines - native entry points bound to host callables
//!
//! A [`Trampoline`] owns a libffi closure whose code pointer native code can
//! call like any C function of the declared signature. Calls land in
//! [`dispatch::entry`] with the trampoline's [`Dispatcher`].
//!
//! What happens to the native code when the trampoline is dropped depends
//! on the [`ReleasePolicy`]: `Retain` leaks it so stale addresses keep
//! working (they return the neutral value), `Release` frees it.

use crate::ffi::dispatch::{self, Dispatcher};
use crate::ffi::memory::Pointer;
use crate::ffi::signature::Signature;
use crate::runtime::RuntimeShared;
use crate::value::Callable;
use libffi::middle::Closure;
use relay_config::ReleasePolicy;
use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// Native entry point for one (signature, callable) pair
pub struct Trampoline {
    code: Pointer,
    signature: Arc<Signature>,
    closure: ManuallyDrop<Closure<'static>>,
    dispatcher: NonNull<Dispatcher>,
    policy: ReleasePolicy,
}

// The closure and dispatcher are immutable after construction; the
// dispatcher only holds thread-safe handles.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    pub(crate) fn new(
        signature: Arc<Signature>,
        callable: &Callable,
        runtime: Weak<RuntimeShared>,
        policy: ReleasePolicy,
    ) -> Self {
        let dispatcher: &'static Dispatcher = Box::leak(Box::new(Dispatcher::new(
            signature.clone(),
            callable.downgrade(),
            runtime,
        )));
        let closure = Closure::new(signature.cif(), dispatch::entry, dispatcher);
        let code = Pointer::from_address(*closure.code_ptr() as usize);

        tracing::debug!(
            signature = %signature.key(),
            callable = %callable.describe(),
            address = ?code,
            "created trampoline"
        );

        Self {
            code,
            signature,
            closure: ManuallyDrop::new(closure),
            dispatcher: NonNull::from(dispatcher),
            policy,
        }
    }

    /// Native address of the entry point
    pub fn address(&self) -> Pointer {
        self.code
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.code.as_ptr()
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        match self.policy {
            ReleasePolicy::Retain => {
                tracing::trace!(address = ?self.code, "retaining native code of dropped trampoline");
            }
            ReleasePolicy::Release => {
                tracing::debug!(address = ?self.code, "releasing trampoline");
                // SAFETY: the closure is dropped first so nothing refers to
                // the dispatcher afterwards; both were created in `new` and
                // are dropped exactly once.
                unsafe {
                    ManuallyDrop::drop(&mut self.closure);
                    drop(Box::from_raw(self.dispatcher.as_ptr()));
                }
            }
        }
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("address", &self.code)
            .field("signature", &self.signature.key().as_str())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Result of binding a callable (or nil) to a signature
///
/// Holding a `Bound` binding keeps both the native code and the callable
/// alive.
#[derive(Clone)]
pub enum Binding {
    /// Nil callable: null address, no trampoline
    Null,
    Bound {
        trampoline: Arc<Trampoline>,
        callable: Callable,
    },
}

impl Binding {
    /// Address to hand to native code
    pub fn address(&self) -> Pointer {
        match self {
            Binding::Null => Pointer::null(),
            Binding::Bound { trampoline, .. } => trampoline.address(),
        }
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.address().as_ptr()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Binding::Null)
    }

    pub fn trampoline(&self) -> Option<&Arc<Trampoline>> {
        match self {
            Binding::Null => None,
            Binding::Bound { trampoline, .. } => Some(trampoline),
        }
    }

    pub fn callable(&self) -> Option<&Callable> {
        match self {
            Binding::Null => None,
            Binding::Bound { callable, .. } => Some(callable),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Null => write!(f, "Binding::Null"),
            Binding::Bound {
                trampoline,
                callable,
            } => write!(f, "Binding({:?} -> {:?})", trampoline.address(), callable),
        }
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}
