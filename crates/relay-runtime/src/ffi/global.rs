//! Typed native global variables
//!
//! Assigning a callable to a callback-typed global binds it and writes the
//! trampoline address into the slot. The binding (or C string) written last
//! is kept alive by the `GlobalVariable` until the next assignment.

use crate::ffi::marshal::MarshalContext;
use crate::ffi::memory::Pointer;
use crate::ffi::types::{TypeKind, TypeRef};
use crate::ffi::{FfiError, FfiResult};
use crate::runtime::RuntimeShared;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Weak;

pub struct GlobalVariable {
    address: Pointer,
    ty: TypeRef,
    runtime: Weak<RuntimeShared>,
    keepalive: Mutex<Option<MarshalContext>>,
}

impl GlobalVariable {
    pub(crate) fn new(address: Pointer, ty: TypeRef, runtime: Weak<RuntimeShared>) -> FfiResult<Self> {
        if matches!(ty.kind(), TypeKind::Void | TypeKind::Varargs) {
            return Err(FfiError::InvalidType(format!(
                "'{}' is not a valid global variable type",
                ty.name()
            )));
        }
        Ok(Self {
            address,
            ty,
            runtime,
            keepalive: Mutex::new(None),
        })
    }

    pub fn address(&self) -> Pointer {
        self.address
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    /// Current value of the slot
    pub fn get(&self) -> FfiResult<Value> {
        let runtime = self.runtime.upgrade().ok_or(FfiError::RuntimeDropped)?;
        let ctx = MarshalContext::new(&runtime);
        // SAFETY: `Runtime::global` requires the address to hold a value of `ty`.
        let value = unsafe { ctx.native_to_host(self.address, &self.ty)? };
        Ok(value)
    }

    /// Store a host value in the slot
    pub fn set(&self, value: &Value) -> FfiResult<()> {
        let runtime = self.runtime.upgrade().ok_or(FfiError::RuntimeDropped)?;
        let mut ctx = MarshalContext::new(&runtime);
        let native = ctx.host_to_native(value, &self.ty)?;

        let mut keepalive = self.keepalive.lock();
        // SAFETY: see `get`.
        unsafe { native.write_to(self.address) };
        *keepalive = Some(ctx);

        tracing::debug!(address = ?self.address, ty = self.ty.name(), "assigned global variable");
        Ok(())
    }
}

impl fmt::Debug for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<global {} at {:?}>", self.ty.name(), self.address)
    }
}
