//! Foreign Function Interface (FFI) infrastructure
//!
//! Lets native code call host callables through generated entry points:
//! - Type registry and descriptors (`registry`, `types`)
//! - Canonical callback signatures (`signature`)
//! - Native entry points bound to host callables (`trampoline`, `dispatch`)
//! - Identity-stable trampoline reuse (`cache`)
//! - Host ↔ native conversions (`marshal`, `memory`)
//! - Calls into native code and native globals (`caller`, `global`)
//!
//! # Safety
//!
//! FFI operations involve `unsafe` code and careful memory management.
//! All unsafe code is isolated in this module with safe wrappers.

pub mod cache;
pub mod caller;
pub mod dispatch;
pub mod global;
pub mod lock;
pub mod marshal;
pub mod memory;
pub mod registry;
pub mod signature;
pub mod trampoline;
pub mod types;

use crate::value::HostError;
use thiserror::Error;

pub use cache::CallableCache;
pub use caller::{CallOptions, ForeignFunction};
pub use global::GlobalVariable;
pub use lock::ExecutionLock;
pub use marshal::{MarshalContext, MarshalError, NativeValue};
pub use memory::{Pointer, StructValue};
pub use registry::{StructType, TypeRegistry};
pub use signature::{Convention, Signature, SignatureCompiler, SignatureKey, TypeSpec};
pub use trampoline::{Binding, Trampoline};
pub use types::{IntType, IntWidth, StructLayout, TypeDescriptor, TypeKind, TypeRef};

/// FFI errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FfiError {
    /// Type name not known to the registry
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Type exists but cannot be used where it was declared
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Illegal callback signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Host value not coercible to its native type
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// The callable raised or panicked during a native call-in
    #[error("Callback failed: {0}")]
    CallableInvocation(HostError),

    /// Native code called an entry point whose callable is gone
    #[error("Callback target was released")]
    CallableReleased,

    /// The owning runtime no longer exists
    #[error("Runtime was dropped")]
    RuntimeDropped,

    /// Wrong number of arguments for a foreign function
    #[error("Expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// Result type for FFI operations
pub type FfiResult<T> = Result<T, FfiError>;
