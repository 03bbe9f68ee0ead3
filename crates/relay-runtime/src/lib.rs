//! Relay Runtime - callbacks from native code into host callables
//!
//! This library provides:
//! - A type registry and canonical callback signatures
//! - Native entry points (trampolines) generated for host callables
//! - Dispatch of native call-ins with exact-width marshaling
//! - Identity-stable caching of trampolines per callable and signature
//! - Foreign function calls and native globals

/// Relay runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ffi;
pub mod logging;
pub mod runtime;
pub mod value;

// Re-export commonly used types
pub use ffi::{
    Binding, CallOptions, Convention, FfiError, FfiResult, ForeignFunction, GlobalVariable,
    MarshalError, Pointer, Signature, StructType, StructValue, TypeSpec,
};
pub use relay_config::ReleasePolicy;
pub use runtime::{Runtime, RuntimeOptions};
pub use value::{Callable, CallableId, HostError, Invocable, Value, WeakCallable};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
