//! Relay runtime API for embedding
//!
//! A [`Runtime`] owns every process-scope table of the FFI layer: the type
//! registry, the signature compiler, the callable cache, the execution lock
//! and the queue of deferred callback failures. Cloning a `Runtime` shares
//! them.

use crate::ffi::cache::CallableCache;
use crate::ffi::caller::{CallOptions, ForeignFunction};
use crate::ffi::global::GlobalVariable;
use crate::ffi::lock::ExecutionLock;
use crate::ffi::memory::Pointer;
use crate::ffi::registry::{StructType, TypeRegistry};
use crate::ffi::signature::{Convention, Signature, SignatureCompiler, TypeSpec};
use crate::ffi::trampoline::{Binding, Trampoline};
use crate::ffi::types::TypeRef;
use crate::ffi::{FfiError, FfiResult};
use crate::value::Callable;
use parking_lot::Mutex;
use relay_config::settings::DEFAULT_SWEEP_INTERVAL;
use relay_config::{Config, ReleasePolicy};
use std::sync::Arc;

/// Runtime tuning knobs, usually taken from a [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub release_policy: ReleasePolicy,
    pub sweep_interval: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            release_policy: ReleasePolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl From<&Config> for RuntimeOptions {
    fn from(config: &Config) -> Self {
        Self {
            release_policy: config.release_policy(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// State shared by the runtime and everything it hands out
pub(crate) struct RuntimeShared {
    registry: TypeRegistry,
    signatures: SignatureCompiler,
    cache: CallableCache,
    lock: ExecutionLock,
    options: RuntimeOptions,
    deferred: Mutex<Vec<FfiError>>,
}

impl RuntimeShared {
    pub(crate) fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    pub(crate) fn record_deferred(&self, failure: FfiError) {
        self.deferred.lock().push(failure);
    }

    pub(crate) fn pin(&self, callable: &Callable) {
        if self.cache.pin(callable) {
            tracing::debug!(callable = %callable.describe(), "pinned callable returned outside a foreign call");
        }
    }

    /// Trampoline for `callable` under `signature`, created on first use
    pub(crate) fn bind_callable(self: &Arc<Self>, signature: &Arc<Signature>, callable: &Callable) -> Binding {
        let trampoline = self.cache.lookup_or_insert(callable, signature.key(), || {
            Trampoline::new(
                signature.clone(),
                callable,
                Arc::downgrade(self),
                self.options.release_policy,
            )
        });
        Binding::Bound {
            trampoline,
            callable: callable.clone(),
        }
    }
}

/// Relay runtime instance
///
/// # Examples
///
/// ```
/// use relay_runtime::{Callable, Runtime, Value};
///
/// let runtime = Runtime::new();
/// let sig = runtime.callback(&["int".into()], "int").unwrap();
/// let double = Callable::from_closure(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2)));
/// let binding = runtime.bind(&sig, Some(&double)).unwrap();
/// assert!(!binding.address().is_null());
/// ```
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime configured from loaded configuration
    pub fn with_config(config: &Config) -> Self {
        Self::with_options(RuntimeOptions::from(config))
    }

    pub fn with_options(options: RuntimeOptions) -> Self {
        tracing::debug!(
            release_policy = %options.release_policy,
            sweep_interval = options.sweep_interval,
            "creating runtime"
        );
        Self {
            shared: Arc::new(RuntimeShared {
                registry: TypeRegistry::new(),
                signatures: SignatureCompiler::new(),
                cache: CallableCache::new(options.sweep_interval),
                lock: ExecutionLock::new(),
                options,
                deferred: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> RuntimeOptions {
        self.shared.options
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.shared.registry
    }

    pub fn execution_lock(&self) -> &ExecutionLock {
        &self.shared.lock
    }

    // === Type declarations ===

    pub fn resolve(&self, name: &str) -> FfiResult<TypeRef> {
        self.shared.registry.resolve(name)
    }

    pub fn register_struct(&self, name: &str, fields: &[(&str, &str)]) -> FfiResult<StructType> {
        self.shared.registry.register_struct(name, fields)
    }

    pub fn typedef(&self, alias: &str, existing: &str) -> FfiResult<TypeRef> {
        self.shared.registry.typedef(alias, existing)
    }

    // === Callback declarations ===

    /// Compile an anonymous callback signature
    pub fn callback(&self, params: &[TypeSpec], ret: impl Into<TypeSpec>) -> FfiResult<Arc<Signature>> {
        self.callback_with(params, ret, Convention::Default)
    }

    pub fn callback_with(
        &self,
        params: &[TypeSpec],
        ret: impl Into<TypeSpec>,
        convention: Convention,
    ) -> FfiResult<Arc<Signature>> {
        self.shared
            .signatures
            .compile(&self.shared.registry, params, &ret.into(), convention)
    }

    /// Compile a signature and register it as the named callback type `name`
    pub fn declare(
        &self,
        name: &str,
        params: &[TypeSpec],
        ret: impl Into<TypeSpec>,
        convention: Convention,
    ) -> FfiResult<Arc<Signature>> {
        self.shared.signatures.declare(
            &self.shared.registry,
            name,
            params,
            &ret.into(),
            convention,
        )
    }

    // === Binding ===

    /// Bind a callable (or nil) to a signature.
    ///
    /// Nil yields [`Binding::Null`] without creating a trampoline. Binding the
    /// same callable to the same signature again returns the same trampoline.
    pub fn bind(&self, signature: &Arc<Signature>, callable: Option<&Callable>) -> FfiResult<Binding> {
        match callable {
            None => Ok(Binding::Null),
            Some(callable) => Ok(self.shared.bind_callable(signature, callable)),
        }
    }

    /// Number of signatures `callable` is currently bound under
    pub fn bindings_for(&self, callable: &Callable) -> usize {
        self.shared.cache.bindings_for(callable)
    }

    /// Number of callables with cached trampolines
    pub fn cached_callables(&self) -> usize {
        self.shared.cache.len()
    }

    /// Drop cache entries of callables that no longer exist
    pub fn sweep(&self) -> usize {
        self.shared.cache.sweep()
    }

    /// Release callables pinned because native code obtained them outside
    /// any foreign call; returns how many were pinned
    pub fn release_pinned(&self) -> usize {
        self.shared.cache.unpin_all()
    }

    // === Native functions and globals ===

    /// Attach a native function pointer with a declared signature
    ///
    /// # Safety
    ///
    /// `code` must point to a function whose actual signature matches
    /// `params`, `ret` and `options.convention`, and it must stay valid for as
    /// long as the returned function (or any clone) may be called.
    pub unsafe fn attach(
        &self,
        code: *const (),
        params: &[TypeSpec],
        ret: impl Into<TypeSpec>,
        options: CallOptions,
    ) -> FfiResult<ForeignFunction> {
        let signature = self.callback_with(params, ret, options.convention)?;
        Ok(ForeignFunction::from_raw(
            Pointer::from_ptr(code),
            signature,
            Arc::downgrade(&self.shared),
            options,
        ))
    }

    /// Typed handle to a native global variable
    ///
    /// # Safety
    ///
    /// `address` must point to a live, writable object of type `type_name`.
    pub unsafe fn global<T>(&self, address: *mut T, type_name: &str) -> FfiResult<GlobalVariable> {
        let ty = self.resolve(type_name)?;
        GlobalVariable::new(
            Pointer::from_ptr(address as *const T),
            ty,
            Arc::downgrade(&self.shared),
        )
    }

    // === Deferred failures ===

    /// Failures from call-ins that had no enclosing foreign call
    pub fn take_deferred_failures(&self) -> Vec<FfiError> {
        std::mem::take(&mut *self.shared.deferred.lock())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
