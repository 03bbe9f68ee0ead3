//! Callback signatures
//!
//! A [`Signature`] is the canonical, immutable description of a native
//! function type. The [`SignatureCompiler`] validates declarations and
//! deduplicates structurally identical signatures so they share one
//! allocation and one cache key.

use crate::ffi::registry::TypeRegistry;
use crate::ffi::types::{TypeDescriptor, TypeKind, TypeRef};
use crate::ffi::{FfiError, FfiResult};
use libffi::middle::Cif;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Convention {
    #[default]
    Default,
    /// Only meaningful on 32-bit x86 Windows
    Stdcall,
}

impl Convention {
    /// The convention actually used on this platform
    pub fn effective(self) -> Self {
        if cfg!(all(windows, target_arch = "x86")) {
            self
        } else {
            Convention::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Convention::Default => "default",
            Convention::Stdcall => "stdcall",
        }
    }
}

/// How a parameter or return type is spelled in a declaration
#[derive(Debug, Clone)]
pub enum TypeSpec {
    /// A registered type name
    Named(String),
    /// An anonymous callback type, compiled recursively
    Callback {
        params: Vec<TypeSpec>,
        ret: Box<TypeSpec>,
        convention: Convention,
    },
    /// An already compiled signature used as a callback type
    Compiled(Arc<Signature>),
}

impl TypeSpec {
    /// Anonymous callback type with the default convention
    pub fn callback(params: Vec<TypeSpec>, ret: impl Into<TypeSpec>) -> Self {
        TypeSpec::Callback {
            params,
            ret: Box::new(ret.into()),
            convention: Convention::Default,
        }
    }
}

impl From<&str> for TypeSpec {
    fn from(name: &str) -> Self {
        TypeSpec::Named(name.to_string())
    }
}

impl From<String> for TypeSpec {
    fn from(name: String) -> Self {
        TypeSpec::Named(name)
    }
}

impl From<Arc<Signature>> for TypeSpec {
    fn from(sig: Arc<Signature>) -> Self {
        TypeSpec::Compiled(sig)
    }
}

impl From<&Arc<Signature>> for TypeSpec {
    fn from(sig: &Arc<Signature>) -> Self {
        TypeSpec::Compiled(sig.clone())
    }
}

/// Structural identity of a signature: `(s8,f32)->s32`, with `@stdcall`
/// appended when that convention is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureKey(Arc<str>);

impl SignatureKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical native function type
pub struct Signature {
    params: Vec<TypeRef>,
    ret: TypeRef,
    convention: Convention,
    key: SignatureKey,
}

impl Signature {
    fn new(params: Vec<TypeRef>, ret: TypeRef, convention: Convention) -> Self {
        let convention = convention.effective();
        let mut key = format!(
            "({})->{}",
            params
                .iter()
                .map(|p| p.key())
                .collect::<Vec<_>>()
                .join(","),
            ret.key()
        );
        if convention == Convention::Stdcall {
            key.push_str("@stdcall");
        }

        Self {
            params,
            ret,
            convention,
            key: SignatureKey(Arc::from(key)),
        }
    }

    pub fn params(&self) -> &[TypeRef] {
        &self.params
    }

    pub fn ret(&self) -> &TypeRef {
        &self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Effective calling convention
    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn key(&self) -> &SignatureKey {
        &self.key
    }

    /// Build a libffi call interface for this signature
    #[allow(unused_mut)]
    pub fn cif(&self) -> Cif {
        let mut cif = Cif::new(
            self.params.iter().map(|p| p.ffi_type()),
            self.ret.ffi_type(),
        );
        #[cfg(all(windows, target_arch = "x86"))]
        if self.convention == Convention::Stdcall {
            cif.set_abi(libffi::raw::ffi_abi_FFI_STDCALL);
        }
        cif
    }

    fn validate(&self) -> FfiResult<()> {
        for (index, param) in self.params.iter().enumerate() {
            match param.kind() {
                TypeKind::Varargs => {
                    return Err(FfiError::InvalidSignature(
                        "variadic callbacks are not supported".to_string(),
                    ))
                }
                TypeKind::Void => {
                    return Err(FfiError::InvalidSignature(format!(
                        "parameter {} cannot be void",
                        index
                    )))
                }
                _ => {}
            }
        }

        match self.ret.kind() {
            TypeKind::String => Err(FfiError::InvalidSignature(
                "string is not a legal callback return type".to_string(),
            )),
            TypeKind::Varargs => Err(FfiError::InvalidSignature(
                "varargs is not a legal return type".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature{}", self.key)
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Signature {}

/// Validates declarations and deduplicates signatures by key
pub struct SignatureCompiler {
    compiled: RwLock<HashMap<SignatureKey, Arc<Signature>>>,
}

impl SignatureCompiler {
    pub fn new() -> Self {
        Self {
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Compile a signature, returning the shared instance for its key
    pub fn compile(
        &self,
        registry: &TypeRegistry,
        params: &[TypeSpec],
        ret: &TypeSpec,
        convention: Convention,
    ) -> FfiResult<Arc<Signature>> {
        let params = params
            .iter()
            .map(|spec| self.resolve_spec(registry, spec))
            .collect::<FfiResult<Vec<_>>>()?;
        let ret = self.resolve_spec(registry, ret)?;

        let signature = Signature::new(params, ret, convention);
        signature.validate()?;

        if let Some(existing) = self.compiled.read().get(&signature.key) {
            return Ok(existing.clone());
        }

        let mut compiled = self.compiled.write();
        let shared = compiled
            .entry(signature.key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %signature.key, "compiled signature");
                Arc::new(signature)
            })
            .clone();
        Ok(shared)
    }

    /// Compile a signature and register it as a named callback type
    pub fn declare(
        &self,
        registry: &TypeRegistry,
        name: &str,
        params: &[TypeSpec],
        ret: &TypeSpec,
        convention: Convention,
    ) -> FfiResult<Arc<Signature>> {
        let signature = self.compile(registry, params, ret, convention)?;
        registry.register(name, callback_type(name, &signature))?;
        tracing::debug!(name, key = %signature.key(), "declared callback type");
        Ok(signature)
    }

    /// Number of distinct signatures compiled so far
    pub fn len(&self) -> usize {
        self.compiled.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve_spec(&self, registry: &TypeRegistry, spec: &TypeSpec) -> FfiResult<TypeRef> {
        match spec {
            TypeSpec::Named(name) => registry.resolve(name),
            TypeSpec::Callback {
                params,
                ret,
                convention,
            } => {
                let signature = self.compile(registry, params, ret, *convention)?;
                Ok(callback_type("callback", &signature))
            }
            TypeSpec::Compiled(signature) => Ok(callback_type("callback", signature)),
        }
    }
}

impl Default for SignatureCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn callback_type(name: &str, signature: &Arc<Signature>) -> TypeRef {
    Arc::new(TypeDescriptor::new(
        name,
        TypeKind::Callback(signature.clone()),
    ))
}
