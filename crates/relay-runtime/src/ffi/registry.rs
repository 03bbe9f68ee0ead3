//! Type registry - symbolic type names to descriptors
//!
//! Holds the built-in scalar names, registered structs, typedefs and named
//! callback types. Descriptors are immutable once registered.

use crate::ffi::memory::StructValue;
use crate::ffi::types::{IntType, IntWidth, StructLayout, TypeDescriptor, TypeKind, TypeRef};
use crate::ffi::{FfiError, FfiResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Built-in type names, aliases separated by spaces
fn builtins() -> Vec<(&'static str, TypeKind)> {
    vec![
        ("char int8 s8", int(IntWidth::W8, true)),
        ("uchar uint8 u8", int(IntWidth::W8, false)),
        ("short int16", int(IntWidth::W16, true)),
        ("ushort uint16", int(IntWidth::W16, false)),
        ("int int32", int(IntWidth::W32, true)),
        ("uint uint32", int(IntWidth::W32, false)),
        ("long", int(IntWidth::Long, true)),
        ("ulong", int(IntWidth::Long, false)),
        ("long_long int64", int(IntWidth::W64, true)),
        ("ulong_long uint64", int(IntWidth::W64, false)),
        ("float float32", TypeKind::Float32),
        ("double float64", TypeKind::Float64),
        ("bool", TypeKind::Bool),
        ("pointer", TypeKind::Pointer),
        ("void", TypeKind::Void),
        ("string", TypeKind::String),
        ("varargs", TypeKind::Varargs),
    ]
}

fn int(width: IntWidth, signed: bool) -> TypeKind {
    TypeKind::Int(IntType::new(width, signed))
}

/// A registered struct: one layout, two descriptors
#[derive(Debug, Clone)]
pub struct StructType {
    pub layout: Arc<StructLayout>,
    /// Passed by copy (`Name`)
    pub by_value: TypeRef,
    /// Passed as a pointer to caller memory (`Name*`)
    pub by_ref: TypeRef,
}

impl StructType {
    /// Zeroed, owned instance of this struct
    pub fn instantiate(&self) -> StructValue {
        StructValue::new(self.layout.clone())
    }
}

/// Name → descriptor table
pub struct TypeRegistry {
    types: RwLock<HashMap<String, TypeRef>>,
    builtin: HashSet<&'static str>,
}

impl TypeRegistry {
    /// Registry pre-populated with the built-in scalar types
    pub fn new() -> Self {
        let mut types = HashMap::new();
        let mut builtin = HashSet::new();

        for (names, kind) in builtins() {
            let canonical = names.split(' ').next().unwrap_or(names);
            let descriptor = Arc::new(TypeDescriptor::new(canonical, kind));
            for name in names.split(' ') {
                types.insert(name.to_string(), descriptor.clone());
                builtin.insert(name);
            }
        }

        Self {
            types: RwLock::new(types),
            builtin,
        }
    }

    /// Look up a descriptor by name
    pub fn resolve(&self, name: &str) -> FfiResult<TypeRef> {
        self.types
            .read()
            .get(name.trim())
            .cloned()
            .ok_or_else(|| FfiError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Register a descriptor under a new name.
    ///
    /// Built-in names cannot be redefined; other names are replaced.
    pub fn register(&self, name: &str, descriptor: TypeRef) -> FfiResult<()> {
        if self.builtin.contains(name) {
            return Err(FfiError::InvalidType(format!(
                "cannot redefine built-in type '{}'",
                name
            )));
        }
        self.types.write().insert(name.to_string(), descriptor);
        Ok(())
    }

    /// Alias an existing type
    pub fn typedef(&self, alias: &str, existing: &str) -> FfiResult<TypeRef> {
        let descriptor = self.resolve(existing)?;
        self.register(alias, descriptor.clone())?;
        tracing::debug!(alias, existing, "registered typedef");
        Ok(descriptor)
    }

    /// Register a struct from `(field name, type name)` pairs.
    ///
    /// Produces `name` (by value) and `name*` (by reference) over one layout.
    pub fn register_struct(&self, name: &str, fields: &[(&str, &str)]) -> FfiResult<StructType> {
        if fields.is_empty() {
            return Err(FfiError::InvalidType(format!(
                "struct '{}' has no fields",
                name
            )));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(fields.len());
        for (field, type_name) in fields {
            if !seen.insert(*field) {
                return Err(FfiError::InvalidType(format!(
                    "duplicate field '{}' in struct '{}'",
                    field, name
                )));
            }
            let ty = self.resolve(type_name)?;
            if !ty.is_scalar() {
                return Err(FfiError::InvalidType(format!(
                    "field '{}' of struct '{}' has non-scalar type '{}'",
                    field,
                    name,
                    ty.name()
                )));
            }
            resolved.push((field.to_string(), ty));
        }

        let layout = Arc::new(StructLayout::compute(name, resolved));
        let by_value = Arc::new(TypeDescriptor::new(
            name,
            TypeKind::StructByValue(layout.clone()),
        ));
        let ref_name = format!("{}*", name);
        let by_ref = Arc::new(TypeDescriptor::new(
            ref_name.as_str(),
            TypeKind::StructByRef(layout.clone()),
        ));

        self.register(name, by_value.clone())?;
        self.register(&ref_name, by_ref.clone())?;

        tracing::debug!(
            name,
            size = layout.size(),
            align = layout.align(),
            "registered struct"
        );

        Ok(StructType {
            layout,
            by_value,
            by_ref,
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
