//! FFI type system - descriptors for values crossing the native boundary
//!
//! Defines:
//! - `TypeDescriptor`: immutable description of one native type
//! - `TypeKind`: what kind of native type it is
//! - `StructLayout`: C layout of a struct shared by its by-value and
//!   by-reference descriptors
//!
//! Descriptors are created by the [`TypeRegistry`](super::registry::TypeRegistry)
//! and shared as [`TypeRef`]s.

use crate::ffi::signature::Signature;
use libffi::middle::Type;
use std::fmt;
use std::mem::size_of;
use std::os::raw::c_long;
use std::sync::Arc;

/// Shared handle to an immutable type descriptor
pub type TypeRef = Arc<TypeDescriptor>;

/// Integer width as declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
    /// C `long`: 32 bits on Windows and 32-bit targets, 64 bits on LP64
    Long,
}

impl IntWidth {
    /// Width in bytes on this platform
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
            IntWidth::Long => size_of::<c_long>(),
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Integer type: width plus signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    pub width: IntWidth,
    pub signed: bool,
}

impl IntType {
    pub const fn new(width: IntWidth, signed: bool) -> Self {
        Self { width, signed }
    }

    /// Apply two's-complement wrap to the declared width.
    ///
    /// Truncates to the width, then sign- or zero-extends back. Never fails.
    pub fn wrap(self, value: i128) -> i128 {
        match (self.width.bytes(), self.signed) {
            (1, true) => value as i8 as i128,
            (1, false) => value as u8 as i128,
            (2, true) => value as i16 as i128,
            (2, false) => value as u16 as i128,
            (4, true) => value as i32 as i128,
            (4, false) => value as u32 as i128,
            (_, true) => value as i64 as i128,
            (_, false) => value as u64 as i128,
        }
    }

    fn key(self) -> &'static str {
        match (self.width, self.signed) {
            (IntWidth::W8, true) => "s8",
            (IntWidth::W8, false) => "u8",
            (IntWidth::W16, true) => "s16",
            (IntWidth::W16, false) => "u16",
            (IntWidth::W32, true) => "s32",
            (IntWidth::W32, false) => "u32",
            (IntWidth::W64, true) => "s64",
            (IntWidth::W64, false) => "u64",
            (IntWidth::Long, true) => "long",
            (IntWidth::Long, false) => "ulong",
        }
    }

    fn ffi_type(self) -> Type {
        match (self.width.bytes(), self.signed) {
            (1, true) => Type::i8(),
            (1, false) => Type::u8(),
            (2, true) => Type::i16(),
            (2, false) => Type::u16(),
            (4, true) => Type::i32(),
            (4, false) => Type::u32(),
            (_, true) => Type::i64(),
            (_, false) => Type::u64(),
        }
    }
}

/// Kind of native type
#[derive(Debug, Clone)]
pub enum TypeKind {
    Int(IntType),
    Float32,
    Float64,
    /// C `bool`, one byte
    Bool,
    Pointer,
    Void,
    /// `const char*`; legal as a parameter, never as a callback return
    String,
    /// Struct passed by copy
    StructByValue(Arc<StructLayout>),
    /// Struct passed as a pointer aliasing caller memory
    StructByRef(Arc<StructLayout>),
    /// Function pointer with a declared signature
    Callback(Arc<Signature>),
    /// Variadic marker; only exists to be rejected by the compiler
    Varargs,
}

/// Immutable description of a native type
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Name the descriptor was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Size of the native representation in bytes
    pub fn size(&self) -> usize {
        match &self.kind {
            TypeKind::Int(int) => int.width.bytes(),
            TypeKind::Float32 => 4,
            TypeKind::Float64 => 8,
            TypeKind::Bool => 1,
            TypeKind::Pointer
            | TypeKind::String
            | TypeKind::StructByRef(_)
            | TypeKind::Callback(_) => size_of::<usize>(),
            TypeKind::StructByValue(layout) => layout.size(),
            TypeKind::Void | TypeKind::Varargs => 0,
        }
    }

    /// Alignment of the native representation in bytes
    pub fn align(&self) -> usize {
        match &self.kind {
            TypeKind::StructByValue(layout) => layout.align(),
            TypeKind::Void | TypeKind::Varargs => 1,
            _ => self.size(),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// Scalars are the only legal struct field types
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Int(_)
                | TypeKind::Float32
                | TypeKind::Float64
                | TypeKind::Bool
                | TypeKind::Pointer
        )
    }

    /// Structural key fragment; equal for structurally identical types
    pub fn key(&self) -> String {
        match &self.kind {
            TypeKind::Int(int) => int.key().to_string(),
            TypeKind::Float32 => "f32".to_string(),
            TypeKind::Float64 => "f64".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Pointer => "ptr".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::String => "str".to_string(),
            TypeKind::StructByValue(layout) => layout.key().to_string(),
            TypeKind::StructByRef(layout) => format!("*{}", layout.key()),
            TypeKind::Callback(sig) => format!("cb{}", sig.key()),
            TypeKind::Varargs => "...".to_string(),
        }
    }

    /// libffi type used to build call interfaces
    pub fn ffi_type(&self) -> Type {
        match &self.kind {
            TypeKind::Int(int) => int.ffi_type(),
            TypeKind::Float32 => Type::f32(),
            TypeKind::Float64 => Type::f64(),
            TypeKind::Bool => Type::u8(),
            TypeKind::Pointer
            | TypeKind::String
            | TypeKind::StructByRef(_)
            | TypeKind::Callback(_) => Type::pointer(),
            TypeKind::StructByValue(layout) => layout.ffi_type(),
            TypeKind::Void | TypeKind::Varargs => Type::void(),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.key())
    }
}

/// One field of a struct layout
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub offset: usize,
    pub ty: TypeRef,
}

/// C layout of a struct
#[derive(Debug)]
pub struct StructLayout {
    name: String,
    fields: Vec<StructField>,
    size: usize,
    align: usize,
    key: String,
}

impl StructLayout {
    /// Lay out fields with C rules: each field at the next multiple of its
    /// alignment, total size rounded up to the largest alignment.
    pub fn compute(name: impl Into<String>, fields: Vec<(String, TypeRef)>) -> Self {
        let mut offset = 0usize;
        let mut align = 1usize;
        let mut laid_out = Vec::with_capacity(fields.len());

        for (field_name, ty) in fields {
            let field_align = ty.align().max(1);
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            laid_out.push(StructField {
                name: field_name,
                offset,
                ty: ty.clone(),
            });
            offset += ty.size();
        }

        let size = align_up(offset, align);
        let key = format!(
            "{{{}}}",
            laid_out
                .iter()
                .map(|f| format!("{}@{}", f.ty.key(), f.offset))
                .collect::<Vec<_>>()
                .join(",")
        );

        Self {
            name: name.into(),
            fields: laid_out,
            size,
            align,
            key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Structural key: field types and offsets, not names
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ffi_type(&self) -> Type {
        Type::structure(
            self.fields
                .iter()
                .map(|f| f.ty.ffi_type())
                .collect::<Vec<_>>(),
        )
    }

    /// Two layouts are interchangeable when their structure matches
    pub fn compatible(&self, other: &StructLayout) -> bool {
        std::ptr::eq(self, other) || (self.key == other.key && self.size == other.size)
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}
