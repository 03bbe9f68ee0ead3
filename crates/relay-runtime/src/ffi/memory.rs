//! Raw memory primitives
//!
//! - [`Pointer`]: an untyped native address
//! - [`StructValue`]: a struct either owned by the host (a copy) or viewed in
//!   place at a native address (an alias)

use crate::ffi::marshal::{decode_scalar, encode_scalar, MarshalError};
use crate::ffi::types::StructLayout;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Untyped native address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pointer(usize);

impl Pointer {
    pub const fn null() -> Self {
        Pointer(0)
    }

    pub const fn from_address(address: usize) -> Self {
        Pointer(address)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Pointer(ptr as usize)
    }

    pub fn address(&self) -> usize {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    pub fn offset(&self, bytes: usize) -> Pointer {
        Pointer(self.0.wrapping_add(bytes))
    }

    /// Read a `T` at this address
    ///
    /// # Safety
    ///
    /// The address must be valid for reads of `size_of::<T>()` bytes.
    pub unsafe fn read<T: Copy>(&self) -> T {
        std::ptr::read_unaligned(self.as_ptr::<T>())
    }

    /// Write a `T` at this address
    ///
    /// # Safety
    ///
    /// The address must be valid for writes of `size_of::<T>()` bytes.
    pub unsafe fn write<T: Copy>(&self, value: T) {
        std::ptr::write_unaligned(self.as_mut_ptr::<T>(), value)
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:#x})", self.0)
    }
}

impl<T> From<*const T> for Pointer {
    fn from(ptr: *const T) -> Self {
        Pointer::from_ptr(ptr)
    }
}

impl<T> From<*mut T> for Pointer {
    fn from(ptr: *mut T) -> Self {
        Pointer::from_ptr(ptr as *const T)
    }
}

/// Reject null addresses
pub fn check_null(ptr: Pointer) -> Result<Pointer, MarshalError> {
    if ptr.is_null() {
        Err(MarshalError::NullPointer)
    } else {
        Ok(ptr)
    }
}

/// Word-aligned zeroed bytes
pub(crate) fn word_buffer(size: usize) -> Vec<u64> {
    vec![0u64; size.div_ceil(8).max(1)]
}

#[derive(Clone)]
enum Storage {
    Owned(Arc<Mutex<Vec<u64>>>),
    Borrowed(Pointer),
}

/// Struct value: an owned copy or a view of native memory
#[derive(Clone)]
pub struct StructValue {
    layout: Arc<StructLayout>,
    storage: Storage,
}

impl StructValue {
    /// Zero-initialized owned struct
    pub fn new(layout: Arc<StructLayout>) -> Self {
        let words = word_buffer(layout.size());
        Self {
            layout,
            storage: Storage::Owned(Arc::new(Mutex::new(words))),
        }
    }

    /// Owned copy of the struct at `src`
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `layout.size()` bytes.
    pub unsafe fn copy_from(layout: Arc<StructLayout>, src: Pointer) -> Self {
        let value = Self::new(layout);
        if let Storage::Owned(words) = &value.storage {
            let mut words = words.lock();
            std::ptr::copy_nonoverlapping(
                src.as_ptr::<u8>(),
                words.as_mut_ptr() as *mut u8,
                value.layout.size(),
            );
        }
        value
    }

    /// Alias the struct living at `address`; no copy is made
    ///
    /// # Safety
    ///
    /// A non-null `address` must stay valid for reads and writes of
    /// `layout.size()` bytes while the view is used.
    pub unsafe fn borrowed(layout: Arc<StructLayout>, address: Pointer) -> Self {
        Self {
            layout,
            storage: Storage::Borrowed(address),
        }
    }

    pub fn layout(&self) -> &Arc<StructLayout> {
        &self.layout
    }

    /// Address of the struct bytes
    pub fn pointer(&self) -> Pointer {
        match &self.storage {
            Storage::Owned(words) => Pointer::from_ptr(words.lock().as_ptr()),
            Storage::Borrowed(address) => *address,
        }
    }

    /// Null views come from null struct-by-reference values
    pub fn is_null(&self) -> bool {
        self.pointer().is_null()
    }

    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::Borrowed(_))
    }

    /// Snapshot of the raw bytes
    pub fn bytes(&self) -> Result<Vec<u8>, MarshalError> {
        let base = check_null(self.pointer())?;
        let mut out = vec![0u8; self.layout.size()];
        // SAFETY: owned storage is at least `size` bytes; views are valid by
        // the contract of `borrowed`.
        unsafe {
            std::ptr::copy_nonoverlapping(base.as_ptr::<u8>(), out.as_mut_ptr(), out.len());
        }
        Ok(out)
    }

    /// Read a field
    pub fn get(&self, field: &str) -> Result<Value, MarshalError> {
        let field = self
            .layout
            .field(field)
            .ok_or_else(|| MarshalError::UnknownField(field.to_string()))?;
        let base = check_null(self.pointer())?;
        // SAFETY: offset lies within the layout.
        unsafe { decode_scalar(base.offset(field.offset), &field.ty) }
    }

    /// Write a field using the wrap rules of its type
    pub fn set(&self, field: &str, value: &Value) -> Result<(), MarshalError> {
        let field = self
            .layout
            .field(field)
            .ok_or_else(|| MarshalError::UnknownField(field.to_string()))?;
        let native = encode_scalar(value, &field.ty)?;
        let base = check_null(self.pointer())?;
        // SAFETY: offset lies within the layout.
        unsafe { native.write_to(base.offset(field.offset)) };
        Ok(())
    }

    /// Two values denote the same storage
    pub fn same_storage(&self, other: &StructValue) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::Owned(a), Storage::Owned(b)) => Arc::ptr_eq(a, b),
            (Storage::Borrowed(a), Storage::Borrowed(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_view() { "view" } else { "owned" };
        write!(f, "{}<{} at {:?}>", self.layout.name(), kind, self.pointer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::registry::TypeRegistry;

    fn pair_layout() -> Arc<StructLayout> {
        TypeRegistry::new()
            .register_struct("Pair", &[("a", "int8"), ("b", "uint32")])
            .unwrap()
            .layout
    }

    #[test]
    fn test_check_null() {
        assert_eq!(check_null(Pointer::null()), Err(MarshalError::NullPointer));
        assert!(check_null(Pointer::from_address(0x1000)).is_ok());
    }

    #[test]
    fn test_pointer_read_write() {
        let mut slot = 0u32;
        let ptr = Pointer::from(&mut slot as *mut u32);
        unsafe {
            ptr.write(0xdead_beefu32);
            assert_eq!(ptr.read::<u32>(), 0xdead_beef);
        }
        assert_eq!(slot, 0xdead_beef);
    }

    #[test]
    fn test_owned_struct_fields_wrap() {
        let value = StructValue::new(pair_layout());
        value.set("a", &Value::Int(200)).unwrap();
        value.set("b", &Value::Int(-1)).unwrap();
        assert_eq!(value.get("a").unwrap(), Value::Int(-56));
        assert_eq!(value.get("b").unwrap(), Value::Int(0xffff_ffff));
    }

    #[test]
    fn test_unknown_field() {
        let value = StructValue::new(pair_layout());
        assert_eq!(
            value.get("c"),
            Err(MarshalError::UnknownField("c".to_string()))
        );
    }

    #[test]
    fn test_copy_is_independent() {
        let original = StructValue::new(pair_layout());
        original.set("a", &Value::Int(7)).unwrap();

        let copy = unsafe { StructValue::copy_from(original.layout().clone(), original.pointer()) };
        copy.set("a", &Value::Int(9)).unwrap();

        assert_eq!(original.get("a").unwrap(), Value::Int(7));
        assert_eq!(copy.get("a").unwrap(), Value::Int(9));
        assert!(!copy.same_storage(&original));
    }

    #[test]
    fn test_view_aliases_memory() {
        let owner = StructValue::new(pair_layout());
        let view = unsafe { StructValue::borrowed(owner.layout().clone(), owner.pointer()) };
        view.set("b", &Value::Int(42)).unwrap();
        assert_eq!(owner.get("b").unwrap(), Value::Int(42));
        assert_eq!(view.pointer(), owner.pointer());
    }

    #[test]
    fn test_null_view() {
        let view = unsafe { StructValue::borrowed(pair_layout(), Pointer::null()) };
        assert!(view.is_null());
        assert_eq!(view.get("a"), Err(MarshalError::NullPointer));
    }
}
