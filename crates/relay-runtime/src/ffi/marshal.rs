//! Type marshaling - host ↔ native conversions
//!
//! - `MarshalContext::host_to_native()`: host value to native representation
//! - `MarshalContext::native_to_host()`: native memory to host value
//!
//! Integers always wrap to the declared width (truncation plus sign or zero
//! extension); out-of-range values never fail.
//!
//! # Memory Safety
//!
//! - C strings and callback bindings created while marshaling are owned by
//!   the `MarshalContext` and released on `Drop`
//! - Null pointers decode to `nil` where the type allows it

use crate::ffi::caller::{CallOptions, ForeignFunction};
use crate::ffi::memory::{word_buffer, Pointer, StructValue};
use crate::ffi::trampoline::Binding;
use crate::ffi::types::{IntType, StructLayout, TypeDescriptor, TypeKind};
use crate::runtime::RuntimeShared;
use crate::value::Value;
use std::ffi::{c_void, CStr, CString};
use std::mem::size_of;
use std::os::raw::c_char;
use std::sync::Arc;
use thiserror::Error;

/// Marshal error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    /// Host value of the wrong kind for the native type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Null pointer where a value is required
    #[error("Null pointer")]
    NullPointer,

    /// String contains an interior null byte
    #[error("Invalid string: {0}")]
    InvalidString(String),

    /// Struct value whose layout differs from the declared one
    #[error("Struct layout mismatch: expected {expected}, got {got}")]
    LayoutMismatch { expected: String, got: String },

    #[error("Unknown struct field: {0}")]
    UnknownField(String),
}

fn mismatch(ty: &TypeDescriptor, value: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: ty.name().to_string(),
        got: value.type_name().to_string(),
    }
}

/// Native representation of one value
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(u8),
    Pointer(usize),
    Struct { words: Vec<u64>, size: usize },
    Void,
}

impl NativeValue {
    /// Integer of the given type; `value` must already be wrapped
    fn from_int(int: IntType, value: i128) -> Self {
        match (int.width.bytes(), int.signed) {
            (1, true) => NativeValue::I8(value as i8),
            (1, false) => NativeValue::U8(value as u8),
            (2, true) => NativeValue::I16(value as i16),
            (2, false) => NativeValue::U16(value as u16),
            (4, true) => NativeValue::I32(value as i32),
            (4, false) => NativeValue::U32(value as u32),
            (_, true) => NativeValue::I64(value as i64),
            (_, false) => NativeValue::U64(value as u64),
        }
    }

    /// Pointer to the storage, as libffi expects for argument values
    pub fn arg_ptr(&mut self) -> *mut c_void {
        match self {
            NativeValue::I8(v) => v as *mut i8 as *mut c_void,
            NativeValue::U8(v) | NativeValue::Bool(v) => v as *mut u8 as *mut c_void,
            NativeValue::I16(v) => v as *mut i16 as *mut c_void,
            NativeValue::U16(v) => v as *mut u16 as *mut c_void,
            NativeValue::I32(v) => v as *mut i32 as *mut c_void,
            NativeValue::U32(v) => v as *mut u32 as *mut c_void,
            NativeValue::I64(v) => v as *mut i64 as *mut c_void,
            NativeValue::U64(v) => v as *mut u64 as *mut c_void,
            NativeValue::F32(v) => v as *mut f32 as *mut c_void,
            NativeValue::F64(v) => v as *mut f64 as *mut c_void,
            NativeValue::Pointer(v) => v as *mut usize as *mut c_void,
            NativeValue::Struct { words, .. } => words.as_mut_ptr() as *mut c_void,
            NativeValue::Void => std::ptr::null_mut(),
        }
    }

    /// Store at its natural width
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of the value's native size.
    pub unsafe fn write_to(&self, dst: Pointer) {
        match self {
            NativeValue::I8(v) => dst.write(*v),
            NativeValue::U8(v) | NativeValue::Bool(v) => dst.write(*v),
            NativeValue::I16(v) => dst.write(*v),
            NativeValue::U16(v) => dst.write(*v),
            NativeValue::I32(v) => dst.write(*v),
            NativeValue::U32(v) => dst.write(*v),
            NativeValue::I64(v) => dst.write(*v),
            NativeValue::U64(v) => dst.write(*v),
            NativeValue::F32(v) => dst.write(*v),
            NativeValue::F64(v) => dst.write(*v),
            NativeValue::Pointer(v) => dst.write(*v),
            NativeValue::Struct { words, size } => std::ptr::copy_nonoverlapping(
                words.as_ptr() as *const u8,
                dst.as_mut_ptr::<u8>(),
                *size,
            ),
            NativeValue::Void => {}
        }
    }

    /// Store into a closure return slot.
    ///
    /// Integral values narrower than a machine word fill the whole slot,
    /// sign- or zero-extended.
    ///
    /// # Safety
    ///
    /// `dst` must be a libffi return buffer for the value's type.
    pub unsafe fn write_return(&self, dst: Pointer) {
        match self {
            NativeValue::I8(v) => dst.write(*v as isize),
            NativeValue::U8(v) | NativeValue::Bool(v) => dst.write(*v as usize),
            NativeValue::I16(v) => dst.write(*v as isize),
            NativeValue::U16(v) => dst.write(*v as usize),
            NativeValue::I32(v) => dst.write(*v as isize),
            NativeValue::U32(v) => dst.write(*v as usize),
            other => other.write_to(dst),
        }
    }
}

/// Convert a host value to a scalar native type
pub(crate) fn encode_scalar(value: &Value, ty: &TypeDescriptor) -> Result<NativeValue, MarshalError> {
    match ty.kind() {
        TypeKind::Int(int) => {
            let raw = match value {
                Value::Int(i) => *i,
                Value::Float(f) => *f as i128,
                other => return Err(mismatch(ty, other)),
            };
            Ok(NativeValue::from_int(*int, int.wrap(raw)))
        }
        TypeKind::Float32 => value
            .as_float()
            .map(|f| NativeValue::F32(f as f32))
            .ok_or_else(|| mismatch(ty, value)),
        TypeKind::Float64 => value
            .as_float()
            .map(NativeValue::F64)
            .ok_or_else(|| mismatch(ty, value)),
        TypeKind::Bool => match value {
            Value::Bool(b) => Ok(NativeValue::Bool(*b as u8)),
            other => Err(mismatch(ty, other)),
        },
        TypeKind::Pointer => match value {
            Value::Nil => Ok(NativeValue::Pointer(0)),
            Value::Pointer(p) => Ok(NativeValue::Pointer(p.address())),
            Value::Struct(s) => Ok(NativeValue::Pointer(s.pointer().address())),
            Value::Function(f) => Ok(NativeValue::Pointer(f.address().address())),
            other => Err(mismatch(ty, other)),
        },
        _ => Err(mismatch(ty, value)),
    }
}

/// Read a scalar native value
///
/// # Safety
///
/// `src` must be valid for reads of `ty.size()` bytes.
pub(crate) unsafe fn decode_scalar(src: Pointer, ty: &TypeDescriptor) -> Result<Value, MarshalError> {
    let value = match ty.kind() {
        TypeKind::Int(int) => Value::Int(match (int.width.bytes(), int.signed) {
            (1, true) => src.read::<i8>() as i128,
            (1, false) => src.read::<u8>() as i128,
            (2, true) => src.read::<i16>() as i128,
            (2, false) => src.read::<u16>() as i128,
            (4, true) => src.read::<i32>() as i128,
            (4, false) => src.read::<u32>() as i128,
            (_, true) => src.read::<i64>() as i128,
            (_, false) => src.read::<u64>() as i128,
        }),
        TypeKind::Float32 => Value::Float(src.read::<f32>() as f64),
        TypeKind::Float64 => Value::Float(src.read::<f64>()),
        TypeKind::Bool => Value::Bool(src.read::<u8>() != 0),
        TypeKind::Pointer => Value::Pointer(Pointer::from_address(src.read::<usize>())),
        _ => {
            return Err(MarshalError::TypeMismatch {
                expected: "scalar".to_string(),
                got: ty.name().to_string(),
            })
        }
    };
    Ok(value)
}

fn check_layout(expected: &StructLayout, value: &StructValue) -> Result<(), MarshalError> {
    if expected.compatible(value.layout()) {
        Ok(())
    } else {
        Err(MarshalError::LayoutMismatch {
            expected: expected.name().to_string(),
            got: value.layout().name().to_string(),
        })
    }
}

/// Marshal context for host ↔ native conversions
///
/// Owns everything native code may still be looking at until the crossing
/// completes: C strings and callback bindings.
pub struct MarshalContext {
    runtime: Arc<RuntimeShared>,
    /// Track allocated C strings for cleanup
    allocated_strings: Vec<CString>,
    /// Bindings handed to native code as callback addresses
    bindings: Vec<Binding>,
}

impl MarshalContext {
    pub(crate) fn new(runtime: &Arc<RuntimeShared>) -> Self {
        Self {
            runtime: runtime.clone(),
            allocated_strings: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Hand over the bindings created so far
    pub fn take_bindings(&mut self) -> Vec<Binding> {
        std::mem::take(&mut self.bindings)
    }

    /// Marshal a host value to the native representation of `ty`
    pub fn host_to_native(
        &mut self,
        value: &Value,
        ty: &TypeDescriptor,
    ) -> Result<NativeValue, MarshalError> {
        match ty.kind() {
            TypeKind::String => match value {
                Value::Nil => Ok(NativeValue::Pointer(0)),
                Value::Pointer(p) => Ok(NativeValue::Pointer(p.address())),
                Value::Str(s) => {
                    let c_string = CString::new(s.as_bytes()).map_err(|e| {
                        MarshalError::InvalidString(format!("String contains null byte: {}", e))
                    })?;
                    let ptr = c_string.as_ptr() as usize;
                    self.allocated_strings.push(c_string);
                    Ok(NativeValue::Pointer(ptr))
                }
                other => Err(mismatch(ty, other)),
            },

            TypeKind::StructByValue(layout) => match value {
                Value::Struct(s) => {
                    check_layout(layout, s)?;
                    let bytes = s.bytes()?;
                    let mut words = word_buffer(layout.size());
                    // SAFETY: `words` holds at least `bytes.len()` bytes.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            bytes.as_ptr(),
                            words.as_mut_ptr() as *mut u8,
                            bytes.len(),
                        );
                    }
                    Ok(NativeValue::Struct {
                        words,
                        size: layout.size(),
                    })
                }
                other => Err(mismatch(ty, other)),
            },

            TypeKind::StructByRef(layout) => match value {
                Value::Nil => Ok(NativeValue::Pointer(0)),
                Value::Pointer(p) => Ok(NativeValue::Pointer(p.address())),
                Value::Struct(s) => {
                    check_layout(layout, s)?;
                    Ok(NativeValue::Pointer(s.pointer().address()))
                }
                other => Err(mismatch(ty, other)),
            },

            TypeKind::Callback(signature) => match value {
                Value::Nil => Ok(NativeValue::Pointer(0)),
                Value::Pointer(p) => Ok(NativeValue::Pointer(p.address())),
                Value::Function(f) => Ok(NativeValue::Pointer(f.address().address())),
                Value::Callable(callable) => {
                    let binding = self.runtime.bind_callable(signature, callable);
                    let address = binding.address().address();
                    self.bindings.push(binding);
                    Ok(NativeValue::Pointer(address))
                }
                other => Err(mismatch(ty, other)),
            },

            TypeKind::Void => Ok(NativeValue::Void),

            _ => encode_scalar(value, ty),
        }
    }

    /// Read a native value of type `ty` stored at `src`
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `ty.size()` bytes, and any pointer it
    /// holds must satisfy the contract of `ty` (C string, struct, function).
    pub unsafe fn native_to_host(
        &self,
        src: Pointer,
        ty: &TypeDescriptor,
    ) -> Result<Value, MarshalError> {
        match ty.kind() {
            TypeKind::String => {
                let ptr = src.read::<*const c_char>();
                if ptr.is_null() {
                    Ok(Value::Nil)
                } else {
                    Ok(Value::string(CStr::from_ptr(ptr).to_string_lossy()))
                }
            }

            TypeKind::StructByValue(layout) => {
                Ok(Value::Struct(StructValue::copy_from(layout.clone(), src)))
            }

            TypeKind::StructByRef(layout) => {
                let address = Pointer::from_address(src.read::<usize>());
                Ok(Value::Struct(StructValue::borrowed(layout.clone(), address)))
            }

            TypeKind::Callback(signature) => {
                let address = Pointer::from_address(src.read::<usize>());
                if address.is_null() {
                    Ok(Value::Nil)
                } else {
                    Ok(Value::Function(ForeignFunction::from_raw(
                        address,
                        signature.clone(),
                        Arc::downgrade(&self.runtime),
                        CallOptions::default(),
                    )))
                }
            }

            TypeKind::Void => Ok(Value::Nil),

            _ => decode_scalar(src, ty),
        }
    }

    /// Read a value from a libffi return buffer
    ///
    /// # Safety
    ///
    /// Same contract as [`native_to_host`](Self::native_to_host); `src` must
    /// be a return buffer filled by `ffi_call`.
    pub unsafe fn read_return(&self, src: Pointer, ty: &TypeDescriptor) -> Result<Value, MarshalError> {
        match ty.kind() {
            // Narrow integral returns are widened to a full machine word
            TypeKind::Int(int) if int.width.bytes() < size_of::<usize>() => {
                let raw = src.read::<usize>();
                Ok(Value::Int(int.wrap(raw as i128)))
            }
            TypeKind::Bool => Ok(Value::Bool(src.read::<usize>() & 0xff != 0)),
            _ => self.native_to_host(src, ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::registry::TypeRegistry;
    use rstest::rstest;

    fn ty(name: &str) -> Arc<TypeDescriptor> {
        TypeRegistry::new().resolve(name).unwrap()
    }

    #[rstest]
    #[case("char", 128, NativeValue::I8(-128))]
    #[case("char", -129, NativeValue::I8(127))]
    #[case("uchar", -1, NativeValue::U8(0xff))]
    #[case("uchar", 256, NativeValue::U8(0))]
    #[case("short", 0x8000, NativeValue::I16(-0x8000))]
    #[case("ushort", -1, NativeValue::U16(0xffff))]
    #[case("int", 0x8000_0000, NativeValue::I32(i32::MIN))]
    #[case("uint", -1, NativeValue::U32(u32::MAX))]
    #[case("int64", 0x8000_0000_0000_0000, NativeValue::I64(i64::MIN))]
    #[case("uint64", -1, NativeValue::U64(u64::MAX))]
    fn test_integer_wrap(#[case] name: &str, #[case] input: i128, #[case] expected: NativeValue) {
        assert_eq!(encode_scalar(&Value::Int(input), &ty(name)).unwrap(), expected);
    }

    #[test]
    fn test_float_truncates_to_int() {
        assert_eq!(
            encode_scalar(&Value::Float(-3.9), &ty("int")).unwrap(),
            NativeValue::I32(-3)
        );
    }

    #[test]
    fn test_int_widens_to_float() {
        assert_eq!(
            encode_scalar(&Value::Int(2), &ty("double")).unwrap(),
            NativeValue::F64(2.0)
        );
    }

    #[test]
    fn test_bool_requires_bool() {
        let err = encode_scalar(&Value::Int(1), &ty("bool")).unwrap_err();
        assert_eq!(
            err,
            MarshalError::TypeMismatch {
                expected: "bool".to_string(),
                got: "integer".to_string()
            }
        );
    }

    #[test]
    fn test_nil_is_null_pointer() {
        assert_eq!(
            encode_scalar(&Value::Nil, &ty("pointer")).unwrap(),
            NativeValue::Pointer(0)
        );
    }

    #[test]
    fn test_decode_scalar_sign_extends() {
        let byte = 0x80u8;
        let value = unsafe { decode_scalar(Pointer::from_ptr(&byte as *const u8), &ty("char")) };
        assert_eq!(value.unwrap(), Value::Int(-128));
        let value = unsafe { decode_scalar(Pointer::from_ptr(&byte as *const u8), &ty("uchar")) };
        assert_eq!(value.unwrap(), Value::Int(128));
    }

    #[test]
    fn test_write_return_widens() {
        let mut slot = 0usize;
        let dst = Pointer::from(&mut slot as *mut usize);

        unsafe { NativeValue::I8(-1).write_return(dst) };
        assert_eq!(slot, usize::MAX);

        unsafe { NativeValue::U8(0xff).write_return(dst) };
        assert_eq!(slot, 0xff);
    }

    #[test]
    fn test_write_to_is_natural_width() {
        let mut slot = [0u8; 4];
        let dst = Pointer::from(slot.as_mut_ptr());
        unsafe { NativeValue::I16(-2).write_to(dst) };
        assert_eq!(i16::from_ne_bytes([slot[0], slot[1]]), -2);
        assert_eq!(&slot[2..], &[0, 0]);
    }
}
