//! Raw bindings to the Win32, OLE Automation and CLR hosting entry points used by the backend.

#![allow(non_snake_case)]

use std::ffi::c_void;

use uguid::Guid;

pub type HRESULT = i32;
pub type HANDLE = *mut c_void;
pub type BOOL = i32;
pub type BSTR = *mut u16;

pub const S_OK: HRESULT = 0;
pub const S_FALSE: HRESULT = 1;

pub const STD_OUTPUT_HANDLE: u32 = -11_i32 as u32;
pub const STD_ERROR_HANDLE: u32 = -12_i32 as u32;
pub const INVALID_HANDLE_VALUE: HANDLE = -1_isize as HANDLE;

pub const VT_NULL: u16 = 1;
pub const VT_BSTR: u16 = 8;
pub const VT_VARIANT: u16 = 12;
pub const VT_UI1: u16 = 17;
pub const VT_ARRAY: u16 = 0x2000;

/// Returns true for a failing `HRESULT`
pub fn failed(hr: HRESULT) -> bool {
    hr < 0
}

/// Opaque `SAFEARRAY` descriptor
#[repr(C)]
pub struct SafeArray {
    _private: [u8; 0],
}

/// `SAFEARRAYBOUND`
#[repr(C)]
pub struct SafeArrayBound {
    pub elements: u32,
    pub lower_bound: i32,
}

/// `VARIANT`, sized for both 32 and 64 bit targets
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Variant {
    pub vt: u16,
    pub reserved1: u16,
    pub reserved2: u16,
    pub reserved3: u16,
    pub val: usize,
    pub val2: usize,
}

impl Variant {
    pub fn empty() -> Self {
        Variant {
            vt: 0,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            val: 0,
            val2: 0,
        }
    }

    pub fn null() -> Self {
        Variant {
            vt: VT_NULL,
            ..Self::empty()
        }
    }
}

#[link(name = "mscoree")]
extern "system" {
    pub fn CLRCreateInstance(clsid: *const Guid, riid: *const Guid, out: *mut *mut c_void)
        -> HRESULT;
}

#[link(name = "oleaut32")]
extern "system" {
    pub fn SafeArrayCreate(vt: u16, dims: u32, bounds: *const SafeArrayBound) -> *mut SafeArray;
    pub fn SafeArrayCreateVector(vt: u16, lower_bound: i32, elements: u32) -> *mut SafeArray;
    pub fn SafeArrayAccessData(array: *mut SafeArray, data: *mut *mut c_void) -> HRESULT;
    pub fn SafeArrayUnaccessData(array: *mut SafeArray) -> HRESULT;
    pub fn SafeArrayPutElement(
        array: *mut SafeArray,
        indices: *const i32,
        value: *const c_void,
    ) -> HRESULT;
    pub fn SafeArrayDestroy(array: *mut SafeArray) -> HRESULT;
    pub fn SysAllocString(text: *const u16) -> BSTR;
    pub fn SysFreeString(text: BSTR);
    pub fn VariantClear(variant: *mut Variant) -> HRESULT;
}

#[link(name = "kernel32")]
extern "system" {
    pub fn CreatePipe(
        read: *mut HANDLE,
        write: *mut HANDLE,
        attributes: *const c_void,
        size: u32,
    ) -> BOOL;
    pub fn ReadFile(
        file: HANDLE,
        buffer: *mut c_void,
        to_read: u32,
        read: *mut u32,
        overlapped: *mut c_void,
    ) -> BOOL;
    pub fn WriteFile(
        file: HANDLE,
        buffer: *const c_void,
        to_write: u32,
        written: *mut u32,
        overlapped: *mut c_void,
    ) -> BOOL;
    pub fn GetStdHandle(std_handle: u32) -> HANDLE;
    pub fn SetStdHandle(std_handle: u32, handle: HANDLE) -> BOOL;
    pub fn CloseHandle(handle: HANDLE) -> BOOL;
    pub fn GetLastError() -> u32;
}
