//! Minimal COM interface plumbing for CLR hosting.
//!
//! Only the vtable slots the backend calls are typed; every other slot is kept as a pointer
//! sized placeholder so the typed slots land at their documented offsets. The layouts follow
//! `metahost.h`, `mscoree.h` and the `mscorlib` type library (`_AppDomain`, `_Assembly`,
//! `_MethodInfo` are dual interfaces and start with the four `IDispatch` slots).

use std::{ffi::c_void, marker::PhantomData, ptr::NonNull};

use uguid::{guid, Guid};

use super::ffi::{SafeArray, Variant, BOOL, BSTR, HRESULT};

pub const CLSID_CLR_META_HOST: Guid = guid!("9280188d-0e8e-4867-b30c-7fa83884e8de");
pub const IID_ICLR_META_HOST: Guid = guid!("d332db9e-b9b3-4125-8207-a14884f53216");
pub const IID_ICLR_RUNTIME_INFO: Guid = guid!("bd39d1d2-ba2f-486a-89b0-b4b0cb466891");
pub const CLSID_COR_RUNTIME_HOST: Guid = guid!("cb2f6723-ab3a-11d2-9c40-00c04fa30a3e");
pub const IID_ICOR_RUNTIME_HOST: Guid = guid!("cb2f6722-ab3a-11d2-9c40-00c04fa30a3e");
pub const IID_APP_DOMAIN: Guid = guid!("05f696dc-2b29-3663-ad8b-c4389cf2a713");
pub const IID_ASSEMBLY: Guid = guid!("17156360-2f1a-384a-bc52-fde93c215c5b");
pub const IID_METHOD_INFO: Guid = guid!("ffcc1b5d-ecb8-38dd-9b01-3dc8abc2aa5f");
pub const IID_IUNKNOWN: Guid = guid!("00000000-0000-0000-c000-000000000046");
pub const IID_IENUM_UNKNOWN: Guid = guid!("00000100-0000-0000-c000-000000000046");

type Slot = usize;

#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
}

#[repr(C)]
pub struct ICLRMetaHostVtbl {
    pub base: IUnknownVtbl,
    pub get_runtime: unsafe extern "system" fn(
        *mut c_void,
        *const u16,
        *const Guid,
        *mut *mut c_void,
    ) -> HRESULT,
    pub get_version_from_file: Slot,
    pub enumerate_installed_runtimes:
        unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HRESULT,
}

#[repr(C)]
pub struct IEnumUnknownVtbl {
    pub base: IUnknownVtbl,
    pub next: unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void, *mut u32) -> HRESULT,
}

#[repr(C)]
pub struct ICLRRuntimeInfoVtbl {
    pub base: IUnknownVtbl,
    pub get_version_string: unsafe extern "system" fn(*mut c_void, *mut u16, *mut u32) -> HRESULT,
    pub get_runtime_directory: Slot,
    pub is_loaded: Slot,
    pub load_error_string: Slot,
    pub load_library: Slot,
    pub get_proc_address: Slot,
    pub get_interface: unsafe extern "system" fn(
        *mut c_void,
        *const Guid,
        *const Guid,
        *mut *mut c_void,
    ) -> HRESULT,
    pub is_loadable: unsafe extern "system" fn(*mut c_void, *mut BOOL) -> HRESULT,
}

#[repr(C)]
pub struct ICorRuntimeHostVtbl {
    pub base: IUnknownVtbl,
    /// `CreateLogicalThreadState` through `GetConfiguration`
    pub logical_threads: [Slot; 7],
    pub start: unsafe extern "system" fn(*mut c_void) -> HRESULT,
    pub stop: unsafe extern "system" fn(*mut c_void) -> HRESULT,
    pub create_domain: Slot,
    pub get_default_domain: unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HRESULT,
}

#[repr(C)]
pub struct AppDomainVtbl {
    pub base: IUnknownVtbl,
    pub dispatch: [Slot; 4],
    /// `get_ToString` through `Load_2`
    pub members: [Slot; 38],
    pub load_3: unsafe extern "system" fn(*mut c_void, *mut SafeArray, *mut *mut c_void) -> HRESULT,
}

#[repr(C)]
pub struct AssemblyVtbl {
    pub base: IUnknownVtbl,
    pub dispatch: [Slot; 4],
    /// `get_ToString` through `get_FullName`
    pub members: [Slot; 9],
    pub get_entry_point: unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HRESULT,
}

#[repr(C)]
pub struct MethodInfoVtbl {
    pub base: IUnknownVtbl,
    pub dispatch: [Slot; 4],
    pub get_to_string: unsafe extern "system" fn(*mut c_void, *mut BSTR) -> HRESULT,
    /// `Equals` through `get_IsConstructor`
    pub members: [Slot; 29],
    pub invoke_3: unsafe extern "system" fn(
        *mut c_void,
        Variant,
        *mut SafeArray,
        *mut Variant,
    ) -> HRESULT,
}

/// A COM interface: its identifier and vtable layout.
pub trait Interface {
    type Vtbl;
    const IID: Guid;
}

macro_rules! com_interface {
    ($name:ident, $vtbl:ty, $iid:expr) => {
        pub enum $name {}

        impl Interface for $name {
            type Vtbl = $vtbl;
            const IID: Guid = $iid;
        }
    };
}

com_interface!(IUnknown, IUnknownVtbl, IID_IUNKNOWN);
com_interface!(ICLRMetaHost, ICLRMetaHostVtbl, IID_ICLR_META_HOST);
com_interface!(IEnumUnknown, IEnumUnknownVtbl, IID_IENUM_UNKNOWN);
com_interface!(ICLRRuntimeInfo, ICLRRuntimeInfoVtbl, IID_ICLR_RUNTIME_INFO);
com_interface!(ICorRuntimeHost, ICorRuntimeHostVtbl, IID_ICOR_RUNTIME_HOST);
com_interface!(AppDomain, AppDomainVtbl, IID_APP_DOMAIN);
com_interface!(Assembly, AssemblyVtbl, IID_ASSEMBLY);
com_interface!(MethodInfo, MethodInfoVtbl, IID_METHOD_INFO);

/// An owned reference to a COM interface; dropping it calls `Release`.
pub struct ComPtr<I: Interface> {
    ptr: NonNull<c_void>,
    _interface: PhantomData<I>,
}

// SAFETY: the CLR hosting and reflection objects are free-threaded, and `Release` may be
// called from any thread.
unsafe impl<I: Interface> Send for ComPtr<I> {}
unsafe impl<I: Interface> Sync for ComPtr<I> {}

impl<I: Interface> ComPtr<I> {
    /// Takes ownership of one reference held by `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a valid pointer to an object implementing `I`, carrying a
    /// reference the caller gives up.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(|ptr| ComPtr {
            ptr,
            _interface: PhantomData,
        })
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn vtbl(&self) -> &I::Vtbl {
        // SAFETY: every COM object starts with a pointer to its vtable, which lives at least as
        // long as the object
        unsafe { &**(self.ptr.as_ptr() as *const *const I::Vtbl) }
    }

    fn unknown(&self) -> &IUnknownVtbl {
        // SAFETY: every vtable starts with the IUnknown slots
        unsafe { &**(self.ptr.as_ptr() as *const *const IUnknownVtbl) }
    }

    /// Queries the object for interface `T`.
    pub fn cast<T: Interface>(&self) -> Result<ComPtr<T>, HRESULT> {
        let mut out = std::ptr::null_mut();
        // SAFETY: QueryInterface is valid on every live COM object
        let hr = unsafe { (self.unknown().query_interface)(self.as_raw(), &T::IID, &mut out) };
        if hr < 0 {
            return Err(hr);
        }
        // SAFETY: a successful QueryInterface returns an AddRef'd pointer to T
        unsafe { ComPtr::from_raw(out) }.ok_or(hr)
    }

    /// Releases the reference and returns the remaining reference count.
    pub fn release(self) -> u32 {
        // SAFETY: self owns exactly one reference
        let remaining = unsafe { (self.unknown().release)(self.as_raw()) };
        std::mem::forget(self);
        remaining
    }
}

impl<I: Interface> Drop for ComPtr<I> {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference
        unsafe {
            (self.unknown().release)(self.as_raw());
        }
    }
}
