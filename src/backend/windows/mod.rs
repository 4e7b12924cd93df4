//! CLR hosting through `mscoree.dll`.
//!
//! The backend follows the classic in-memory hosting sequence:
//!
//! 1. `CLRCreateInstance` yields the `ICLRMetaHost`
//! 2. the installed runtimes are enumerated and the first one whose version string contains
//!    the requested selector is picked (falling back to the last one enumerated)
//! 3. `ICLRRuntimeInfo::IsLoadable` is checked and `ICorRuntimeHost` is started
//! 4. assemblies are loaded from a `SAFEARRAY` of bytes with `_AppDomain::Load_3` on the
//!    default domain, and their `_Assembly::get_EntryPoint` becomes the method handle
//! 5. `_MethodInfo::Invoke_3` runs the entry point, with a `string[]` argument unless the
//!    signature takes no parameters
//!
//! Nothing touches the disk; the assembly only ever exists in memory.

mod com;
mod ffi;
mod pipes;

use std::{ffi::c_void, ptr};

use widestring::{U16CStr, U16CString};

use com::{
    AppDomain, Assembly, ComPtr, ICLRMetaHost, ICLRRuntimeInfo, ICorRuntimeHost, IEnumUnknown,
    IUnknown, MethodInfo, CLSID_CLR_META_HOST, CLSID_COR_RUNTIME_HOST, IID_ICLR_META_HOST,
    IID_ICOR_RUNTIME_HOST,
};
use ffi::{
    failed, CLRCreateInstance, SafeArray, SafeArrayAccessData, SafeArrayBound, SafeArrayCreate,
    SafeArrayCreateVector, SafeArrayDestroy, SafeArrayPutElement, SafeArrayUnaccessData,
    SysAllocString, SysFreeString, Variant, VariantClear, BSTR, HRESULT, S_FALSE, VT_ARRAY,
    VT_BSTR, VT_UI1, VT_VARIANT,
};

use super::{CapturedOutput, ClrBackend};
use crate::{Error, Result};

use super::capture::OutputCapture;
use pipes::Win32Pipes;

fn check(call: &'static str, hr: HRESULT) -> Result<()> {
    if failed(hr) {
        Err(hresult_error!(call, hr as u32))
    } else {
        Ok(())
    }
}

/// Takes ownership of an interface pointer returned through an out parameter.
fn owned<I: com::Interface>(
    call: &'static str,
    hr: HRESULT,
    raw: *mut c_void,
) -> Result<ComPtr<I>> {
    check(call, hr)?;
    // SAFETY: a successful call returned a referenced pointer to I (or null)
    unsafe { ComPtr::from_raw(raw) }
        .ok_or_else(|| Error::Error(format!("{call} returned a null interface")))
}

/// Converts a `BSTR` to a `String` and frees it.
///
/// # Safety
///
/// `bstr` must be null or a `BSTR` the caller owns.
unsafe fn take_bstr(bstr: BSTR) -> String {
    if bstr.is_null() {
        return String::new();
    }
    let text = U16CStr::from_ptr_str(bstr).to_string_lossy();
    SysFreeString(bstr);
    text
}

/// A `SAFEARRAY` destroyed on drop.
struct SafeArrayGuard(*mut SafeArray);

impl SafeArrayGuard {
    fn new(call: &'static str, array: *mut SafeArray) -> Result<Self> {
        if array.is_null() {
            return Err(Error::Error(format!("{call} could not allocate")));
        }
        Ok(SafeArrayGuard(array))
    }

    fn bytes(data: &[u8]) -> Result<Self> {
        let bound = SafeArrayBound {
            elements: data.len() as u32,
            lower_bound: 0,
        };
        // SAFETY: bound describes one dimension
        let array = Self::new("SafeArrayCreate", unsafe { SafeArrayCreate(VT_UI1, 1, &bound) })?;

        let mut target = ptr::null_mut();
        // SAFETY: array is a live one-dimensional UI1 array of data.len() elements
        unsafe {
            check(
                "SafeArrayAccessData",
                SafeArrayAccessData(array.0, &mut target),
            )?;
            ptr::copy_nonoverlapping(data.as_ptr(), target as *mut u8, data.len());
            check("SafeArrayUnaccessData", SafeArrayUnaccessData(array.0))?;
        }
        Ok(array)
    }

    /// Packs `args` as the single `string[]` parameter of an entry point.
    fn parameters(args: &[String]) -> Result<Self> {
        // SAFETY: creating a vector has no preconditions
        let strings = Self::new("SafeArrayCreateVector", unsafe {
            SafeArrayCreateVector(VT_BSTR, 0, args.len() as u32)
        })?;

        for (index, arg) in args.iter().enumerate() {
            let wide = U16CString::from_str(arg)
                .map_err(|_| Error::Error(format!("argument {index} contains a NUL")))?;
            let index = index as i32;
            // SAFETY: SafeArrayPutElement copies the BSTR, so ours is freed right after
            unsafe {
                let bstr = SysAllocString(wide.as_ptr());
                let hr = SafeArrayPutElement(strings.0, &index, bstr as *const c_void);
                SysFreeString(bstr);
                check("SafeArrayPutElement", hr)?;
            }
        }

        let wrapped = Variant {
            vt: VT_ARRAY | VT_BSTR,
            val: strings.0 as usize,
            ..Variant::empty()
        };
        // SAFETY: creating a vector has no preconditions
        let parameters = Self::new("SafeArrayCreateVector", unsafe {
            SafeArrayCreateVector(VT_VARIANT, 0, 1)
        })?;
        let index = 0_i32;
        // SAFETY: the variant is deep-copied into the array; `strings` stays owned by its guard
        unsafe {
            check(
                "SafeArrayPutElement",
                SafeArrayPutElement(parameters.0, &index, &wrapped as *const _ as *const c_void),
            )?;
        }
        Ok(parameters)
    }
}

impl Drop for SafeArrayGuard {
    fn drop(&mut self) {
        // SAFETY: the guard owns the array
        unsafe {
            SafeArrayDestroy(self.0);
        }
    }
}

/// A started `ICorRuntimeHost`
pub struct ClrHost(ComPtr<ICorRuntimeHost>);

impl ClrHost {
    fn default_domain(&self) -> Result<ComPtr<AppDomain>> {
        let mut unknown = ptr::null_mut();
        // SAFETY: the host is started and unknown is valid for writes
        let hr = unsafe { (self.0.vtbl().get_default_domain)(self.0.as_raw(), &mut unknown) };
        let unknown: ComPtr<IUnknown> = owned("ICorRuntimeHost::GetDefaultDomain", hr, unknown)?;
        unknown
            .cast::<AppDomain>()
            .map_err(|hr| hresult_error!("IUnknown::QueryInterface(_AppDomain)", hr as u32))
    }
}

/// The resolved entry point of a loaded assembly
pub struct ClrMethod(ComPtr<MethodInfo>);

impl ClrMethod {
    /// The reflection signature, e.g. `Void Main(System.String[])`
    fn signature(&self) -> Result<String> {
        let mut bstr = ptr::null_mut();
        // SAFETY: bstr is valid for writes; ownership of the result moves to us
        let hr = unsafe { (self.0.vtbl().get_to_string)(self.0.as_raw(), &mut bstr) };
        check("_MethodInfo::get_ToString", hr)?;
        // SAFETY: the BSTR was returned to us
        Ok(unsafe { take_bstr(bstr) })
    }

    fn invoke(&self, args: &[String]) -> Result<()> {
        let parameters = if self.signature()?.ends_with("()") {
            None
        } else {
            Some(SafeArrayGuard::parameters(args)?)
        };
        let parameters = parameters.as_ref().map_or(ptr::null_mut(), |array| array.0);

        let mut result = Variant::empty();
        // SAFETY: parameters is null or a live SAFEARRAY of VARIANT; result is valid for writes
        let hr = unsafe {
            let hr = (self.0.vtbl().invoke_3)(
                self.0.as_raw(),
                Variant::null(),
                parameters,
                &mut result,
            );
            VariantClear(&mut result);
            hr
        };
        check("_MethodInfo::Invoke_3", hr)
    }
}

/// Hosts the .NET Framework CLR in the current process.
///
/// # Examples
///
/// ```rust,ignore
/// use clrloader::{ClrConfig, RuntimeContext, WindowsBackend};
///
/// let context = RuntimeContext::new(WindowsBackend::new());
/// let output = context.load(&std::fs::read("hello.exe")?, &["world"], &ClrConfig::v4())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct WindowsBackend {
    capture: OutputCapture<Win32Pipes>,
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsBackend {
    /// Creates a backend; nothing native happens until the runtime is started
    pub fn new() -> Self {
        WindowsBackend {
            capture: OutputCapture::new(Win32Pipes),
        }
    }

    fn select_runtime(
        meta_host: &ComPtr<ICLRMetaHost>,
        version: &str,
    ) -> Result<ComPtr<ICLRRuntimeInfo>> {
        let mut raw = ptr::null_mut();
        // SAFETY: raw is valid for writes
        let hr = unsafe {
            (meta_host.vtbl().enumerate_installed_runtimes)(meta_host.as_raw(), &mut raw)
        };
        let runtimes: ComPtr<IEnumUnknown> =
            owned("ICLRMetaHost::EnumerateInstalledRuntimes", hr, raw)?;

        let mut selected = None;
        loop {
            let mut item = ptr::null_mut();
            let mut fetched = 0;
            // SAFETY: one element is requested into item
            let hr =
                unsafe { (runtimes.vtbl().next)(runtimes.as_raw(), 1, &mut item, &mut fetched) };
            check("IEnumUnknown::Next", hr)?;
            if hr == S_FALSE || fetched == 0 {
                break;
            }

            let item: ComPtr<IUnknown> = owned("IEnumUnknown::Next", hr, item)?;
            let info = item.cast::<ICLRRuntimeInfo>().map_err(|hr| {
                hresult_error!("IUnknown::QueryInterface(ICLRRuntimeInfo)", hr as u32)
            })?;

            let matches = runtime_version(&info)?.contains(version);
            selected = Some(info);
            if matches {
                break;
            }
        }

        selected.ok_or_else(|| Error::Runtime {
            runtime: version.to_string(),
            message: "no runtime is installed".to_string(),
        })
    }
}

fn runtime_version(info: &ComPtr<ICLRRuntimeInfo>) -> Result<String> {
    let mut buffer = [0_u16; 64];
    let mut len = buffer.len() as u32;
    // SAFETY: buffer holds len UTF-16 units
    let hr =
        unsafe { (info.vtbl().get_version_string)(info.as_raw(), buffer.as_mut_ptr(), &mut len) };
    check("ICLRRuntimeInfo::GetVersionString", hr)?;
    Ok(U16CStr::from_slice_truncate(&buffer)
        .map(U16CStr::to_string_lossy)
        .unwrap_or_default())
}

fn create_meta_host() -> Result<ComPtr<ICLRMetaHost>> {
    let mut raw = ptr::null_mut();
    // SAFETY: the GUIDs are valid and raw is valid for writes
    let hr = unsafe { CLRCreateInstance(&CLSID_CLR_META_HOST, &IID_ICLR_META_HOST, &mut raw) };
    owned("CLRCreateInstance", hr, raw)
}

impl ClrBackend for WindowsBackend {
    type Host = ClrHost;
    type AppDomain = ComPtr<AppDomain>;
    type Method = ClrMethod;
    type MetaHost = ComPtr<ICLRMetaHost>;

    fn start_runtime(&self, version: &str) -> Result<ClrHost> {
        let meta_host = create_meta_host()?;
        let info = Self::select_runtime(&meta_host, version)?;

        let mut loadable = 0;
        // SAFETY: loadable is valid for writes
        let hr = unsafe { (info.vtbl().is_loadable)(info.as_raw(), &mut loadable) };
        check("ICLRRuntimeInfo::IsLoadable", hr)?;
        if loadable == 0 {
            return Err(Error::Runtime {
                runtime: version.to_string(),
                message: format!("{} is not loadable", runtime_version(&info)?),
            });
        }

        let mut raw = ptr::null_mut();
        // SAFETY: the GUIDs are valid and raw is valid for writes
        let hr = unsafe {
            (info.vtbl().get_interface)(
                info.as_raw(),
                &CLSID_COR_RUNTIME_HOST,
                &IID_ICOR_RUNTIME_HOST,
                &mut raw,
            )
        };
        let host: ComPtr<ICorRuntimeHost> = owned("ICLRRuntimeInfo::GetInterface", hr, raw)?;

        // SAFETY: the host interface is live
        check("ICorRuntimeHost::Start", unsafe {
            (host.vtbl().start)(host.as_raw())
        })?;
        Ok(ClrHost(host))
    }

    fn redirect_output(&self) -> Result<()> {
        self.capture.redirect()
    }

    fn load_assembly(&self, host: &ClrHost, bytes: &[u8]) -> Result<ClrMethod> {
        if bytes.is_empty() {
            return Err(Error::LoadFailure("assembly buffer is empty".to_string()));
        }

        let load = || -> Result<Option<ComPtr<MethodInfo>>> {
            let domain = host.default_domain()?;
            let image = SafeArrayGuard::bytes(bytes)?;

            let mut raw = ptr::null_mut();
            // SAFETY: image is a live UI1 SAFEARRAY and raw is valid for writes
            let hr = unsafe { (domain.vtbl().load_3)(domain.as_raw(), image.0, &mut raw) };
            let assembly: ComPtr<Assembly> = owned("_AppDomain::Load_3", hr, raw)?;

            let mut raw = ptr::null_mut();
            // SAFETY: raw is valid for writes
            let hr = unsafe { (assembly.vtbl().get_entry_point)(assembly.as_raw(), &mut raw) };
            check("_Assembly::get_EntryPoint", hr)?;
            // SAFETY: a successful call returned a referenced _MethodInfo (null for libraries)
            Ok(unsafe { ComPtr::from_raw(raw) })
        };

        match load() {
            Ok(Some(method)) => Ok(ClrMethod(method)),
            Ok(None) => Err(Error::LoadFailure("assembly has no entry point".to_string())),
            Err(error) => Err(Error::LoadFailure(error.to_string())),
        }
    }

    fn invoke(&self, method: &ClrMethod, args: &[String]) -> CapturedOutput {
        let (result, mut output) = self.capture.capture(|| method.invoke(args));
        if let Err(error) = result {
            if !output.stderr.is_empty() && !output.stderr.ends_with('\n') {
                output.stderr.push('\n');
            }
            output.stderr.push_str(&error.to_string());
        }
        output
    }

    fn app_domain(&self, host: &ClrHost) -> Result<ComPtr<AppDomain>> {
        host.default_domain()
    }

    fn meta_host(&self) -> Result<ComPtr<ICLRMetaHost>> {
        create_meta_host()
    }

    fn release_app_domain(&self, domain: ComPtr<AppDomain>) -> Result<()> {
        domain.release();
        Ok(())
    }

    fn release_host(&self, host: ClrHost) -> Result<()> {
        host.0.release();
        Ok(())
    }

    fn release_method(&self, method: ClrMethod) -> Result<()> {
        method.0.release();
        Ok(())
    }

    fn release_meta_host(&self, meta_host: ComPtr<ICLRMetaHost>) -> Result<()> {
        meta_host.release();
        Ok(())
    }
}
