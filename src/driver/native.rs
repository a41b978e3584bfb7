//! Runtime binding to the vendor's `tisgrabber` DLL.
//!
//! The DLL (and its companion `TIS_UDSHL10_x64.dll`) is loaded with
//! `libloading` and every entry point is resolved up front, so a missing
//! export fails at load time instead of mid-acquisition.

#![allow(unsafe_code)]

use super::{
    availability, check, check_copy, CameraProperty, ColorFormat, DriverError, DriverResult, GrabberDriver, ImageDescription,
    SnapTimeout, VideoProperty, IC_ERROR,
};
use libloading::Library;
use std::ffi::{CStr, CString, OsStr};
use std::fmt;
use std::os::raw::{c_char, c_float, c_int, c_long, c_uchar, c_uint};
use std::ptr::{self, NonNull};

/// File name of the 64-bit vendor library.
pub const DEFAULT_LIBRARY: &str = "tisgrabber_x64.dll";

#[repr(C)]
struct GrabberHandleT {
    unused: c_int,
}

type HGrabber = *mut GrabberHandleT;

/// Opaque `HGRABBER` issued by the vendor library.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NativeGrabber(NonNull<GrabberHandleT>);

impl fmt::Debug for NativeGrabber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HGRABBER({:p})", self.0.as_ptr())
    }
}

impl NativeGrabber {
    fn raw(self) -> HGrabber {
        self.0.as_ptr()
    }
}

struct Api {
    init_library: unsafe extern "system" fn(*const c_char) -> c_int,
    get_device_count: unsafe extern "system" fn() -> c_int,
    get_unique_name_from_list: unsafe extern "system" fn(c_int) -> *const c_char,
    create_grabber: unsafe extern "system" fn() -> HGrabber,
    release_grabber: unsafe extern "system" fn(*mut HGrabber),
    open_dev_by_unique_name: unsafe extern "system" fn(HGrabber, *const c_char) -> c_int,
    is_dev_valid: unsafe extern "system" fn(HGrabber) -> c_int,
    start_live: unsafe extern "system" fn(HGrabber, c_int) -> c_int,
    stop_live: unsafe extern "system" fn(HGrabber),
    remove_overlay: unsafe extern "system" fn(HGrabber, c_int) -> c_int,
    get_format: unsafe extern "system" fn(HGrabber) -> c_int,
    set_format: unsafe extern "system" fn(HGrabber, c_int) -> c_int,
    get_auto_camera_property: unsafe extern "system" fn(HGrabber, c_int, *mut c_int) -> c_int,
    enable_auto_camera_property: unsafe extern "system" fn(HGrabber, c_int, c_int) -> c_int,
    get_exp_abs_val_range: unsafe extern "system" fn(HGrabber, *mut c_float, *mut c_float) -> c_int,
    get_exp_abs_val: unsafe extern "system" fn(HGrabber, *mut c_float) -> c_int,
    set_exp_abs_val: unsafe extern "system" fn(HGrabber, c_float) -> c_int,
    get_auto_video_property: unsafe extern "system" fn(HGrabber, c_int, *mut c_int) -> c_int,
    enable_auto_video_property: unsafe extern "system" fn(HGrabber, c_int, c_int) -> c_int,
    video_property_get_range:
        unsafe extern "system" fn(HGrabber, c_uint, *mut c_long, *mut c_long) -> c_int,
    get_video_property: unsafe extern "system" fn(HGrabber, c_uint, *mut c_long) -> c_int,
    set_video_property: unsafe extern "system" fn(HGrabber, c_uint, c_long) -> c_int,
    get_video_format_count: unsafe extern "system" fn(HGrabber) -> c_int,
    get_video_format: unsafe extern "system" fn(HGrabber, c_int) -> *const c_char,
    set_video_format: unsafe extern "system" fn(HGrabber, *const c_char) -> c_int,
    get_image_description:
        unsafe extern "system" fn(HGrabber, *mut c_long, *mut c_long, *mut c_int, *mut c_int) -> c_int,
    is_trigger_available: unsafe extern "system" fn(HGrabber) -> c_int,
    enable_trigger: unsafe extern "system" fn(HGrabber, c_int) -> c_int,
    software_trigger: unsafe extern "system" fn(HGrabber) -> c_int,
    snap_image: unsafe extern "system" fn(HGrabber, c_int) -> c_int,
    get_image_ptr: unsafe extern "system" fn(HGrabber) -> *mut c_uchar,
}

/// Resolves one export. The returned pointer is valid while `lib` is loaded.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> DriverResult<T> {
    let mut cname = Vec::with_capacity(name.len() + 1);
    cname.extend_from_slice(name.as_bytes());
    cname.push(0);
    // SAFETY: caller guarantees `T` matches the export's signature.
    unsafe { lib.get::<T>(&cname) }
        .map(|s| *s)
        .map_err(|e| DriverError::Load(format!("{name}: {e}")))
}

impl Api {
    unsafe fn resolve(lib: &Library) -> DriverResult<Self> {
        // SAFETY: signatures follow tisgrabber.h for the x64 build.
        unsafe {
            Ok(Self {
                init_library: symbol(lib, "IC_InitLibrary")?,
                get_device_count: symbol(lib, "IC_GetDeviceCount")?,
                get_unique_name_from_list: symbol(lib, "IC_GetUniqueNamefromList")?,
                create_grabber: symbol(lib, "IC_CreateGrabber")?,
                release_grabber: symbol(lib, "IC_ReleaseGrabber")?,
                open_dev_by_unique_name: symbol(lib, "IC_OpenDevByUniqueName")?,
                is_dev_valid: symbol(lib, "IC_IsDevValid")?,
                start_live: symbol(lib, "IC_StartLive")?,
                stop_live: symbol(lib, "IC_StopLive")?,
                remove_overlay: symbol(lib, "IC_RemoveOverlay")?,
                get_format: symbol(lib, "IC_GetFormat")?,
                set_format: symbol(lib, "IC_SetFormat")?,
                get_auto_camera_property: symbol(lib, "IC_GetAutoCameraProperty")?,
                enable_auto_camera_property: symbol(lib, "IC_EnableAutoCameraProperty")?,
                get_exp_abs_val_range: symbol(lib, "IC_GetExpAbsValRange")?,
                get_exp_abs_val: symbol(lib, "IC_GetExpAbsVal")?,
                set_exp_abs_val: symbol(lib, "IC_SetExpAbsVal")?,
                get_auto_video_property: symbol(lib, "IC_GetAutoVideoProperty")?,
                enable_auto_video_property: symbol(lib, "IC_EnableAutoVideoProperty")?,
                video_property_get_range: symbol(lib, "IC_VideoPropertyGetRange")?,
                get_video_property: symbol(lib, "IC_GetVideoProperty")?,
                set_video_property: symbol(lib, "IC_SetVideoProperty")?,
                get_video_format_count: symbol(lib, "IC_GetVideoFormatCount")?,
                get_video_format: symbol(lib, "IC_GetVideoFormat")?,
                set_video_format: symbol(lib, "IC_SetVideoFormat")?,
                get_image_description: symbol(lib, "IC_GetImageDescription")?,
                is_trigger_available: symbol(lib, "IC_IsTriggerAvailable")?,
                enable_trigger: symbol(lib, "IC_EnableTrigger")?,
                software_trigger: symbol(lib, "IC_SoftwareTrigger")?,
                snap_image: symbol(lib, "IC_SnapImage")?,
                get_image_ptr: symbol(lib, "IC_GetImagePtr")?,
            })
        }
    }
}

/// The vendor library, loaded at runtime.
pub struct TisGrabber {
    api: Api,
    // Keeps the resolved function pointers alive; dropped last.
    _library: Library,
}

impl fmt::Debug for TisGrabber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TisGrabber").finish_non_exhaustive()
    }
}

impl TisGrabber {
    /// Loads the vendor library from `path` (a file name is searched on
    /// the platform's DLL search path).
    pub fn load(path: impl AsRef<OsStr>) -> DriverResult<Self> {
        let path = path.as_ref();
        tracing::debug!(library = ?path, "Loading vendor library");
        // SAFETY: loading runs the DLL's initialisers; tisgrabber has no
        // load-time requirements beyond its companion DLL being present.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            DriverError::Load(format!(
                "{} ({e}); TIS_UDSHL10_x64.dll is also required",
                path.to_string_lossy()
            ))
        })?;
        // SAFETY: symbols are only called while `library` is loaded.
        let api = unsafe { Api::resolve(&library)? };
        Ok(Self {
            api,
            _library: library,
        })
    }

    /// Loads [`DEFAULT_LIBRARY`].
    pub fn load_default() -> DriverResult<Self> {
        Self::load(DEFAULT_LIBRARY)
    }
}

fn owned_string(call: &'static str, ptr: *const c_char) -> DriverResult<String> {
    if ptr.is_null() {
        return Err(DriverError::NullResult { call });
    }
    // SAFETY: the vendor returns NUL-terminated strings owned by the library.
    Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

fn c_string(call: &'static str, s: &str) -> DriverResult<CString> {
    CString::new(s).map_err(|_| DriverError::Call { call, code: IC_ERROR })
}

// SAFETY (all calls below): every HGRABBER passed in was issued by
// `create_grabber` on this library and not yet released, out-pointers
// reference live stack locals, and string arguments are NUL-terminated.
impl GrabberDriver for TisGrabber {
    type Grabber = NativeGrabber;

    fn init(&mut self) -> DriverResult<()> {
        check("IC_InitLibrary", unsafe { (self.api.init_library)(ptr::null()) })
    }

    fn device_count(&mut self) -> DriverResult<usize> {
        let count = unsafe { (self.api.get_device_count)() };
        usize::try_from(count).map_err(|_| DriverError::Call {
            call: "IC_GetDeviceCount",
            code: count,
        })
    }

    fn unique_name(&mut self, index: usize) -> DriverResult<String> {
        const CALL: &str = "IC_GetUniqueNamefromList";
        let index = c_int::try_from(index).map_err(|_| DriverError::NullResult { call: CALL })?;
        owned_string(CALL, unsafe { (self.api.get_unique_name_from_list)(index) })
    }

    fn create_grabber(&mut self) -> DriverResult<NativeGrabber> {
        let raw = unsafe { (self.api.create_grabber)() };
        NonNull::new(raw)
            .map(NativeGrabber)
            .ok_or(DriverError::NullResult {
                call: "IC_CreateGrabber",
            })
    }

    fn release_grabber(&mut self, grabber: NativeGrabber) {
        let mut raw = grabber.raw();
        unsafe { (self.api.release_grabber)(&mut raw) };
    }

    fn open_by_unique_name(&mut self, grabber: NativeGrabber, name: &str) -> DriverResult<()> {
        const CALL: &str = "IC_OpenDevByUniqueName";
        let name = c_string(CALL, name)?;
        check(CALL, unsafe {
            (self.api.open_dev_by_unique_name)(grabber.raw(), name.as_ptr())
        })
    }

    fn validate_device(&mut self, grabber: NativeGrabber) -> DriverResult<()> {
        check("IC_IsDevValid", unsafe { (self.api.is_dev_valid)(grabber.raw()) })
    }

    fn start_live(&mut self, grabber: NativeGrabber) -> DriverResult<()> {
        check("IC_StartLive", unsafe { (self.api.start_live)(grabber.raw(), 0) })
    }

    fn stop_live(&mut self, grabber: NativeGrabber) {
        unsafe { (self.api.stop_live)(grabber.raw()) }
    }

    fn remove_overlay(&mut self, grabber: NativeGrabber, remove: bool) -> DriverResult<()> {
        // The vendor flag is inverted: 0 removes the overlay bitmap.
        let flag = c_int::from(!remove);
        check("IC_RemoveOverlay", unsafe {
            (self.api.remove_overlay)(grabber.raw(), flag)
        })
    }

    fn color_format(&mut self, grabber: NativeGrabber) -> DriverResult<i32> {
        Ok(unsafe { (self.api.get_format)(grabber.raw()) })
    }

    fn set_color_format(&mut self, grabber: NativeGrabber, format: ColorFormat) -> DriverResult<()> {
        check("IC_SetFormat", unsafe {
            (self.api.set_format)(grabber.raw(), format.id())
        })
    }

    fn auto_camera_property(&mut self, grabber: NativeGrabber, property: CameraProperty) -> DriverResult<bool> {
        let mut enabled: c_int = 0;
        check("IC_GetAutoCameraProperty", unsafe {
            (self.api.get_auto_camera_property)(grabber.raw(), property.id(), &mut enabled)
        })?;
        Ok(enabled != 0)
    }

    fn set_auto_camera_property(
        &mut self,
        grabber: NativeGrabber,
        property: CameraProperty,
        enable: bool,
    ) -> DriverResult<()> {
        check("IC_EnableAutoCameraProperty", unsafe {
            (self.api.enable_auto_camera_property)(grabber.raw(), property.id(), c_int::from(enable))
        })
    }

    fn exposure_range(&mut self, grabber: NativeGrabber) -> DriverResult<(f32, f32)> {
        let (mut min, mut max): (c_float, c_float) = (0.0, 0.0);
        check("IC_GetExpAbsValRange", unsafe {
            (self.api.get_exp_abs_val_range)(grabber.raw(), &mut min, &mut max)
        })?;
        Ok((min, max))
    }

    fn exposure(&mut self, grabber: NativeGrabber) -> DriverResult<f32> {
        let mut value: c_float = 0.0;
        check("IC_GetExpAbsVal", unsafe {
            (self.api.get_exp_abs_val)(grabber.raw(), &mut value)
        })?;
        Ok(value)
    }

    fn set_exposure(&mut self, grabber: NativeGrabber, seconds: f32) -> DriverResult<()> {
        check("IC_SetExpAbsVal", unsafe {
            (self.api.set_exp_abs_val)(grabber.raw(), seconds)
        })
    }

    fn auto_video_property(&mut self, grabber: NativeGrabber, property: VideoProperty) -> DriverResult<bool> {
        let mut enabled: c_int = 0;
        check("IC_GetAutoVideoProperty", unsafe {
            (self.api.get_auto_video_property)(grabber.raw(), property.id() as c_int, &mut enabled)
        })?;
        Ok(enabled != 0)
    }

    fn set_auto_video_property(
        &mut self,
        grabber: NativeGrabber,
        property: VideoProperty,
        enable: bool,
    ) -> DriverResult<()> {
        check("IC_EnableAutoVideoProperty", unsafe {
            (self.api.enable_auto_video_property)(
                grabber.raw(),
                property.id() as c_int,
                c_int::from(enable),
            )
        })
    }

    fn video_property_range(&mut self, grabber: NativeGrabber, property: VideoProperty) -> DriverResult<(i32, i32)> {
        let (mut min, mut max): (c_long, c_long) = (0, 0);
        check("IC_VideoPropertyGetRange", unsafe {
            (self.api.video_property_get_range)(grabber.raw(), property.id(), &mut min, &mut max)
        })?;
        Ok((min as i32, max as i32))
    }

    fn video_property(&mut self, grabber: NativeGrabber, property: VideoProperty) -> DriverResult<i32> {
        let mut value: c_long = 0;
        check("IC_GetVideoProperty", unsafe {
            (self.api.get_video_property)(grabber.raw(), property.id(), &mut value)
        })?;
        Ok(value as i32)
    }

    fn set_video_property(
        &mut self,
        grabber: NativeGrabber,
        property: VideoProperty,
        value: i32,
    ) -> DriverResult<()> {
        check("IC_SetVideoProperty", unsafe {
            (self.api.set_video_property)(grabber.raw(), property.id(), value as c_long)
        })
    }

    fn video_format_count(&mut self, grabber: NativeGrabber) -> DriverResult<usize> {
        let count = unsafe { (self.api.get_video_format_count)(grabber.raw()) };
        usize::try_from(count).map_err(|_| DriverError::Call {
            call: "IC_GetVideoFormatCount",
            code: count,
        })
    }

    fn video_format(&mut self, grabber: NativeGrabber, index: usize) -> DriverResult<String> {
        const CALL: &str = "IC_GetVideoFormat";
        let index = c_int::try_from(index).map_err(|_| DriverError::NullResult { call: CALL })?;
        owned_string(CALL, unsafe {
            (self.api.get_video_format)(grabber.raw(), index)
        })
    }

    fn set_video_format(&mut self, grabber: NativeGrabber, format: &str) -> DriverResult<()> {
        const CALL: &str = "IC_SetVideoFormat";
        let format = c_string(CALL, format)?;
        check(CALL, unsafe {
            (self.api.set_video_format)(grabber.raw(), format.as_ptr())
        })
    }

    fn image_description(&mut self, grabber: NativeGrabber) -> DriverResult<ImageDescription> {
        let (mut width, mut height): (c_long, c_long) = (0, 0);
        let (mut bits, mut color): (c_int, c_int) = (0, 0);
        check("IC_GetImageDescription", unsafe {
            (self.api.get_image_description)(grabber.raw(), &mut width, &mut height, &mut bits, &mut color)
        })?;
        Ok(ImageDescription {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            bits_per_pixel: bits.max(0) as u32,
            color_format: color,
        })
    }

    fn trigger_available(&mut self, grabber: NativeGrabber) -> DriverResult<bool> {
        availability("IC_IsTriggerAvailable", unsafe {
            (self.api.is_trigger_available)(grabber.raw())
        })
    }

    fn enable_trigger(&mut self, grabber: NativeGrabber, enable: bool) -> DriverResult<()> {
        check("IC_EnableTrigger", unsafe {
            (self.api.enable_trigger)(grabber.raw(), c_int::from(enable))
        })
    }

    fn software_trigger(&mut self, grabber: NativeGrabber) -> DriverResult<()> {
        check("IC_SoftwareTrigger", unsafe {
            (self.api.software_trigger)(grabber.raw())
        })
    }

    fn snap_image(&mut self, grabber: NativeGrabber, timeout: SnapTimeout) -> DriverResult<()> {
        check("IC_SnapImage", unsafe {
            (self.api.snap_image)(grabber.raw(), timeout.as_millis())
        })
    }

    fn copy_image(&mut self, grabber: NativeGrabber, dst: &mut [u16]) -> DriverResult<()> {
        const CALL: &str = "IC_GetImagePtr";
        let description = self.image_description(grabber)?;
        check_copy(&description, dst.len())?;
        let ptr = unsafe { (self.api.get_image_ptr)(grabber.raw()) };
        if ptr.is_null() {
            return Err(DriverError::NullResult { call: CALL });
        }
        // SAFETY: the sink is Y16 and, per the description queried just
        // above, the vendor buffer holds at least `dst.len() * 2` bytes.
        // The buffer is only read until the next snap.
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, dst.len() * 2) };
        for (sample, pair) in dst.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(())
    }
}
