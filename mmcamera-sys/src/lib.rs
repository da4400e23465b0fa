// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Low-level bindings for the MSM camera stack.
//!
//! Two surfaces are covered:
//!
//! - the `msm_camera` kernel control node (`/dev/msm_camera/control0`),
//!   driven through ioctls declared here with the `nix` ioctl macros;
//! - the closed `libmmcamera` vendor library, loaded at runtime with
//!   `libloading` and exposed as a table of raw function pointers.
//!
//! Everything in this crate is `unsafe` to use. The `msm-camera` crate wraps
//! it behind its `Driver` and `Vendor` traits.

#![allow(non_camel_case_types)]

use libloading::Library;
use nix::{
    ioctl_none_bad, ioctl_read_bad, ioctl_write_ptr_bad, request_code_none, request_code_read,
    request_code_write,
};
use std::{
    ffi::OsStr,
    os::raw::{c_int, c_ulong, c_void},
};

pub const MSM_CAM_IOCTL_MAGIC: u8 = b'm';

// The msm_camera header declares every ioctl argument as a pointer type, so
// the encoded size is the size of a pointer rather than of the struct.
const ARG_SIZE: usize = std::mem::size_of::<*mut c_void>();

pub const MSM_PMEM_OUTPUT1: c_int = 0;
pub const MSM_PMEM_OUTPUT2: c_int = 1;
pub const MSM_PMEM_OUTPUT1_OUTPUT2: c_int = 2;
pub const MSM_PMEM_THUMBAIL: c_int = 3;
pub const MSM_PMEM_MAINIMG: c_int = 4;
pub const MSM_PMEM_RAW_MAINIMG: c_int = 5;

/// Control command status reported back by the config daemon.
pub const CAM_CTRL_FAILED: u16 = 0;
pub const CAM_CTRL_SUCCESS: u16 = 1;

/// Default control command timeout used by the vendor HAL.
pub const CAM_CTRL_TIMEOUT_MS: u32 = 5000;

/// `cam_ctrl_type` ordinals for the commands the HAL issues.
pub mod ctrl {
    pub const CAMERA_SET_PARM_DIMENSION: u16 = 1;
    pub const CAMERA_SET_PARM_ZOOM: u16 = 2;
    pub const CAMERA_SET_PARM_WB: u16 = 5;
    pub const CAMERA_SET_PARM_EFFECT: u16 = 6;
    pub const CAMERA_SET_PARM_BRIGHTNESS: u16 = 9;
    pub const CAMERA_SET_PARM_ANTIBANDING: u16 = 13;
    pub const CAMERA_SET_PARM_AUTO_FOCUS: u16 = 20;
    pub const CAMERA_GET_PARM_ZOOM: u16 = 33;
    pub const CAMERA_START_PREVIEW: u16 = 43;
    pub const CAMERA_STOP_PREVIEW: u16 = 44;
    pub const CAMERA_START_SNAPSHOT: u16 = 45;
    pub const CAMERA_STOP_SNAPSHOT: u16 = 46;
    pub const CAMERA_AUTO_FOCUS_CANCEL: u16 = 59;
}

/// Buffer registration record passed to `REGISTER_PMEM`/`UNREGISTER_PMEM`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct msm_pmem_info {
    pub type_: c_int,
    pub fd: c_int,
    pub vaddr: *mut c_void,
    pub y_off: u32,
    pub cbcr_off: u32,
    pub active: u8,
}

/// A frame handed out by `GETFRAME` and returned with
/// `RELEASE_FRAME_BUFFER`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct msm_frame {
    pub path: c_int,
    pub buffer: c_ulong,
    pub y_off: u32,
    pub cbcr_off: u32,
    pub fd: c_int,
    pub cropinfo: *mut c_void,
    pub croplen: c_int,
}

impl Default for msm_frame {
    fn default() -> Self {
        Self {
            path: 0,
            buffer: 0,
            y_off: 0,
            cbcr_off: 0,
            fd: -1,
            cropinfo: std::ptr::null_mut(),
            croplen: 0,
        }
    }
}

/// Control command envelope for `CTRL_COMMAND`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct msm_ctrl_cmd {
    pub type_: u16,
    pub length: u16,
    pub value: *mut c_void,
    pub status: u16,
    pub timeout_ms: u32,
    pub resp_fd: c_int,
}

impl msm_ctrl_cmd {
    /// Builds a command carrying `value` as its payload.
    ///
    /// # Safety
    ///
    /// `value` must stay valid until the ioctl using this command returns.
    pub unsafe fn new<T>(type_: u16, value: *mut T) -> Self {
        Self {
            type_,
            length: if value.is_null() {
                0
            } else {
                std::mem::size_of::<T>() as u16
            },
            value: value.cast(),
            status: CAM_CTRL_FAILED,
            timeout_ms: CAM_CTRL_TIMEOUT_MS,
            resp_fd: -1,
        }
    }
}

/// Sensor and output dimensions (`cam_ctrl_dimension_t`).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct cam_ctrl_dimension_t {
    pub video_width: u16,
    pub video_height: u16,
    pub picture_width: u16,
    pub picture_height: u16,
    pub display_width: u16,
    pub display_height: u16,
    pub orig_picture_dx: u16,
    pub orig_picture_dy: u16,
    pub ui_thumbnail_height: u16,
    pub ui_thumbnail_width: u16,
    pub thumbnail_height: u16,
    pub thumbnail_width: u16,
    pub raw_picture_height: u16,
    pub raw_picture_width: u16,
    pub filler7: u16,
    pub filler8: u16,
}

/// Range description of an integer parameter (`cam_parm_info_t`).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct cam_parm_info_t {
    pub current_value: i32,
    pub default_value: i32,
    pub minimum_value: i32,
    pub maximum_value: i32,
    pub step_value: i32,
}

ioctl_write_ptr_bad!(
    /// Registers a pmem buffer with the VFE.
    msm_cam_ioctl_register_pmem,
    request_code_write!(MSM_CAM_IOCTL_MAGIC, 2, ARG_SIZE),
    msm_pmem_info
);

ioctl_write_ptr_bad!(
    /// Removes a previously registered pmem buffer.
    msm_cam_ioctl_unregister_pmem,
    request_code_write!(MSM_CAM_IOCTL_MAGIC, 3, ARG_SIZE),
    msm_pmem_info
);

ioctl_read_bad!(
    /// Sends a control command and waits for the config daemon to answer.
    msm_cam_ioctl_ctrl_command,
    request_code_write!(MSM_CAM_IOCTL_MAGIC, 4, ARG_SIZE),
    msm_ctrl_cmd
);

ioctl_read_bad!(
    /// Dequeues the next filled preview frame.
    msm_cam_ioctl_getframe,
    request_code_read!(MSM_CAM_IOCTL_MAGIC, 7, ARG_SIZE),
    msm_frame
);

ioctl_write_ptr_bad!(
    /// Hands a preview frame back to the VFE.
    msm_cam_ioctl_release_frame_buffer,
    request_code_write!(MSM_CAM_IOCTL_MAGIC, 14, ARG_SIZE),
    msm_frame
);

ioctl_read_bad!(
    /// Blocks until the snapshot in progress has been written to the
    /// registered main-image and thumbnail buffers.
    msm_cam_ioctl_get_picture,
    request_code_write!(MSM_CAM_IOCTL_MAGIC, 17, ARG_SIZE),
    msm_ctrl_cmd
);

ioctl_none_bad!(
    /// Wakes any thread blocked in `poll` on the frame node.
    msm_cam_ioctl_unblock_poll_frame,
    request_code_none!(MSM_CAM_IOCTL_MAGIC, 23)
);

/// Events delivered through `mmcamera_jpeg_callback`.
pub type jpeg_event_t = c_int;
pub const JPEG_EVENT_DONE: jpeg_event_t = 0;
pub const JPEG_EVENT_WARNING: jpeg_event_t = 1;
pub const JPEG_EVENT_ERROR: jpeg_event_t = 2;
pub const JPEG_EVENT_ABORTED: jpeg_event_t = 3;
pub const JPEG_EVENT_THUMBNAIL_DROPPED: jpeg_event_t = 4;

pub type JpegFragmentCallback = unsafe extern "C" fn(buff: *mut u8, size: u32);
pub type JpegCallback = unsafe extern "C" fn(status: jpeg_event_t);

type JpegEncoderInitFn = unsafe extern "C" fn() -> bool;
type JpegEncoderEncodeFn = unsafe extern "C" fn(
    dimension: *const cam_ctrl_dimension_t,
    thumbnail_buf: *const u8,
    thumbnail_fd: c_int,
    snapshot_buf: *const u8,
    snapshot_fd: c_int,
    crop: *mut c_void,
) -> bool;
type JpegEncoderJoinFn = unsafe extern "C" fn();

/// Function table resolved from `libmmcamera.so`.
///
/// The callback entries are the addresses of the library's global callback
/// variables; writing a function pointer through them installs the hook.
pub struct MmCameraLibrary {
    pub jpeg_encoder_init: JpegEncoderInitFn,
    pub jpeg_encoder_encode: JpegEncoderEncodeFn,
    pub jpeg_encoder_join: JpegEncoderJoinFn,
    pub jpegfragment_callback: *mut Option<JpegFragmentCallback>,
    pub jpeg_callback: *mut Option<JpegCallback>,
    _lib: Library,
}

// The raw pointers are addresses inside the loaded library, which lives as
// long as this table.
unsafe impl Send for MmCameraLibrary {}
unsafe impl Sync for MmCameraLibrary {}

impl MmCameraLibrary {
    /// Loads the vendor library and resolves every symbol the HAL uses.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers; the caller must trust the
    /// library at `path`.
    pub unsafe fn new<P: AsRef<OsStr>>(path: P) -> Result<Self, libloading::Error> {
        let lib = Library::new(path)?;
        let jpeg_encoder_init = *lib.get::<JpegEncoderInitFn>(b"jpeg_encoder_init\0")?;
        let jpeg_encoder_encode = *lib.get::<JpegEncoderEncodeFn>(b"jpeg_encoder_encode\0")?;
        let jpeg_encoder_join = *lib.get::<JpegEncoderJoinFn>(b"jpeg_encoder_join\0")?;
        let jpegfragment_callback = *lib
            .get::<*mut Option<JpegFragmentCallback>>(b"mmcamera_jpegfragment_callback\0")?;
        let jpeg_callback =
            *lib.get::<*mut Option<JpegCallback>>(b"mmcamera_jpeg_callback\0")?;
        Ok(Self {
            jpeg_encoder_init,
            jpeg_encoder_encode,
            jpeg_encoder_join,
            jpegfragment_callback,
            jpeg_callback,
            _lib: lib,
        })
    }
}
