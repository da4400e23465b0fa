// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The kernel driver boundary.
//!
//! [`Driver`] is everything the HAL needs from the camera control node. The
//! production implementation is [`crate::msm::MsmDriver`]; tests provide
//! in-process fakes.

use crate::{
    params::{KEY_JPEG_THUMBNAIL_WIDTH, KEY_PICTURE_SIZE, KEY_PREVIEW_SIZE},
    Error,
};
use mmcamera_sys::cam_ctrl_dimension_t;
use std::{io, os::fd::RawFd};
use unix_ts::Timestamp;

/// Sizes of the streams configured on the sensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub preview_width: u32,
    pub preview_height: u32,
    pub picture_width: u32,
    pub picture_height: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Dimension {
    /// Bytes of one YUV 4:2:0 semi-planar preview frame.
    pub fn preview_frame_size(&self) -> Result<usize, Error> {
        frame_size(KEY_PREVIEW_SIZE, self.preview_width, self.preview_height)
    }

    /// Bytes of one YUV 4:2:0 semi-planar main image.
    pub fn picture_size(&self) -> Result<usize, Error> {
        frame_size(KEY_PICTURE_SIZE, self.picture_width, self.picture_height)
    }

    pub fn thumbnail_size(&self) -> Result<usize, Error> {
        frame_size(
            KEY_JPEG_THUMBNAIL_WIDTH,
            self.thumbnail_width,
            self.thumbnail_height,
        )
    }

    /// The driver's view of these dimensions.
    ///
    /// Fails with [`Error::InvalidParameter`] when a size does not fit the
    /// 16-bit fields of the driver record.
    pub fn to_raw(&self) -> Result<cam_ctrl_dimension_t, Error> {
        let (video_width, video_height) =
            narrow(KEY_PREVIEW_SIZE, self.preview_width, self.preview_height)?;
        let (picture_width, picture_height) =
            narrow(KEY_PICTURE_SIZE, self.picture_width, self.picture_height)?;
        let (thumbnail_width, thumbnail_height) = narrow(
            KEY_JPEG_THUMBNAIL_WIDTH,
            self.thumbnail_width,
            self.thumbnail_height,
        )?;
        Ok(cam_ctrl_dimension_t {
            video_width,
            video_height,
            picture_width,
            picture_height,
            display_width: video_width,
            display_height: video_height,
            orig_picture_dx: picture_width,
            orig_picture_dy: picture_height,
            ui_thumbnail_width: thumbnail_width,
            ui_thumbnail_height: thumbnail_height,
            thumbnail_width,
            thumbnail_height,
            raw_picture_width: picture_width,
            raw_picture_height: picture_height,
            ..Default::default()
        })
    }
}

fn invalid_size(key: &str, width: u32, height: u32) -> Error {
    Error::InvalidParameter {
        key: key.to_string(),
        value: format!("{width}x{height}"),
    }
}

fn narrow(key: &str, width: u32, height: u32) -> Result<(u16, u16), Error> {
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(invalid_size(key, width, height)),
    }
}

fn frame_size(key: &str, width: u32, height: u32) -> Result<usize, Error> {
    yuv420sp_size(width, height).ok_or_else(|| invalid_size(key, width, height))
}

/// Bytes of a YUV 4:2:0 semi-planar image, `None` on overflow.
pub(crate) fn yuv420sp_size(width: u32, height: u32) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(3)
        .map(|n| n / 2)
}

/// What a registered buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Preview,
    Thumbnail,
    MainImage,
}

/// Offsets of the luma and chroma planes inside one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Planes {
    pub y_offset: usize,
    pub cbcr_offset: usize,
}

/// A buffer as it is registered with the driver.
///
/// `fd` and `offset` locate the frame inside the pool's backing object;
/// `vaddr` is the frame's address in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegistration {
    pub kind: BufferKind,
    pub index: usize,
    pub fd: RawFd,
    pub vaddr: usize,
    pub offset: usize,
    pub len: usize,
    pub planes: Planes,
    pub active: bool,
}

/// A filled preview buffer reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNotice {
    /// Pool slot the frame was written to.
    pub index: usize,
    pub timestamp: Timestamp,
}

/// Zoom range and position as reported by the sensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoomInfo {
    pub current: i32,
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

/// Sensor settings applied through control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorParm {
    Effect,
    WhiteBalance,
    Antibanding,
    Brightness,
}

/// Operations of the camera control node.
///
/// Every call is synchronous and fallible. The blocking calls
/// ([`Driver::wait_frame`] and [`Driver::get_picture`]) can be woken with
/// [`Driver::unblock`]; a wake-up posted while nobody waits is consumed by the
/// next wait and discarded by `start_preview` and `start_snapshot`.
pub trait Driver: Send + Sync {
    fn set_dimension(&self, dimension: &Dimension) -> io::Result<()>;

    fn register_buffer(&self, registration: &BufferRegistration) -> io::Result<()>;

    fn unregister_buffer(&self, registration: &BufferRegistration) -> io::Result<()>;

    fn start_preview(&self) -> io::Result<()>;

    fn stop_preview(&self) -> io::Result<()>;

    /// Blocks until a preview frame is filled. Returns `Ok(None)` when woken
    /// by [`Driver::unblock`].
    fn wait_frame(&self) -> io::Result<Option<FrameNotice>>;

    /// Hands a delivered frame back to the driver for refilling.
    fn release_frame(&self, frame: &FrameNotice) -> io::Result<()>;

    /// Wakes threads blocked in `wait_frame` or `get_picture`.
    fn unblock(&self) -> io::Result<()>;

    fn start_snapshot(&self) -> io::Result<()>;

    /// Blocks until the snapshot has been written to the registered
    /// thumbnail and main-image buffers. Fails with
    /// [`io::ErrorKind::Interrupted`] when woken by [`Driver::unblock`].
    fn get_picture(&self) -> io::Result<()>;

    fn stop_snapshot(&self) -> io::Result<()>;

    fn get_zoom(&self) -> io::Result<ZoomInfo>;

    fn set_zoom(&self, value: i32) -> io::Result<()>;

    fn set_parm(&self, parm: SensorParm, value: i32) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimension(width: u32, height: u32) -> Dimension {
        Dimension {
            preview_width: width,
            preview_height: height,
            picture_width: 2048,
            picture_height: 1536,
            thumbnail_width: 512,
            thumbnail_height: 384,
        }
    }

    #[test]
    fn raw_dimension_carries_sizes() {
        let raw = dimension(640, 480).to_raw().unwrap();
        assert_eq!((raw.video_width, raw.video_height), (640, 480));
        assert_eq!((raw.display_width, raw.display_height), (640, 480));
        assert_eq!((raw.picture_width, raw.raw_picture_height), (2048, 1536));
        assert_eq!((raw.thumbnail_width, raw.ui_thumbnail_height), (512, 384));
    }

    #[test]
    fn oversized_dimension_is_not_truncated() {
        assert!(matches!(
            dimension(70000, 480).to_raw(),
            Err(Error::InvalidParameter { key, value })
                if key == KEY_PREVIEW_SIZE && value == "70000x480"
        ));

        let mut wide = dimension(640, 480);
        wide.picture_width = 65536;
        assert!(matches!(
            wide.to_raw(),
            Err(Error::InvalidParameter { key, .. }) if key == KEY_PICTURE_SIZE
        ));

        let edge = dimension(u16::MAX as u32, u16::MAX as u32).to_raw().unwrap();
        assert_eq!(edge.video_width, u16::MAX);
    }

    #[test]
    fn frame_size_overflow_is_an_error() {
        let size = dimension(480, 320).preview_frame_size().unwrap();
        assert_eq!(size, 480 * 320 * 3 / 2);
        assert!(yuv420sp_size(u32::MAX, u32::MAX).is_none());
        assert!(matches!(
            dimension(u32::MAX, u32::MAX).preview_frame_size(),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
