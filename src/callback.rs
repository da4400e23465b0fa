// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Client callbacks, one type per capability.
//!
//! Whatever context a client needs travels inside the closure. Callbacks are
//! invoked from HAL worker threads and never while the device lock is held.

use std::{fmt, sync::Arc};
use unix_ts::Timestamp;

/// A filled buffer lent to a callback for the duration of one call.
#[derive(Clone, Copy)]
pub struct Frame<'a> {
    index: usize,
    width: u32,
    height: u32,
    timestamp: Timestamp,
    data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(index: usize, width: u32, height: u32, timestamp: Timestamp, data: &'a [u8]) -> Self {
        Self {
            index,
            width,
            height,
            timestamp,
            data,
        }
    }

    /// Slot of the frame in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Token for a recording frame the client holds.
///
/// The frame stays out of the driver's rotation until the token is passed to
/// `release_recording_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFrame {
    pub(crate) index: usize,
    pub(crate) generation: u64,
    pub(crate) timestamp: Timestamp,
}

impl RecordingFrame {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

pub type PreviewCallback = Arc<dyn Fn(&Frame<'_>) + Send + Sync>;
pub type RecordingCallback = Arc<dyn Fn(&Frame<'_>, RecordingFrame) + Send + Sync>;
pub type ShutterCallback = Arc<dyn Fn() + Send + Sync>;
pub type RawCallback = Arc<dyn Fn(&Frame<'_>) + Send + Sync>;
/// Receives the encoded picture, or `None` if the capture failed.
pub type JpegCallback = Arc<dyn Fn(Option<&[u8]>) + Send + Sync>;
pub type AutoFocusCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callbacks for one `take_picture`. Any may be left out.
#[derive(Clone, Default)]
pub struct PictureCallbacks {
    pub(crate) shutter: Option<ShutterCallback>,
    pub(crate) raw: Option<RawCallback>,
    pub(crate) jpeg: Option<JpegCallback>,
}

impl PictureCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_shutter<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shutter = Some(Arc::new(f));
        self
    }

    pub fn on_raw<F>(mut self, f: F) -> Self
    where
        F: Fn(&Frame<'_>) + Send + Sync + 'static,
    {
        self.raw = Some(Arc::new(f));
        self
    }

    pub fn on_jpeg<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&[u8]>) + Send + Sync + 'static,
    {
        self.jpeg = Some(Arc::new(f));
        self
    }

    pub fn wants_jpeg(&self) -> bool {
        self.jpeg.is_some()
    }
}

impl fmt::Debug for PictureCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PictureCallbacks")
            .field("shutter", &self.shutter.is_some())
            .field("raw", &self.raw.is_some())
            .field("jpeg", &self.jpeg.is_some())
            .finish()
    }
}
