// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! [`Vendor`] over `libmmcamera`.
//!
//! The library reports encoder output through process-global C callbacks.
//! The trampolines below forward each event into the channel of the encode
//! in progress; only one encode runs at a time.

use crate::{
    msm::{ctrl_command, open_node},
    vendor::{EncodeJob, Vendor},
    Error,
};
use kanal::{Receiver, Sender};
use mmcamera_sys::{
    ctrl, jpeg_event_t, MmCameraLibrary, JPEG_EVENT_DONE, JPEG_EVENT_THUMBNAIL_DROPPED,
};
use parking_lot::Mutex;
use std::{
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    ptr, slice,
};
use tracing::{debug, warn};

/// Focus mode requested from the sensor.
const AF_MODE_AUTO: i32 = 2;

enum EncoderEvent {
    Fragment(Vec<u8>),
    Done(jpeg_event_t),
}

static ENCODER: Mutex<Option<Sender<EncoderEvent>>> = parking_lot::const_mutex(None);

fn forward(event: EncoderEvent) {
    if let Some(tx) = ENCODER.lock().as_ref() {
        if tx.send(event).is_err() {
            warn!("jpeg event dropped, no encode waiting");
        }
    }
}

unsafe extern "C" fn on_fragment(buff: *mut u8, size: u32) {
    if buff.is_null() || size == 0 {
        return;
    }
    let fragment = unsafe { slice::from_raw_parts(buff, size as usize) };
    forward(EncoderEvent::Fragment(fragment.to_vec()));
}

unsafe extern "C" fn on_done(status: jpeg_event_t) {
    forward(EncoderEvent::Done(status));
}

/// End-of-image marker closing every complete JPEG stream.
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Last two bytes of the stream seen so far.
#[derive(Debug, Default)]
struct StreamTail {
    bytes: [u8; 2],
    len: usize,
}

impl StreamTail {
    fn push(&mut self, data: &[u8]) {
        for &b in &data[data.len().saturating_sub(2)..] {
            self.bytes = [self.bytes[1], b];
        }
        self.len += data.len();
    }

    fn complete(&self) -> bool {
        self.len >= JPEG_EOI.len() && self.bytes == JPEG_EOI
    }
}

/// Forwards fragments to `sink` until the encoder reports completion.
///
/// Returns the stream length. A stream the encoder calls done but that does
/// not end with the EOI marker is an error.
fn collect(rx: &Receiver<EncoderEvent>, sink: &mut dyn FnMut(&[u8])) -> io::Result<usize> {
    let mut tail = StreamTail::default();
    loop {
        match rx.recv().map_err(io::Error::other)? {
            EncoderEvent::Fragment(data) => {
                tail.push(&data);
                sink(&data);
            }
            EncoderEvent::Done(JPEG_EVENT_DONE) if tail.complete() => return Ok(tail.len),
            EncoderEvent::Done(JPEG_EVENT_DONE) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("jpeg stream of {} bytes has no end marker", tail.len),
                ));
            }
            EncoderEvent::Done(JPEG_EVENT_THUMBNAIL_DROPPED) => {
                warn!("encoder dropped the thumbnail");
            }
            EncoderEvent::Done(status) => {
                return Err(io::Error::other(format!("jpeg encoder status {status}")));
            }
        }
    }
}

pub struct MmCamera {
    lib: MmCameraLibrary,
    control: PathBuf,
    encode_lock: Mutex<()>,
}

impl MmCamera {
    /// Loads `library`. Focus commands go to the `control` node.
    pub fn load(library: &Path, control: &Path) -> Result<Self, Error> {
        let lib = unsafe { MmCameraLibrary::new(library) }.map_err(|e| Error::Open {
            path: library.display().to_string(),
            source: io::Error::other(e),
        })?;
        unsafe {
            *lib.jpegfragment_callback = Some(on_fragment);
            *lib.jpeg_callback = Some(on_done);
        }
        debug!("loaded {}", library.display());
        Ok(Self {
            lib,
            control: control.to_path_buf(),
            encode_lock: Mutex::new(()),
        })
    }
}

impl Vendor for MmCamera {
    fn jpeg_encode(&self, job: &EncodeJob<'_>, sink: &mut dyn FnMut(&[u8])) -> io::Result<usize> {
        let dimension = job
            .dimension
            .to_raw()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let _encoding = self.encode_lock.lock();
        let (tx, rx) = kanal::unbounded();
        *ENCODER.lock() = Some(tx);

        let started = unsafe {
            (self.lib.jpeg_encoder_init)()
                && (self.lib.jpeg_encoder_encode)(
                    &dimension,
                    job.thumbnail.vaddr as *const u8,
                    job.thumbnail.fd,
                    job.main.vaddr as *const u8,
                    job.main.fd,
                    ptr::null_mut(),
                )
        };
        let result = if started {
            collect(&rx, sink)
        } else {
            Err(io::Error::other("jpeg encoder refused the job"))
        };
        unsafe { (self.lib.jpeg_encoder_join)() };
        *ENCODER.lock() = None;
        result
    }

    fn auto_focus(&self) -> io::Result<bool> {
        let node = open_node(&self.control).map_err(io::Error::other)?;
        let mut mode = AF_MODE_AUTO;
        match ctrl_command(node.as_raw_fd(), ctrl::CAMERA_SET_PARM_AUTO_FOCUS, Some(&mut mode)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Other => {
                debug!("focus not reached: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn cancel_auto_focus(&self) -> io::Result<()> {
        let node = open_node(&self.control).map_err(io::Error::other)?;
        ctrl_command::<u8>(node.as_raw_fd(), ctrl::CAMERA_AUTO_FOCUS_CANCEL, None)
    }
}
