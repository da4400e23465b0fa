// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Still capture: the shutter, raw, JPEG sequence.
//!
//! [`CaptureRequest`] is the bookkeeping of the one picture that may be in
//! flight. It lives under the callback lock and is advanced by the capture
//! worker, which delivers the client callbacks outside that lock.

use crate::{
    callback::{Frame, JpegCallback, PictureCallbacks},
    driver::{BufferRegistration, Dimension, Driver},
    memory::MemoryPool,
    vendor::{EncodeJob, Vendor},
    Error,
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info_span, warn};
use unix_ts::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    ShutterPending,
    RawCaptured,
    JpegEncoding,
}

impl CaptureState {
    fn name(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::ShutterPending => "shutter-pending",
            CaptureState::RawCaptured => "raw-captured",
            CaptureState::JpegEncoding => "jpeg-encoding",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callbacks suppressed by `cancel_picture`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancelFlags {
    pub shutter: bool,
    pub raw: bool,
    pub jpeg: bool,
}

impl CancelFlags {
    pub const ALL: CancelFlags = CancelFlags {
        shutter: true,
        raw: true,
        jpeg: true,
    };

    pub fn new(shutter: bool, raw: bool, jpeg: bool) -> Self {
        Self { shutter, raw, jpeg }
    }
}

impl std::ops::BitOrAssign for CancelFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.shutter |= rhs.shutter;
        self.raw |= rhs.raw;
        self.jpeg |= rhs.jpeg;
    }
}

/// Result of the encoder finishing.
#[derive(Debug)]
pub struct JpegOutcome {
    /// Final picture size, or the truncation that was detected.
    pub result: Result<usize, Error>,
    /// Whether the jpeg callback should run.
    pub deliver: bool,
}

/// State of the picture in flight.
#[derive(Debug)]
pub struct CaptureRequest {
    state: CaptureState,
    shutter_fired: bool,
    raw_delivered: bool,
    wants_jpeg: bool,
    cancel: CancelFlags,
    jpeg_size: usize,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureRequest {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            shutter_fired: false,
            raw_delivered: false,
            wants_jpeg: false,
            cancel: CancelFlags::default(),
            jpeg_size: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != CaptureState::Idle
    }

    /// Bytes of JPEG accumulated so far. Zero outside an encode.
    pub fn jpeg_size(&self) -> usize {
        self.jpeg_size
    }

    pub fn cancelled(&self) -> CancelFlags {
        self.cancel
    }

    pub fn shutter_fired(&self) -> bool {
        self.shutter_fired
    }

    pub fn raw_delivered(&self) -> bool {
        self.raw_delivered
    }

    fn expect(&self, event: &'static str, state: CaptureState) -> Result<(), Error> {
        if self.state != state {
            return Err(Error::InvalidState {
                event,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    /// Starts a new picture. Rejected while one is in flight.
    pub fn begin(&mut self, wants_jpeg: bool) -> Result<(), Error> {
        if self.is_active() {
            return Err(Error::CaptureBusy);
        }
        *self = Self {
            state: CaptureState::ShutterPending,
            wants_jpeg,
            ..Self::new()
        };
        Ok(())
    }

    /// Suppresses callbacks that have not fired yet. Flags accumulate, so
    /// repeating a cancellation changes nothing.
    pub fn cancel(&mut self, flags: CancelFlags) {
        if self.is_active() {
            self.cancel |= flags;
        }
    }

    /// The sensor exposed the frame. Returns whether to notify the client.
    pub fn shutter(&mut self) -> Result<bool, Error> {
        self.expect("shutter", CaptureState::ShutterPending)?;
        if self.shutter_fired {
            return Err(Error::InvalidState {
                event: "shutter",
                state: "shutter-fired",
            });
        }
        self.shutter_fired = true;
        Ok(!self.cancel.shutter)
    }

    /// The raw frame landed in the raw pool. Returns whether to deliver it.
    pub fn raw(&mut self) -> Result<bool, Error> {
        self.expect("raw", CaptureState::ShutterPending)?;
        if !self.shutter_fired {
            return Err(Error::InvalidState {
                event: "raw",
                state: "shutter-pending",
            });
        }
        self.state = CaptureState::RawCaptured;
        self.raw_delivered = !self.cancel.raw;
        Ok(self.raw_delivered)
    }

    /// Decides whether to run the encoder. Without a JPEG to deliver the
    /// picture is complete here.
    pub fn begin_jpeg(&mut self) -> Result<bool, Error> {
        self.expect("begin jpeg", CaptureState::RawCaptured)?;
        self.jpeg_size = 0;
        if self.wants_jpeg && !self.cancel.jpeg {
            self.state = CaptureState::JpegEncoding;
            Ok(true)
        } else {
            self.state = CaptureState::Idle;
            Ok(false)
        }
    }

    /// One encoded fragment arrived, in order.
    pub fn fragment(&mut self, len: usize) -> Result<(), Error> {
        self.expect("jpeg fragment", CaptureState::JpegEncoding)?;
        self.jpeg_size += len;
        Ok(())
    }

    /// The encoder finished reporting `expected` bytes in total.
    pub fn finish_jpeg(&mut self, expected: usize) -> Result<JpegOutcome, Error> {
        self.expect("jpeg done", CaptureState::JpegEncoding)?;
        let accumulated = self.jpeg_size;
        let result = if accumulated == expected {
            Ok(accumulated)
        } else {
            Err(Error::Truncated {
                accumulated,
                expected,
            })
        };
        let deliver = !self.cancel.jpeg;
        self.jpeg_size = 0;
        self.state = CaptureState::Idle;
        Ok(JpegOutcome { result, deliver })
    }

    /// Abandons the picture. Returns whether the jpeg callback is owed a
    /// failure notice.
    pub fn abort(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let owed = self.wants_jpeg && !self.cancel.jpeg;
        self.state = CaptureState::Idle;
        self.jpeg_size = 0;
        owed
    }
}

/// Client callbacks and the capture bookkeeping, all guarded by the callback
/// lock.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub preview: Option<crate::callback::PreviewCallback>,
    pub recording: Option<crate::callback::RecordingCallback>,
    pub picture: PictureCallbacks,
    pub capture: CaptureRequest,
}

pub(crate) type CallbacksHandle = Arc<Mutex<Callbacks>>;

/// The buffers of one snapshot.
pub(crate) struct SnapshotPools {
    pub dimension: Dimension,
    pub raw: MemoryPool,
    pub thumbnail: MemoryPool,
    pub jpeg: MemoryPool,
    pub main_registration: BufferRegistration,
    pub thumbnail_registration: BufferRegistration,
}

impl SnapshotPools {
    pub fn teardown(&self, driver: &dyn Driver) -> Result<(), Error> {
        let raw = self.raw.teardown(driver);
        let thumbnail = self.thumbnail.teardown(driver);
        let jpeg = self.jpeg.teardown(driver);
        raw.and(thumbnail).and(jpeg)
    }
}

/// A capture worker and the pools it is using.
pub(crate) struct CaptureJob {
    pub pools: Arc<SnapshotPools>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureJob {
    pub fn spawn(
        driver: Arc<dyn Driver>,
        vendor: Arc<dyn Vendor>,
        callbacks: CallbacksHandle,
        pools: Arc<SnapshotPools>,
    ) -> Result<Self, Error> {
        let worker = CaptureWorker {
            driver,
            vendor,
            callbacks,
            pools: pools.clone(),
        };
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            pools,
            handle: Some(handle),
        })
    }

    pub fn is_current_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Waits for the worker unless called from it.
    pub fn join(&mut self) {
        if self.is_current_thread() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture worker panicked");
            }
        }
    }
}

struct CaptureWorker {
    driver: Arc<dyn Driver>,
    vendor: Arc<dyn Vendor>,
    callbacks: CallbacksHandle,
    pools: Arc<SnapshotPools>,
}

fn now() -> Timestamp {
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(since.as_secs() as i64, since.subsec_nanos())
}

impl CaptureWorker {
    fn run(self) {
        let _span = info_span!("capture").entered();
        if let Err(e) = self.driver.get_picture() {
            warn!("get picture failed: {e}");
            self.fail();
            return;
        }
        let timestamp = now();

        let shutter = {
            let mut cb = self.callbacks.lock();
            match cb.capture.shutter() {
                Ok(true) => cb.picture.shutter.clone(),
                Ok(false) => None,
                Err(e) => {
                    debug!("capture ended before shutter: {e}");
                    return;
                }
            }
        };
        if let Some(shutter) = shutter {
            shutter();
        }

        let raw = {
            let mut cb = self.callbacks.lock();
            match cb.capture.raw() {
                Ok(true) => cb.picture.raw.clone(),
                Ok(false) => None,
                Err(e) => {
                    debug!("capture ended before raw: {e}");
                    return;
                }
            }
        };
        if let Some(raw) = raw {
            let dim = &self.pools.dimension;
            let delivered = self.pools.raw.with_frame(0, |data| {
                raw(&Frame::new(0, dim.picture_width, dim.picture_height, timestamp, data))
            });
            if let Err(e) = delivered {
                warn!("raw frame unavailable: {e}");
            }
        }

        let encode = {
            let mut cb = self.callbacks.lock();
            match cb.capture.begin_jpeg() {
                Ok(encode) => encode,
                Err(e) => {
                    debug!("capture ended before encode: {e}");
                    return;
                }
            }
        };
        if encode {
            self.encode();
        }
    }

    fn encode(&self) {
        let job = EncodeJob {
            dimension: &self.pools.dimension,
            thumbnail: &self.pools.thumbnail_registration,
            main: &self.pools.main_registration,
        };
        let mut written = 0;
        let mut overflow = None;
        let mut sink = |fragment: &[u8]| {
            if overflow.is_none() {
                if let Err(e) = self.pools.jpeg.copy_into(0, written, fragment) {
                    overflow = Some(e);
                }
            }
            written += fragment.len();
            if let Err(e) = self.callbacks.lock().capture.fragment(fragment.len()) {
                debug!("jpeg fragment dropped: {e}");
            }
        };
        let encoded = self.vendor.jpeg_encode(&job, &mut sink);

        let (outcome, callback) = {
            let mut cb = self.callbacks.lock();
            let callback = cb.picture.jpeg.clone();
            match encoded {
                Ok(expected) => match cb.capture.finish_jpeg(expected) {
                    Ok(outcome) => (outcome, callback),
                    Err(e) => {
                        debug!("capture ended during encode: {e}");
                        return;
                    }
                },
                Err(e) => {
                    error!("{}", Error::vendor("jpeg encode")(e));
                    let owed = cb.capture.abort();
                    drop(cb);
                    if owed {
                        deliver_jpeg(callback, None);
                    }
                    return;
                }
            }
        };
        if !outcome.deliver {
            return;
        }

        let size = match (outcome.result, overflow) {
            (_, Some(e)) | (Err(e), None) => {
                error!("jpeg capture failed: {e}");
                deliver_jpeg(callback, None);
                return;
            }
            (Ok(size), None) => size,
        };
        match self.pools.jpeg.with_frame(0, |data| data[..size].to_vec()) {
            Ok(picture) => {
                debug!("jpeg picture {size} bytes");
                deliver_jpeg(callback, Some(&picture));
            }
            Err(e) => {
                error!("jpeg pool unavailable: {e}");
                deliver_jpeg(callback, None);
            }
        }
    }

    fn fail(&self) {
        let callback = {
            let mut cb = self.callbacks.lock();
            if !cb.capture.abort() {
                return;
            }
            cb.picture.jpeg.clone()
        };
        deliver_jpeg(callback, None);
    }
}

fn deliver_jpeg(callback: Option<JpegCallback>, picture: Option<&[u8]>) {
    if let Some(callback) = callback {
        callback(picture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn through_raw(request: &mut CaptureRequest) {
        request.begin(true).unwrap();
        assert!(request.shutter().unwrap());
        assert!(request.raw().unwrap());
    }

    #[test]
    fn full_sequence_accumulates_fragments() {
        let mut request = CaptureRequest::new();
        through_raw(&mut request);
        assert!(request.begin_jpeg().unwrap());
        for (len, total) in [(1024, 1024), (2048, 3072), (512, 3584)] {
            request.fragment(len).unwrap();
            assert_eq!(request.jpeg_size(), total);
        }
        let outcome = request.finish_jpeg(3584).unwrap();
        assert_eq!(outcome.result.unwrap(), 3584);
        assert!(outcome.deliver);
        assert_eq!(request.state(), CaptureState::Idle);
        assert_eq!(request.jpeg_size(), 0);
    }

    #[test]
    fn second_begin_is_busy() {
        let mut request = CaptureRequest::new();
        request.begin(true).unwrap();
        assert!(matches!(request.begin(true), Err(Error::CaptureBusy)));
    }

    #[test]
    fn short_encode_is_truncation() {
        let mut request = CaptureRequest::new();
        through_raw(&mut request);
        request.begin_jpeg().unwrap();
        request.fragment(1000).unwrap();
        let outcome = request.finish_jpeg(4000).unwrap();
        assert!(matches!(
            outcome.result,
            Err(Error::Truncated {
                accumulated: 1000,
                expected: 4000
            })
        ));
        assert_eq!(request.jpeg_size(), 0);
    }

    #[test]
    fn cancel_suppresses_only_pending_stages() {
        let mut request = CaptureRequest::new();
        request.begin(true).unwrap();
        assert!(request.shutter().unwrap());
        request.cancel(CancelFlags::new(true, true, false));
        request.cancel(CancelFlags::new(true, true, false));
        assert!(!request.raw().unwrap());
        assert!(request.begin_jpeg().unwrap());
        request.cancel(CancelFlags::new(false, false, true));
        request.fragment(10).unwrap();
        assert!(!request.finish_jpeg(10).unwrap().deliver);
    }

    #[test]
    fn raw_before_shutter_is_rejected() {
        let mut request = CaptureRequest::new();
        request.begin(false).unwrap();
        assert!(matches!(request.raw(), Err(Error::InvalidState { .. })));
        assert!(request.shutter().unwrap());
        assert!(request.raw().unwrap());
        assert!(!request.begin_jpeg().unwrap());
        assert!(!request.is_active());
    }

    #[test]
    fn abort_owes_failure_unless_cancelled() {
        let mut request = CaptureRequest::new();
        request.begin(true).unwrap();
        assert!(request.abort());
        assert!(!request.abort());

        request.begin(true).unwrap();
        request.cancel(CancelFlags::ALL);
        assert!(!request.abort());
    }
}
