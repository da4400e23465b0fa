// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The device session: everything done under the device lock.
//!
//! [`DeviceSession`] owns the driver handle, the pools registered with it and
//! the worker threads using those pools. Preview and snapshot setup either
//! complete or roll back every allocation and registration they made.

use crate::{
    callback::{PictureCallbacks, PreviewCallback, RecordingCallback},
    capture::{CallbacksHandle, CancelFlags, CaptureJob, SnapshotPools},
    config::HalConfig,
    delivery::{DeliveryContext, FrameDeliveryLoop, RecordFrames},
    driver::{BufferKind, Dimension, Driver, Planes},
    memory::{HeapHandle, MemoryPool},
    params::{CameraParameters, KEY_ZOOM},
    vendor::Vendor,
    Error,
};
use parking_lot::Mutex;
use std::{io, sync::Arc};
use tracing::{debug, error, info, warn};

/// Zoom position as last set through the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoomState {
    pub previous: i32,
    pub current: i32,
    pub initialized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

struct Preview {
    pool: Arc<MemoryPool>,
    delivery: FrameDeliveryLoop,
}

pub(crate) struct DeviceSession {
    config: HalConfig,
    driver: Arc<dyn Driver>,
    vendor: Arc<dyn Vendor>,
    callbacks: CallbacksHandle,
    records: Arc<Mutex<RecordFrames>>,
    params: CameraParameters,
    preview: Option<Preview>,
    capture: Option<CaptureJob>,
    zoom: ZoomState,
}

fn planes(width: u32, height: u32) -> Planes {
    Planes {
        y_offset: 0,
        cbcr_offset: width as usize * height as usize,
    }
}

impl DeviceSession {
    pub fn new(
        config: HalConfig,
        driver: Arc<dyn Driver>,
        vendor: Arc<dyn Vendor>,
        callbacks: CallbacksHandle,
        records: Arc<Mutex<RecordFrames>>,
    ) -> Self {
        let session = Self {
            config,
            driver,
            vendor,
            callbacks,
            records,
            params: CameraParameters::default(),
            preview: None,
            capture: None,
            zoom: ZoomState::default(),
        };
        for (parm, value) in session.params.sensor_settings() {
            if let Err(e) = session.driver.set_parm(parm, value) {
                warn!("default {parm:?}={value} not applied: {e}");
            }
        }
        session
    }

    /// Stream sizes from the current parameters.
    ///
    /// Sizes the driver record cannot carry are refused here, before any
    /// command or allocation uses them.
    pub fn dimension(&self) -> Result<Dimension, Error> {
        let (preview_width, preview_height) = self.params.preview_size().unwrap_or_default();
        let (picture_width, picture_height) = self.params.picture_size().unwrap_or_default();
        let (thumbnail_width, thumbnail_height) = self.params.thumbnail_size().unwrap_or_default();
        let dimension = Dimension {
            preview_width,
            preview_height,
            picture_width,
            picture_height,
            thumbnail_width,
            thumbnail_height,
        };
        dimension.to_raw()?;
        Ok(dimension)
    }

    pub fn preview_running(&self) -> bool {
        self.preview.is_some()
    }

    pub fn zoom(&self) -> ZoomState {
        self.zoom
    }

    pub fn parameters(&self) -> &CameraParameters {
        &self.params
    }

    fn from_frame_thread(&self) -> bool {
        self.preview
            .as_ref()
            .is_some_and(|p| p.delivery.is_current_thread())
    }

    pub fn start_preview(&mut self) -> Result<(), Error> {
        if self.preview.is_some() {
            return Err(Error::PreviewRunning);
        }
        self.reap_capture()?;

        let dim = self.dimension()?;
        let frame_size = dim.preview_frame_size()?;
        self.driver
            .set_dimension(&dim)
            .map_err(Error::driver("set dimension"))?;
        let pool = Arc::new(MemoryPool::preview(&self.config, frame_size)?);

        let count = pool.count();
        let registered = (0..count).try_for_each(|index| {
            // The last buffer is held back from the VFE until a frame is released.
            let active = index + 1 != count;
            pool.register(
                index,
                BufferKind::Preview,
                planes(dim.preview_width, dim.preview_height),
                active,
                self.driver.as_ref(),
            )
            .map(|_| ())
        });
        if let Err(e) = registered {
            self.discard(&pool);
            return Err(e);
        }

        self.records.lock().reset(count);
        if let Err(e) = self.driver.start_preview() {
            self.records.lock().clear();
            self.discard(&pool);
            return Err(Error::driver("start preview")(e));
        }

        let ctx = DeliveryContext {
            driver: self.driver.clone(),
            pool: pool.clone(),
            callbacks: self.callbacks.clone(),
            records: self.records.clone(),
            width: dim.preview_width,
            height: dim.preview_height,
        };
        let delivery = match FrameDeliveryLoop::spawn(ctx) {
            Ok(delivery) => delivery,
            Err(e) => {
                if let Err(e) = self.driver.stop_preview() {
                    warn!("stop preview failed: {e}");
                }
                self.records.lock().clear();
                self.discard(&pool);
                return Err(e.into());
            }
        };
        info!(
            "preview started {}x{} over {count} buffers",
            dim.preview_width, dim.preview_height
        );
        self.preview = Some(Preview { pool, delivery });
        Ok(())
    }

    fn discard(&self, pool: &MemoryPool) {
        if let Err(e) = pool.teardown(self.driver.as_ref()) {
            error!("{} pool rollback failed: {e}", pool.name());
        }
    }

    /// Stops streaming, joins the frame thread and releases the preview pool.
    /// Does nothing when preview is not running.
    pub fn stop_preview(&mut self) -> Result<(), Error> {
        if self.from_frame_thread() {
            return Err(Error::InvalidState {
                event: "stop preview",
                state: "frame callback",
            });
        }
        let Some(mut preview) = self.preview.take() else {
            return Ok(());
        };
        if let Err(e) = self.driver.stop_preview() {
            warn!("stop preview failed: {e}");
        }
        preview.delivery.stop(self.driver.as_ref());
        self.records.lock().clear();
        preview.pool.teardown(self.driver.as_ref())?;
        info!("preview stopped");
        Ok(())
    }

    pub fn start_recording(&mut self, callback: RecordingCallback) -> Result<(), Error> {
        self.callbacks.lock().recording = Some(callback);
        self.records.lock().set_enabled(true);
        if self.preview.is_none() {
            if let Err(e) = self.start_preview() {
                self.records.lock().set_enabled(false);
                self.callbacks.lock().recording = None;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops recording; preview stops too unless a preview callback remains.
    pub fn stop_recording(&mut self) -> Result<(), Error> {
        self.records.lock().set_enabled(false);
        let has_preview = {
            let mut cb = self.callbacks.lock();
            cb.recording = None;
            cb.preview.is_some()
        };
        if !has_preview {
            self.stop_preview()?;
        }
        Ok(())
    }

    pub fn set_preview_callback(&self, callback: Option<PreviewCallback>) {
        self.callbacks.lock().preview = callback;
    }

    /// Starts a snapshot. Preview is stopped first.
    pub fn take_picture(&mut self, picture: PictureCallbacks) -> Result<(), Error> {
        if self.from_frame_thread() {
            return Err(Error::InvalidState {
                event: "take picture",
                state: "frame callback",
            });
        }
        self.reap_capture()?;
        {
            let mut cb = self.callbacks.lock();
            cb.capture.begin(picture.wants_jpeg())?;
            cb.picture = picture;
        }
        let started = self
            .stop_preview()
            .and_then(|()| self.start_snapshot());
        if let Err(e) = started {
            let mut cb = self.callbacks.lock();
            cb.capture.abort();
            cb.picture = PictureCallbacks::default();
            return Err(e);
        }
        Ok(())
    }

    fn start_snapshot(&mut self) -> Result<(), Error> {
        let dim = self.dimension()?;
        let (picture_size, thumbnail_size) = (dim.picture_size()?, dim.thumbnail_size()?);
        self.driver
            .set_dimension(&dim)
            .map_err(Error::driver("set dimension"))?;
        let raw = MemoryPool::raw(&self.config, picture_size)?;
        let thumbnail = MemoryPool::thumbnail(&self.config, thumbnail_size)?;
        let jpeg = MemoryPool::jpeg(&self.config, dim.picture_width, dim.picture_height)?;

        let driver = self.driver.as_ref();
        let registered = thumbnail
            .register(
                0,
                BufferKind::Thumbnail,
                planes(dim.thumbnail_width, dim.thumbnail_height),
                true,
                driver,
            )
            .and_then(|thumb| {
                raw.register(
                    0,
                    BufferKind::MainImage,
                    planes(dim.picture_width, dim.picture_height),
                    true,
                    driver,
                )
                .map(|main| (thumb, main))
            });
        let (thumbnail_registration, main_registration) = match registered {
            Ok(registrations) => registrations,
            Err(e) => {
                self.discard(&thumbnail);
                self.discard(&raw);
                return Err(e);
            }
        };
        let pools = Arc::new(SnapshotPools {
            dimension: dim,
            raw,
            thumbnail,
            jpeg,
            main_registration,
            thumbnail_registration,
        });

        if let Err(e) = self.driver.start_snapshot() {
            self.discard_snapshot(&pools);
            return Err(Error::driver("start snapshot")(e));
        }
        match CaptureJob::spawn(
            self.driver.clone(),
            self.vendor.clone(),
            self.callbacks.clone(),
            pools.clone(),
        ) {
            Ok(job) => {
                info!(
                    "snapshot started {}x{}",
                    dim.picture_width, dim.picture_height
                );
                self.capture = Some(job);
                Ok(())
            }
            Err(e) => {
                if let Err(e) = self.driver.stop_snapshot() {
                    warn!("stop snapshot failed: {e}");
                }
                self.discard_snapshot(&pools);
                Err(e)
            }
        }
    }

    fn discard_snapshot(&self, pools: &SnapshotPools) {
        if let Err(e) = pools.teardown(self.driver.as_ref()) {
            error!("snapshot rollback failed: {e}");
        }
    }

    /// Releases the resources of a finished capture. Fails while the capture
    /// is still in flight.
    pub fn reap_capture(&mut self) -> Result<(), Error> {
        let Some(job) = self.capture.as_mut() else {
            return Ok(());
        };
        if self.callbacks.lock().capture.is_active() {
            return Err(Error::CaptureBusy);
        }
        job.join();
        if let Err(e) = self.driver.stop_snapshot() {
            warn!("stop snapshot failed: {e}");
        }
        let torn = job.pools.teardown(self.driver.as_ref());
        self.capture = None;
        debug!("snapshot reaped");
        torn
    }

    pub fn set_parameters(&mut self, params: CameraParameters) -> Result<(), Error> {
        params.validate()?;
        for (parm, value) in params.sensor_changes(&self.params) {
            self.driver
                .set_parm(parm, value)
                .map_err(Error::driver("set parameter"))?;
            debug!("{parm:?} set to {value}");
        }
        let zoom = params.get_int(KEY_ZOOM);
        let zoom_changed = zoom.is_some() && zoom != self.params.get_int(KEY_ZOOM);
        self.params = params;
        if let (true, Some(target)) = (zoom_changed, zoom) {
            self.zoom_to(target)?;
        }
        Ok(())
    }

    fn zoom_range(&mut self) -> Result<(i32, i32, i32), Error> {
        let info = self.driver.get_zoom().map_err(Error::driver("get zoom"))?;
        if info.min > info.max {
            return Err(Error::driver("get zoom")(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("zoom range {}..{}", info.min, info.max),
            )));
        }
        if !self.zoom.initialized {
            let current = info.current.clamp(info.min, info.max);
            self.zoom = ZoomState {
                previous: current,
                current,
                initialized: true,
            };
        }
        Ok((info.min, info.max, info.step.max(1)))
    }

    fn apply_zoom(&mut self, value: i32) -> Result<(), Error> {
        self.driver
            .set_zoom(value)
            .map_err(Error::driver("set zoom"))?;
        self.zoom.previous = self.zoom.current;
        self.zoom.current = value;
        Ok(())
    }

    /// Moves the zoom one sensor step. Returns the new position.
    pub fn perform_zoom(&mut self, direction: ZoomDirection) -> Result<i32, Error> {
        let (min, max, step) = self.zoom_range()?;
        let target = match direction {
            ZoomDirection::In => self.zoom.current.saturating_add(step),
            ZoomDirection::Out => self.zoom.current.saturating_sub(step),
        }
        .clamp(min, max);
        if target != self.zoom.current {
            self.apply_zoom(target)?;
        }
        Ok(self.zoom.current)
    }

    /// Steps the zoom toward `target`, clamped to the sensor range.
    pub fn zoom_to(&mut self, target: i32) -> Result<i32, Error> {
        let (min, max, step) = self.zoom_range()?;
        let target = target.clamp(min, max);
        while self.zoom.current != target {
            let current = self.zoom.current;
            let next = if target > current {
                current.saturating_add(step).min(target)
            } else {
                current.saturating_sub(step).max(target)
            };
            self.apply_zoom(next)?;
        }
        Ok(self.zoom.current)
    }

    pub fn preview_heap(&self) -> Result<HeapHandle, Error> {
        match &self.preview {
            Some(preview) => preview.pool.heap(),
            None => Err(Error::Uninitialized("preview".to_string())),
        }
    }

    pub fn raw_heap(&self) -> Result<HeapHandle, Error> {
        match &self.capture {
            Some(job) => job.pools.raw.heap(),
            None => Err(Error::Uninitialized("raw".to_string())),
        }
    }

    /// Cancels and joins every worker and releases every pool.
    pub fn release(&mut self) {
        self.callbacks.lock().capture.cancel(CancelFlags::ALL);
        if let Err(e) = self.driver.unblock() {
            warn!("unblock failed: {e}");
        }
        if let Some(job) = self.capture.as_mut() {
            job.join();
        }
        self.callbacks.lock().capture.abort();
        if let Err(e) = self.reap_capture() {
            error!("snapshot release failed: {e}");
        }
        self.records.lock().set_enabled(false);
        if let Err(e) = self.stop_preview() {
            error!("preview release failed: {e}");
        }
        let mut cb = self.callbacks.lock();
        cb.preview = None;
        cb.recording = None;
        cb.picture = PictureCallbacks::default();
    }

    pub fn dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let (preview_cb, recording_cb, capture, jpeg_size) = {
            let cb = self.callbacks.lock();
            (
                cb.preview.is_some(),
                cb.recording.is_some(),
                cb.capture.state(),
                cb.capture.jpeg_size(),
            )
        };
        let (recording, held) = {
            let records = self.records.lock();
            (records.enabled(), records.held())
        };
        writeln!(out, "control device: {}", self.config.control_device.display())?;
        match self.dimension() {
            Ok(dim) => writeln!(out, "dimension: {dim:?}")?,
            Err(e) => writeln!(out, "dimension: {e}")?,
        }
        writeln!(
            out,
            "preview: running {} callback {preview_cb}",
            self.preview_running()
        )?;
        writeln!(
            out,
            "recording: enabled {recording} callback {recording_cb} held {held}"
        )?;
        writeln!(
            out,
            "zoom: previous {} current {} initialized {}",
            self.zoom.previous, self.zoom.current, self.zoom.initialized
        )?;
        writeln!(out, "capture: {capture} jpeg size {jpeg_size}")?;
        if let Some(preview) = &self.preview {
            writeln!(out, "{}", preview.pool)?;
        }
        if let Some(job) = &self.capture {
            writeln!(out, "{}", job.pools.raw)?;
            writeln!(out, "{}", job.pools.thumbnail)?;
            writeln!(out, "{}", job.pools.jpeg)?;
        }
        writeln!(out, "parameters: {}", self.params)
    }
}
