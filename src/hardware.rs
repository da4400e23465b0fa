// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The camera façade.
//!
//! [`CameraHardware`] is the single entry point for a camera client. There is
//! at most one per process: [`CameraHardware::create_instance`] hands out the
//! live instance if there is one, and [`CameraHardware::release`] tears it
//! down so the next acquisition opens the device afresh.
//!
//! Locks are taken in the order device, callback, record-frame. Worker
//! threads never take the device lock, so client callbacks must not call
//! control operations other than [`CameraHardware::release_recording_frame`],
//! [`CameraHardware::cancel_picture`] and the auto focus calls.

use crate::{
    autofocus::AutoFocusWorker,
    callback::{Frame, PictureCallbacks, RecordingFrame},
    capture::{CallbacksHandle, CancelFlags, CaptureState},
    config::HalConfig,
    delivery::RecordFrames,
    driver::Driver,
    memory::HeapHandle,
    mmcamera::MmCamera,
    msm::MsmDriver,
    params::CameraParameters,
    session::{DeviceSession, ZoomDirection, ZoomState},
    vendor::Vendor,
    Error,
};
use parking_lot::{Condvar, Mutex};
use std::{
    io, ptr,
    sync::{Arc, Weak},
};
use tracing::{debug, info, instrument, warn};

/// The process-wide instance slot.
///
/// `live` stays set until the instance's release has finished, so a dead
/// weak reference means the last handle was dropped and teardown is still
/// running.
struct Registry {
    live: Option<Weak<CameraHardware>>,
    releasing: bool,
}

static REGISTRY: Mutex<Registry> = parking_lot::const_mutex(Registry {
    live: None,
    releasing: false,
});

/// Signalled when a release gives up the instance slot.
static RELEASED: Condvar = Condvar::new();

pub struct CameraHardware {
    /// The device lock. `None` once released.
    session: Mutex<Option<DeviceSession>>,
    callbacks: CallbacksHandle,
    records: Arc<Mutex<RecordFrames>>,
    autofocus: AutoFocusWorker,
    driver: Arc<dyn Driver>,
    vendor: Arc<dyn Vendor>,
}

impl CameraHardware {
    /// Acquires the camera over the MSM control node and `libmmcamera`.
    pub fn open(config: HalConfig) -> Result<Arc<Self>, Error> {
        Self::create_instance(config, |config| {
            let driver: Arc<dyn Driver> = Arc::new(MsmDriver::open(&config.control_device)?);
            let vendor: Arc<dyn Vendor> = Arc::new(MmCamera::load(
                &config.vendor_library,
                &config.control_device,
            )?);
            Ok((driver, vendor))
        })
    }

    /// Returns the live instance, or builds one from the driver and vendor
    /// produced by `factory`.
    ///
    /// Blocks while a previous instance is being released, so the device is
    /// never opened while an old session still holds it.
    pub fn create_instance<F>(config: HalConfig, factory: F) -> Result<Arc<Self>, Error>
    where
        F: FnOnce(&HalConfig) -> Result<(Arc<dyn Driver>, Arc<dyn Vendor>), Error>,
    {
        let mut registry = REGISTRY.lock();
        loop {
            if !registry.releasing {
                match registry.live.as_ref().map(Weak::upgrade) {
                    None => break,
                    Some(Some(existing)) => {
                        debug!("camera already acquired");
                        return Ok(existing);
                    }
                    Some(None) => {}
                }
            }
            debug!("waiting for the previous camera release");
            RELEASED.wait(&mut registry);
        }
        let (driver, vendor) = factory(&config)?;
        let callbacks = CallbacksHandle::default();
        let records = Arc::new(Mutex::new(RecordFrames::default()));
        let session = DeviceSession::new(
            config,
            driver.clone(),
            vendor.clone(),
            callbacks.clone(),
            records.clone(),
        );
        let hardware = Arc::new(Self {
            session: Mutex::new(Some(session)),
            callbacks,
            records,
            autofocus: AutoFocusWorker::default(),
            driver,
            vendor,
        });
        registry.live = Some(Arc::downgrade(&hardware));
        info!("camera acquired");
        Ok(hardware)
    }

    /// The live instance, if any. `None` while it is being released.
    pub fn instance() -> Option<Arc<Self>> {
        let registry = REGISTRY.lock();
        if registry.releasing {
            return None;
        }
        registry.live.as_ref().and_then(Weak::upgrade)
    }

    fn with_session<R>(
        &self,
        f: impl FnOnce(&mut DeviceSession) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut session = self.session.lock();
        f(session.as_mut().ok_or(Error::Released)?)
    }

    pub fn parameters(&self) -> Result<CameraParameters, Error> {
        self.with_session(|s| Ok(s.parameters().clone()))
    }

    #[instrument(skip_all)]
    pub fn set_parameters(&self, params: CameraParameters) -> Result<(), Error> {
        self.with_session(|s| s.set_parameters(params))
    }

    /// Starts streaming preview frames to `callback`.
    ///
    /// Rejected with [`Error::PreviewRunning`] while preview runs.
    #[instrument(skip_all)]
    pub fn start_preview<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(&Frame<'_>) + Send + Sync + 'static,
    {
        self.with_session(|s| {
            if s.preview_running() {
                return Err(Error::PreviewRunning);
            }
            s.set_preview_callback(Some(Arc::new(callback)));
            s.start_preview().inspect_err(|_| s.set_preview_callback(None))
        })
    }

    /// Stops preview. While recording only the preview callback is dropped.
    #[instrument(skip_all)]
    pub fn stop_preview(&self) -> Result<(), Error> {
        self.with_session(|s| {
            if !self.recording_enabled() {
                s.stop_preview()?;
            }
            s.set_preview_callback(None);
            Ok(())
        })
    }

    pub fn preview_enabled(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(DeviceSession::preview_running)
    }

    /// Starts delivering preview frames to `callback` as recording frames,
    /// starting preview if needed. Each frame stays out of the driver's
    /// rotation until [`CameraHardware::release_recording_frame`].
    #[instrument(skip_all)]
    pub fn start_recording<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(&Frame<'_>, RecordingFrame) + Send + Sync + 'static,
    {
        self.with_session(|s| s.start_recording(Arc::new(callback)))
    }

    #[instrument(skip_all)]
    pub fn stop_recording(&self) -> Result<(), Error> {
        self.with_session(|s| s.stop_recording())
    }

    pub fn recording_enabled(&self) -> bool {
        self.records.lock().enabled()
    }

    /// Returns a recording frame to the driver.
    pub fn release_recording_frame(&self, frame: RecordingFrame) -> Result<(), Error> {
        self.records.lock().release(frame, self.driver.as_ref())
    }

    /// Starts a focus search; `callback` receives whether focus was reached.
    #[instrument(skip_all)]
    pub fn auto_focus<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if self.session.lock().is_none() {
            return Err(Error::Released);
        }
        self.autofocus.start(self.vendor.clone(), Arc::new(callback))
    }

    #[instrument(skip_all)]
    pub fn cancel_auto_focus(&self) -> Result<(), Error> {
        if self.autofocus.cancel(self.vendor.as_ref())? {
            debug!("auto focus cancelled");
        }
        Ok(())
    }

    /// Takes a picture. Preview stops; callbacks fire in the order shutter,
    /// raw, jpeg from the capture thread.
    #[instrument(skip_all)]
    pub fn take_picture(&self, callbacks: PictureCallbacks) -> Result<(), Error> {
        self.with_session(|s| s.take_picture(callbacks))
    }

    /// Suppresses picture callbacks that have not fired yet.
    pub fn cancel_picture(&self, shutter: bool, raw: bool, jpeg: bool) -> Result<(), Error> {
        self.callbacks
            .lock()
            .capture
            .cancel(CancelFlags::new(shutter, raw, jpeg));
        Ok(())
    }

    pub fn capture_state(&self) -> CaptureState {
        self.callbacks.lock().capture.state()
    }

    /// JPEG bytes accumulated by the capture in flight.
    pub fn jpeg_size(&self) -> usize {
        self.callbacks.lock().capture.jpeg_size()
    }

    pub fn perform_zoom(&self, direction: ZoomDirection) -> Result<i32, Error> {
        self.with_session(|s| s.perform_zoom(direction))
    }

    pub fn zoom_to(&self, target: i32) -> Result<i32, Error> {
        self.with_session(|s| s.zoom_to(target))
    }

    pub fn zoom(&self) -> Result<ZoomState, Error> {
        self.with_session(|s| Ok(s.zoom()))
    }

    pub fn preview_heap(&self) -> Result<HeapHandle, Error> {
        self.with_session(|s| s.preview_heap())
    }

    pub fn raw_heap(&self) -> Result<HeapHandle, Error> {
        self.with_session(|s| s.raw_heap())
    }

    pub fn dump(&self, out: &mut impl io::Write) -> io::Result<()> {
        match self.session.lock().as_ref() {
            Some(session) => {
                writeln!(out, "auto focus: running {}", self.autofocus.is_running())?;
                session.dump(out)
            }
            None => writeln!(out, "released"),
        }
    }

    /// Cancels and joins every worker, releases every pool and gives up the
    /// singleton. Later calls fail with [`Error::Released`].
    #[instrument(skip_all)]
    pub fn release(&self) {
        // Only the first release of the registered instance owns the slot.
        let ours = {
            let mut registry = REGISTRY.lock();
            let ours = !registry.releasing
                && registry
                    .live
                    .as_ref()
                    .is_some_and(|w| ptr::eq(w.as_ptr(), self));
            registry.releasing |= ours;
            ours
        };

        if let Err(e) = self.autofocus.cancel(self.vendor.as_ref()) {
            warn!("{e}");
        }
        self.autofocus.join();

        if let Some(mut session) = self.session.lock().take() {
            session.release();
            info!("camera released");
        }

        if ours {
            let mut registry = REGISTRY.lock();
            registry.live = None;
            registry.releasing = false;
            RELEASED.notify_all();
        }
    }
}

impl Drop for CameraHardware {
    fn drop(&mut self) {
        self.release();
    }
}
