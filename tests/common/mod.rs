// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-process stand-ins for the camera driver and vendor library.

#![allow(dead_code)]

use msm_camera::{
    memory::MEMFD_HEAP, BufferKind, BufferRegistration, CameraHardware, Dimension, Driver,
    EncodeJob, Error, FrameNotice, HalConfig, SensorParm, Vendor, ZoomInfo,
};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::Arc,
    time::Duration,
};
use unix_ts::Timestamp;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> HalConfig {
    HalConfig {
        preview_heap: MEMFD_HEAP.to_string(),
        raw_heap: MEMFD_HEAP.to_string(),
        ..HalConfig::default()
    }
}

#[derive(Default)]
pub struct DriverState {
    pub registered: HashMap<(BufferKind, usize), BufferRegistration>,
    pub registrations: usize,
    pub calls: Vec<&'static str>,
    pub streaming: bool,
    pub frames: VecDeque<usize>,
    pub woken: bool,
    pub released: Vec<usize>,
    pub sequence: i64,
    pub fail_register_at: Option<usize>,
    pub fail_unregister: bool,
    pub fail_start_preview: bool,
    pub stop_delay: Option<Duration>,
    pub dimension: Option<Dimension>,
    pub hold_picture: bool,
    pub picture_ready: bool,
    pub zoom: ZoomInfo,
    pub zoom_history: Vec<i32>,
    pub parms: Vec<(SensorParm, i32)>,
}

/// Driver that serves frames queued by the test.
pub struct FakeDriver {
    pub state: Mutex<DriverState>,
    changed: Condvar,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DriverState {
                zoom: ZoomInfo {
                    current: 0,
                    min: 0,
                    max: 10,
                    step: 3,
                },
                ..DriverState::default()
            }),
            changed: Condvar::new(),
        })
    }

    pub fn push_frames(&self, indices: impl IntoIterator<Item = usize>) {
        self.state.lock().frames.extend(indices);
        self.changed.notify_all();
    }

    /// Lets a held `get_picture` return.
    pub fn complete_picture(&self) {
        self.state.lock().picture_ready = true;
        self.changed.notify_all();
    }

    pub fn registered(&self) -> usize {
        self.state.lock().registered.len()
    }

    pub fn released(&self) -> Vec<usize> {
        self.state.lock().released.clone()
    }

    pub fn called(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    fn call(&self, op: &'static str) -> parking_lot::MutexGuard<'_, DriverState> {
        let mut state = self.state.lock();
        state.calls.push(op);
        state
    }
}

fn refused() -> io::Error {
    io::Error::from_raw_os_error(libc::EIO)
}

impl Driver for FakeDriver {
    fn set_dimension(&self, dimension: &Dimension) -> io::Result<()> {
        self.call("set_dimension").dimension = Some(*dimension);
        Ok(())
    }

    fn register_buffer(&self, registration: &BufferRegistration) -> io::Result<()> {
        let mut state = self.call("register_buffer");
        if state.fail_register_at == Some(state.registrations) {
            return Err(refused());
        }
        state.registrations += 1;
        state
            .registered
            .insert((registration.kind, registration.index), *registration);
        Ok(())
    }

    fn unregister_buffer(&self, registration: &BufferRegistration) -> io::Result<()> {
        let mut state = self.call("unregister_buffer");
        if state.fail_unregister {
            return Err(refused());
        }
        state
            .registered
            .remove(&(registration.kind, registration.index))
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn start_preview(&self) -> io::Result<()> {
        let mut state = self.call("start_preview");
        if state.fail_start_preview {
            return Err(refused());
        }
        state.woken = false;
        state.streaming = true;
        Ok(())
    }

    fn stop_preview(&self) -> io::Result<()> {
        let delay = {
            let mut state = self.call("stop_preview");
            state.streaming = false;
            state.stop_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn wait_frame(&self) -> io::Result<Option<FrameNotice>> {
        let mut state = self.state.lock();
        loop {
            if state.woken {
                state.woken = false;
                return Ok(None);
            }
            if let Some(index) = state.frames.pop_front() {
                state.sequence += 1;
                return Ok(Some(FrameNotice {
                    index,
                    timestamp: Timestamp::new(state.sequence, 0),
                }));
            }
            self.changed.wait(&mut state);
        }
    }

    fn release_frame(&self, frame: &FrameNotice) -> io::Result<()> {
        self.call("release_frame").released.push(frame.index);
        Ok(())
    }

    fn unblock(&self) -> io::Result<()> {
        self.call("unblock").woken = true;
        self.changed.notify_all();
        Ok(())
    }

    fn start_snapshot(&self) -> io::Result<()> {
        let mut state = self.call("start_snapshot");
        state.woken = false;
        state.picture_ready = !state.hold_picture;
        Ok(())
    }

    fn get_picture(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.woken {
                state.woken = false;
                return Err(io::ErrorKind::Interrupted.into());
            }
            if state.picture_ready {
                state.picture_ready = false;
                return Ok(());
            }
            self.changed.wait(&mut state);
        }
    }

    fn stop_snapshot(&self) -> io::Result<()> {
        let _ = self.call("stop_snapshot");
        Ok(())
    }

    fn get_zoom(&self) -> io::Result<ZoomInfo> {
        Ok(self.call("get_zoom").zoom)
    }

    fn set_zoom(&self, value: i32) -> io::Result<()> {
        let mut state = self.call("set_zoom");
        state.zoom.current = value;
        state.zoom_history.push(value);
        Ok(())
    }

    fn set_parm(&self, parm: SensorParm, value: i32) -> io::Result<()> {
        self.call("set_parm").parms.push((parm, value));
        Ok(())
    }
}

#[derive(Default)]
struct FocusState {
    started: bool,
    cancelled: bool,
    result: Option<bool>,
}

/// Vendor whose encoder emits fixed fragments and whose focus search waits
/// for the test.
pub struct FakeVendor {
    /// Fragment sizes emitted per encode.
    pub fragments: Mutex<Vec<usize>>,
    /// Size reported at the end of an encode; defaults to the fragment sum.
    pub reported: Mutex<Option<usize>>,
    pub encodes: Mutex<usize>,
    /// Refuses to abort a running focus search.
    pub fail_cancel: Mutex<bool>,
    focus: Mutex<FocusState>,
    focus_changed: Condvar,
}

impl FakeVendor {
    pub fn new(fragments: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            fragments: Mutex::new(fragments),
            reported: Mutex::new(None),
            encodes: Mutex::new(0),
            fail_cancel: Mutex::new(false),
            focus: Mutex::new(FocusState::default()),
            focus_changed: Condvar::new(),
        })
    }

    /// Blocks until a focus search is running.
    pub fn wait_focus_started(&self) -> bool {
        let mut focus = self.focus.lock();
        while !focus.started {
            if self.focus_changed.wait_for(&mut focus, WAIT).timed_out() {
                return false;
            }
        }
        true
    }

    pub fn finish_focus(&self, focused: bool) {
        self.focus.lock().result = Some(focused);
        self.focus_changed.notify_all();
    }
}

impl Vendor for FakeVendor {
    fn jpeg_encode(&self, _job: &EncodeJob<'_>, sink: &mut dyn FnMut(&[u8])) -> io::Result<usize> {
        *self.encodes.lock() += 1;
        let fragments = self.fragments.lock().clone();
        let mut total = 0;
        for (i, len) in fragments.into_iter().enumerate() {
            sink(&vec![i as u8; len]);
            total += len;
        }
        Ok(self.reported.lock().unwrap_or(total))
    }

    fn auto_focus(&self) -> io::Result<bool> {
        let mut focus = self.focus.lock();
        focus.started = true;
        self.focus_changed.notify_all();
        loop {
            if focus.cancelled {
                focus.cancelled = false;
                focus.started = false;
                return Ok(false);
            }
            if let Some(result) = focus.result.take() {
                focus.started = false;
                return Ok(result);
            }
            self.focus_changed.wait(&mut focus);
        }
    }

    fn cancel_auto_focus(&self) -> io::Result<()> {
        if *self.fail_cancel.lock() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.focus.lock().cancelled = true;
        self.focus_changed.notify_all();
        Ok(())
    }
}

/// Acquires a camera over fresh fakes.
pub fn acquire(
    fragments: Vec<usize>,
) -> Result<(Arc<CameraHardware>, Arc<FakeDriver>, Arc<FakeVendor>), Error> {
    let driver = FakeDriver::new();
    let vendor = FakeVendor::new(fragments);
    let (d, v) = (driver.clone(), vendor.clone());
    let camera = CameraHardware::create_instance(test_config(), move |_| {
        Ok((d as Arc<dyn Driver>, v as Arc<dyn Vendor>))
    })?;
    Ok((camera, driver, vendor))
}
