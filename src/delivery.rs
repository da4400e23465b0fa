// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The preview frame thread.
//!
//! One thread blocks on the driver's frame notification and hands each filled
//! preview buffer to the preview callback and, while recording, to the
//! recording callback. Frames lent to a recording client are held back from
//! the driver until the client releases them.

use crate::{
    callback::{Frame, RecordingFrame},
    capture::CallbacksHandle,
    driver::{Driver, FrameNotice},
    memory::MemoryPool,
    Error,
};
use parking_lot::{Condvar, Mutex};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::{debug, error, trace, warn};

/// Recording frames lent to the client, guarded by the record-frame lock.
#[derive(Debug, Default)]
pub(crate) struct RecordFrames {
    enabled: bool,
    /// Bumped per preview session so stale tokens are refused.
    generation: u64,
    held: Vec<Option<FrameNotice>>,
}

impl RecordFrames {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn held(&self) -> usize {
        self.held.iter().flatten().count()
    }

    /// Starts a preview session over `count` buffers.
    pub fn reset(&mut self, count: usize) {
        self.generation += 1;
        self.held = vec![None; count];
    }

    /// Ends the preview session. Frames still held are forgotten.
    pub fn clear(&mut self) {
        let leaked = self.held();
        if leaked > 0 {
            warn!("{leaked} recording frames were not released before preview stopped");
        }
        self.generation += 1;
        self.held.clear();
    }

    fn hold(&mut self, notice: FrameNotice) -> Option<RecordingFrame> {
        let slot = self.held.get_mut(notice.index)?;
        if slot.is_some() {
            return None;
        }
        *slot = Some(notice);
        Some(RecordingFrame {
            index: notice.index,
            generation: self.generation,
            timestamp: notice.timestamp,
        })
    }

    /// Returns a held frame to the driver. Unknown or stale tokens are
    /// refused and nothing is released.
    pub fn release(&mut self, frame: RecordingFrame, driver: &dyn Driver) -> Result<(), Error> {
        if frame.generation != self.generation {
            return Err(Error::UnknownFrame(frame.index));
        }
        let slot = self
            .held
            .get_mut(frame.index)
            .ok_or(Error::UnknownFrame(frame.index))?;
        let notice = match slot {
            Some(notice) if notice.timestamp == frame.timestamp => *notice,
            _ => return Err(Error::UnknownFrame(frame.index)),
        };
        driver
            .release_frame(&notice)
            .map_err(Error::driver("release frame"))?;
        *slot = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LoopState {
    started: bool,
    running: bool,
    stop_requested: bool,
}

struct LoopSignal {
    state: Mutex<LoopState>,
    changed: Condvar,
}

/// What the frame thread needs to deliver frames.
pub(crate) struct DeliveryContext {
    pub driver: Arc<dyn Driver>,
    pub pool: Arc<MemoryPool>,
    pub callbacks: CallbacksHandle,
    pub records: Arc<Mutex<RecordFrames>>,
    pub width: u32,
    pub height: u32,
}

/// Handle to the running frame thread.
pub(crate) struct FrameDeliveryLoop {
    signal: Arc<LoopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl FrameDeliveryLoop {
    /// Spawns the frame thread and waits until it runs.
    pub fn spawn(ctx: DeliveryContext) -> io::Result<Self> {
        let signal = Arc::new(LoopSignal {
            state: Mutex::new(LoopState::default()),
            changed: Condvar::new(),
        });
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("frame".to_string())
            .spawn(move || run(ctx, &thread_signal))?;

        let mut state = signal.state.lock();
        while !state.started {
            signal.changed.wait(&mut state);
        }
        drop(state);
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub fn is_current_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Requests a graceful stop, wakes the thread and joins it. Idempotent.
    pub fn stop(&mut self, driver: &dyn Driver) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.state.lock().stop_requested = true;
        if let Err(e) = driver.unblock() {
            warn!("unblock frame wait failed: {e}");
        }
        let mut state = self.signal.state.lock();
        while state.running {
            self.signal.changed.wait(&mut state);
        }
        drop(state);
        if handle.join().is_err() {
            error!("frame thread panicked");
        }
        debug!("frame thread joined");
    }
}

fn run(ctx: DeliveryContext, signal: &LoopSignal) {
    {
        let mut state = signal.state.lock();
        state.started = true;
        state.running = true;
        signal.changed.notify_all();
    }
    debug!("frame thread running");

    loop {
        if signal.state.lock().stop_requested {
            break;
        }
        match ctx.driver.wait_frame() {
            Ok(Some(notice)) => deliver(&ctx, notice),
            Ok(None) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("frame wait failed: {e}");
                break;
            }
        }
    }

    let mut state = signal.state.lock();
    state.running = false;
    signal.changed.notify_all();
}

fn deliver(ctx: &DeliveryContext, notice: FrameNotice) {
    trace!("frame {} ready", notice.index);
    let (preview, recording) = {
        let cb = ctx.callbacks.lock();
        (cb.preview.clone(), cb.recording.clone())
    };

    let mut held = false;
    let delivered = ctx.pool.with_frame(notice.index, |data| {
        let frame = Frame::new(notice.index, ctx.width, ctx.height, notice.timestamp, data);
        if let Some(preview) = &preview {
            preview(&frame);
        }
        let Some(recording) = &recording else {
            return;
        };
        let token = {
            let mut records = ctx.records.lock();
            if records.enabled() {
                records.hold(notice)
            } else {
                None
            }
        };
        if let Some(token) = token {
            held = true;
            recording(&frame, token);
        }
    });
    if let Err(e) = delivered {
        warn!("frame {} not delivered: {e}", notice.index);
    }

    if let Some(client) = tracy_client::Client::running() {
        client.frame_mark();
    }

    if !held {
        if let Err(e) = ctx.driver.release_frame(&notice) {
            warn!("release frame {} failed: {e}", notice.index);
        }
    }
}
