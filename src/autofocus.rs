// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{callback::AutoFocusCallback, vendor::Vendor, Error};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct FocusState {
    running: bool,
    cancelled: bool,
}

/// Runs one vendor focus search at a time on a background thread.
///
/// Once [`AutoFocusWorker::cancel`] succeeds the callback of that search is
/// never invoked.
#[derive(Default)]
pub(crate) struct AutoFocusWorker {
    state: Arc<Mutex<FocusState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoFocusWorker {
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start(&self, vendor: Arc<dyn Vendor>, callback: AutoFocusCallback) -> Result<(), Error> {
        {
            let mut state = self.state.lock();
            if state.running {
                return Err(Error::FocusBusy);
            }
            state.running = true;
            state.cancelled = false;
        }
        // The previous search has finished; reap its thread.
        self.join();

        let state = self.state.clone();
        let spawned = thread::Builder::new()
            .name("autofocus".to_string())
            .spawn(move || run(&state, vendor.as_ref(), callback));
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.lock().running = false;
                Err(e.into())
            }
        }
    }

    /// Stops a running search. Returns whether one was cancelled.
    ///
    /// The callback is suppressed even when the vendor refuses to abort the
    /// search; the refusal is returned as [`Error::Vendor`].
    pub fn cancel(&self, vendor: &dyn Vendor) -> Result<bool, Error> {
        {
            let mut state = self.state.lock();
            if !state.running {
                return Ok(false);
            }
            state.cancelled = true;
        }
        vendor
            .cancel_auto_focus()
            .map_err(Error::vendor("cancel auto focus"))?;
        Ok(true)
    }

    /// Waits for the focus thread unless called from it.
    pub fn join(&self) {
        let mut handle = self.handle.lock();
        if handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
        {
            return;
        }
        if let Some(handle) = handle.take() {
            if handle.join().is_err() {
                error!("autofocus thread panicked");
            }
        }
    }
}

fn run(state: &Mutex<FocusState>, vendor: &dyn Vendor, callback: AutoFocusCallback) {
    let focused = if state.lock().cancelled {
        false
    } else {
        match vendor.auto_focus() {
            Ok(focused) => focused,
            Err(e) => {
                warn!("auto focus failed: {e}");
                false
            }
        }
    };

    let deliver = {
        let mut state = state.lock();
        state.running = false;
        !state.cancelled
    };
    debug!("auto focus done, focused {focused} deliver {deliver}");
    if deliver {
        callback(focused);
    }
}
