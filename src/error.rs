// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::io;

/// Status returned when an operation succeeded.
pub const NO_ERROR: i32 = 0;

/// Errors reported by the camera HAL.
///
/// Every failure crossing the driver or vendor boundary is converted into one
/// of these variants at the façade; nothing unwinds across the device
/// boundary. [`Error::status`] maps each variant onto the negative-errno
/// status convention of the camera service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The control node could not be opened. Fatal for the whole session.
    #[error("failed to open camera control device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The backing region of a pool could not be allocated or mapped.
    #[error("failed to allocate {0} pool")]
    Allocation(String),

    /// A pool was used before `complete_initialization` succeeded, or after
    /// it was torn down.
    #[error("{0} pool is not initialized")]
    Uninitialized(String),

    /// `complete_initialization` was called a second time.
    #[error("{0} pool is already initialized")]
    AlreadyInitialized(String),

    /// A buffer index outside the pool.
    #[error("buffer {index} out of range for {pool} pool of {count}")]
    BufferIndex {
        pool: String,
        index: usize,
        count: usize,
    },

    /// The driver rejected a command.
    #[error("driver rejected {op}: {source}")]
    Driver {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The vendor library failed.
    #[error("vendor library {op} failed: {source}")]
    Vendor {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A picture is already being taken.
    #[error("a capture is already in flight")]
    CaptureBusy,

    /// An auto focus request is already running.
    #[error("auto focus is already running")]
    FocusBusy,

    /// `start_preview` was called while preview is streaming.
    #[error("preview is already running")]
    PreviewRunning,

    /// The JPEG byte count did not match what the encoder reported.
    #[error("jpeg truncated: accumulated {accumulated} of {expected} bytes")]
    Truncated { accumulated: usize, expected: usize },

    /// A capture event arrived in a state that cannot accept it.
    #[error("capture event {event} invalid in state {state}")]
    InvalidState {
        event: &'static str,
        state: &'static str,
    },

    /// A recording frame token that is not currently held by the client.
    #[error("recording frame {0} is not held")]
    UnknownFrame(usize),

    /// A parameter value the HAL cannot apply.
    #[error("invalid parameter {key}={value}")]
    InvalidParameter { key: String, value: String },

    /// The session was released.
    #[error("camera session released")]
    Released,

    /// Thread creation and other OS failures not tied to a command.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn driver(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Driver { op, source }
    }

    pub(crate) fn vendor(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Vendor { op, source }
    }

    /// Negative errno status code for this error.
    pub fn status(&self) -> i32 {
        let errno = match self {
            Error::Open { .. } => libc::ENODEV,
            Error::Allocation(_) => libc::ENOMEM,
            Error::Uninitialized(_) | Error::Released => libc::ENOSYS,
            Error::AlreadyInitialized(_) => libc::EEXIST,
            Error::BufferIndex { .. } | Error::InvalidParameter { .. } => libc::EINVAL,
            Error::UnknownFrame(_) => libc::ENOENT,
            Error::CaptureBusy | Error::FocusBusy | Error::PreviewRunning => libc::EBUSY,
            Error::InvalidState { .. } => libc::EPROTO,
            Error::Truncated { .. } | Error::Vendor { .. } => libc::EPIPE,
            Error::Driver { .. } | Error::Io(_) => libc::EIO,
        };
        -errno
    }
}

/// Status code of an operation outcome.
pub fn status<T>(result: &Result<T, Error>) -> i32 {
    match result {
        Ok(_) => NO_ERROR,
        Err(e) => e.status(),
    }
}
