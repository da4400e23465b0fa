// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The vendor library boundary: JPEG encoding and auto focus.

use crate::driver::{BufferRegistration, Dimension};
use std::io;

/// Input of one JPEG encode: the snapshot buffers as registered with the
/// driver.
#[derive(Debug, Clone, Copy)]
pub struct EncodeJob<'a> {
    pub dimension: &'a Dimension,
    pub thumbnail: &'a BufferRegistration,
    pub main: &'a BufferRegistration,
}

/// Opaque vendor algorithms invoked through a fixed call contract.
pub trait Vendor: Send + Sync {
    /// Encodes the snapshot, feeding the output to `sink` fragment by
    /// fragment in order. Returns the total size the encoder reports for the
    /// finished picture.
    fn jpeg_encode(&self, job: &EncodeJob<'_>, sink: &mut dyn FnMut(&[u8])) -> io::Result<usize>;

    /// Runs one focus search. Blocks until the lens settles or
    /// [`Vendor::cancel_auto_focus`] is called; returns whether focus was
    /// achieved.
    fn auto_focus(&self) -> io::Result<bool>;

    /// Interrupts a running [`Vendor::auto_focus`].
    fn cancel_auto_focus(&self) -> io::Result<()>;
}
