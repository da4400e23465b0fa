// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # MSM Camera Hardware Abstraction Layer
//!
//! This library drives the camera pipeline of Qualcomm MSM platforms: the
//! `msm_camera` kernel control node and the closed `libmmcamera` vendor
//! library. It owns the buffers shared with the kernel and the JPEG encoder,
//! runs preview, recording, still capture and auto focus on their own threads
//! and reports results through client callbacks.
//!
//! ## Features
//!
//! - **Buffer Pools**: Fixed arrays of equal-sized buffers over anonymous
//!   shared memory or physically-contiguous DMA heap memory, registered with
//!   the driver and torn down only after the driver lets go of them.
//! - **Preview & Recording**: A frame thread delivers preview frames in driver
//!   order; recording frames stay held until the client releases them.
//! - **Still Capture**: Shutter, raw and JPEG callbacks fire in order, with
//!   per-stage cancellation and a single picture in flight.
//! - **Auto Focus**: Cancellable focus searches on a background thread.
//!
//! ## Example
//!
//! ```no_run
//! use msm_camera::{CameraHardware, HalConfig, PictureCallbacks};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = CameraHardware::open(HalConfig::default())?;
//! camera.start_preview(|frame| println!("preview frame {}", frame.index()))?;
//!
//! let (tx, rx) = kanal::bounded(1);
//! camera.take_picture(PictureCallbacks::new().on_jpeg(move |jpeg| {
//!     let _ = tx.send(jpeg.map(<[u8]>::to_vec));
//! }))?;
//! if let Some(jpeg) = rx.recv()? {
//!     std::fs::write("picture.jpg", jpeg)?;
//! }
//! camera.release();
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! FFI with the kernel driver and the vendor library, and the shared
//! mappings, are confined to the `memory`, `msm` and `mmcamera` modules and
//! the `mmcamera-sys` crate; everything else is safe Rust.

mod autofocus;
pub mod callback;
pub mod capture;
pub mod config;
mod delivery;
pub mod driver;
pub mod error;
pub mod hardware;
pub mod memory;
pub mod mmcamera;
pub mod msm;
pub mod params;
mod session;
pub mod vendor;

pub use callback::{Frame, PictureCallbacks, RecordingFrame};
pub use capture::{CancelFlags, CaptureRequest, CaptureState};
pub use config::HalConfig;
pub use driver::{
    BufferKind, BufferRegistration, Dimension, Driver, FrameNotice, Planes, SensorParm, ZoomInfo,
};
pub use error::{status, Error, NO_ERROR};
pub use hardware::CameraHardware;
pub use memory::{HeapHandle, MemoryPool, PoolLayout, PoolState};
pub use params::CameraParameters;
pub use session::{ZoomDirection, ZoomState};
pub use vendor::{EncodeJob, Vendor};
