// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

/// Number of preview buffers libmmcamera expects to be registered.
pub const PREVIEW_BUFFER_COUNT: usize = 4;
/// Number of raw snapshot buffers.
pub const RAW_BUFFER_COUNT: usize = 1;
/// Number of JPEG output buffers.
pub const JPEG_BUFFER_COUNT: usize = 1;
/// Header bytes in front of each raw frame.
pub const RAW_FRAME_HEADER_SIZE: usize = 0;

/// Static configuration of the HAL: where the devices live and how the pools
/// are sized.
#[derive(Debug, Clone, PartialEq)]
pub struct HalConfig {
    /// Camera control node.
    pub control_device: PathBuf,
    /// Physically-contiguous heap backing the preview pool. `cma` and
    /// `system` name the standard DMA heaps, `memfd` selects anonymous shared
    /// memory; anything else is a heap path.
    pub preview_heap: String,
    /// Physically-contiguous heap backing the raw and thumbnail pools.
    pub raw_heap: String,
    /// Vendor library loaded for JPEG encoding and focus.
    pub vendor_library: PathBuf,
    pub preview_buffers: usize,
    pub raw_buffers: usize,
    pub jpeg_buffers: usize,
    pub raw_frame_header: usize,
    /// Upper bound for an encoded picture, in bytes. Zero sizes the JPEG pool
    /// from the picture dimensions.
    pub jpeg_max_size: usize,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            control_device: PathBuf::from("/dev/msm_camera/control0"),
            preview_heap: "cma".to_string(),
            raw_heap: "cma".to_string(),
            vendor_library: PathBuf::from("libmmcamera.so"),
            preview_buffers: PREVIEW_BUFFER_COUNT,
            raw_buffers: RAW_BUFFER_COUNT,
            jpeg_buffers: JPEG_BUFFER_COUNT,
            raw_frame_header: RAW_FRAME_HEADER_SIZE,
            jpeg_max_size: 0,
        }
    }
}
