// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use msm_camera::{
    config::{JPEG_BUFFER_COUNT, PREVIEW_BUFFER_COUNT, RAW_BUFFER_COUNT},
    HalConfig,
};
use std::path::PathBuf;

/// Command-line arguments for the MSM camera tool.
///
/// Opens the camera, streams preview for a number of frames, optionally runs
/// an auto focus search, then takes a picture and writes the JPEG. Arguments
/// can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// camhal --preview-size "640 480" --autofocus --output shot.jpg
///
/// # Via environment variables
/// export CAMERA_CONTROL=/dev/msm_camera/control0
/// export AUTOFOCUS=true
/// camhal
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera control node
    #[arg(
        short,
        long,
        env = "CAMERA_CONTROL",
        default_value = "/dev/msm_camera/control0"
    )]
    pub control: PathBuf,

    /// DMA heap backing preview buffers (cma, system, or a heap path)
    #[arg(long, env = "PREVIEW_HEAP", default_value = "cma")]
    pub preview_heap: String,

    /// DMA heap backing raw snapshot and thumbnail buffers
    #[arg(long, env = "RAW_HEAP", default_value = "cma")]
    pub raw_heap: String,

    /// Vendor library providing JPEG encoding and auto focus
    #[arg(long, env = "VENDOR_LIBRARY", default_value = "libmmcamera.so")]
    pub vendor_library: PathBuf,

    /// Number of preview buffers registered with the driver
    #[arg(long, env = "PREVIEW_BUFFERS", default_value_t = PREVIEW_BUFFER_COUNT)]
    pub preview_buffers: usize,

    /// Number of raw snapshot buffers
    #[arg(long, default_value_t = RAW_BUFFER_COUNT)]
    pub raw_buffers: usize,

    /// Number of JPEG output buffers
    #[arg(long, default_value_t = JPEG_BUFFER_COUNT)]
    pub jpeg_buffers: usize,

    /// Upper bound for the encoded picture in bytes (0 sizes it from the
    /// picture)
    #[arg(long, env = "JPEG_MAX_SIZE", default_value = "0")]
    pub jpeg_max_size: usize,

    /// Preview resolution in pixels (width height)
    #[arg(
        long,
        env = "PREVIEW_SIZE",
        default_value = "480 320",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub preview_size: Vec<u32>,

    /// Picture resolution in pixels (width height)
    #[arg(
        long,
        env = "PICTURE_SIZE",
        default_value = "2048 1536",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub picture_size: Vec<u32>,

    /// Preview frames to receive before taking the picture
    #[arg(short, long, env = "FRAMES", default_value = "30")]
    pub frames: usize,

    /// Run an auto focus search before the picture
    #[arg(long, env = "AUTOFOCUS")]
    pub autofocus: bool,

    /// Where to write the JPEG
    #[arg(short, long, env = "OUTPUT", default_value = "picture.jpg")]
    pub output: PathBuf,

    /// Print the session state before releasing the camera
    #[arg(long)]
    pub dump: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl From<Args> for HalConfig {
    fn from(args: Args) -> Self {
        HalConfig {
            control_device: args.control,
            preview_heap: args.preview_heap,
            raw_heap: args.raw_heap,
            vendor_library: args.vendor_library,
            preview_buffers: args.preview_buffers,
            raw_buffers: args.raw_buffers,
            jpeg_buffers: args.jpeg_buffers,
            jpeg_max_size: args.jpeg_max_size,
            ..HalConfig::default()
        }
    }
}
