// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use msm_camera::{CameraHardware, HalConfig, PictureCallbacks};
use std::{
    error::Error,
    fs, io,
    time::{Duration, Instant},
};
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer as _};

const FOCUS_TIMEOUT: Duration = Duration::from_secs(5);
const PICTURE_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(level);

    let journald = match args.journald {
        true => Some(tracing_journald::layer()?.with_filter(level)),
        false => None,
    };

    let tracy = match args.tracy {
        true => {
            tracy_client::Client::start();
            Some(tracing_tracy::TracyLayer::default().with_filter(level))
        }
        false => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let camera = CameraHardware::open(HalConfig::from(args.clone()))?;
    let result = run(&camera, &args);
    if args.dump {
        camera.dump(&mut io::stdout().lock())?;
    }
    camera.release();
    result
}

fn run(camera: &CameraHardware, args: &Args) -> Result<(), Box<dyn Error>> {
    let mut params = camera.parameters()?;
    params.set_preview_size(args.preview_size[0], args.preview_size[1]);
    params.set_picture_size(args.picture_size[0], args.picture_size[1]);
    camera.set_parameters(params)?;

    // Frames are dropped rather than stalling the frame thread when the
    // receiver falls behind.
    let (tx, rx) = kanal::bounded(args.frames.max(1));
    camera.start_preview(move |frame| {
        let _ = tx.try_send((frame.index(), frame.timestamp(), frame.data().len()));
    })?;

    let start = Instant::now();
    for _ in 0..args.frames {
        let (index, ts, len) = rx.recv()?;
        debug!(
            "preview frame {index} {len} bytes at {}.{:09}",
            ts.seconds(),
            ts.subsec(9)
        );
    }
    if args.frames > 0 {
        let fps = args.frames as f64 / start.elapsed().as_secs_f64();
        info!("received {} preview frames at {fps:.1} fps", args.frames);
    }

    if args.autofocus {
        let (tx, rx) = kanal::bounded(1);
        camera.auto_focus(move |focused| {
            let _ = tx.try_send(focused);
        })?;
        match rx.recv_timeout(FOCUS_TIMEOUT) {
            Ok(focused) => info!("auto focus done, focused: {focused}"),
            Err(_) => {
                warn!("auto focus timed out");
                camera.cancel_auto_focus()?;
            }
        }
    }

    let (tx, rx) = kanal::bounded(1);
    let taken = Instant::now();
    camera.take_picture(
        PictureCallbacks::new()
            .on_shutter(|| info!("shutter"))
            .on_raw(|frame| info!("raw {}x{}", frame.width(), frame.height()))
            .on_jpeg(move |jpeg| {
                let _ = tx.try_send(jpeg.map(<[u8]>::to_vec));
            }),
    )?;
    let jpeg = match rx.recv_timeout(PICTURE_TIMEOUT) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            camera.cancel_picture(true, true, true)?;
            return Err(format!("picture not delivered: {e}").into());
        }
    };
    let Some(jpeg) = jpeg else {
        return Err("capture failed".into());
    };
    fs::write(&args.output, &jpeg)?;
    info!(
        "wrote {} bytes to {} in {:?}",
        jpeg.len(),
        args.output.display(),
        taken.elapsed()
    );
    Ok(())
}
