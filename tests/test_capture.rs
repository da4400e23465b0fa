// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{acquire, WAIT};
use msm_camera::{CaptureState, Error, PictureCallbacks};
use parking_lot::Mutex;
use serial_test::serial;
use std::{error::Error as StdError, sync::Arc};

type Events = Arc<Mutex<Vec<&'static str>>>;

/// Callbacks that log their order and forward the JPEG.
fn recorder(events: &Events) -> (PictureCallbacks, kanal::Receiver<Option<Vec<u8>>>) {
    let (tx, rx) = kanal::unbounded();
    let (shutter, raw, jpeg) = (events.clone(), events.clone(), events.clone());
    let callbacks = PictureCallbacks::new()
        .on_shutter(move || shutter.lock().push("shutter"))
        .on_raw(move |frame| {
            assert_eq!(frame.data().len(), 2048 * 1536 * 3 / 2);
            raw.lock().push("raw");
        })
        .on_jpeg(move |picture| {
            jpeg.lock().push("jpeg");
            let _ = tx.send(picture.map(<[u8]>::to_vec));
        });
    (callbacks, rx)
}

#[test]
#[serial]
fn test_picture_sequence() -> Result<(), Box<dyn StdError>> {
    let (camera, driver, vendor) = acquire(vec![1024, 2048, 512])?;
    camera.start_preview(|_| {})?;
    assert_eq!(camera.jpeg_size(), 0);

    let events = Events::default();
    let (callbacks, rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    assert!(!camera.preview_enabled());

    let picture = rx.recv_timeout(WAIT)?.ok_or("capture failed")?;
    assert_eq!(picture.len(), 3584);
    assert!(picture[..1024].iter().all(|b| *b == 0));
    assert!(picture[1024..3072].iter().all(|b| *b == 1));
    assert!(picture[3072..].iter().all(|b| *b == 2));
    assert_eq!(*events.lock(), ["shutter", "raw", "jpeg"]);
    assert_eq!(*vendor.encodes.lock(), 1);
    assert_eq!(camera.capture_state(), CaptureState::Idle);
    assert_eq!(camera.jpeg_size(), 0);
    assert!(rx.recv_timeout(WAIT / 10).is_err());

    // The snapshot buffers stay registered until the capture is reaped.
    assert_eq!(driver.registered(), 2);
    let raw = camera.raw_heap()?;
    assert!(raw.size() >= 2048 * 1536 * 3 / 2);

    camera.start_preview(|_| {})?;
    assert_eq!(driver.called("stop_snapshot"), 1);
    assert_eq!(driver.registered(), 4);

    camera.release();
    assert_eq!(driver.registered(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_second_picture_is_busy() -> Result<(), Box<dyn StdError>> {
    let (camera, driver, _) = acquire(vec![100])?;
    driver.state.lock().hold_picture = true;

    let events = Events::default();
    let (callbacks, rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    assert_eq!(camera.capture_state(), CaptureState::ShutterPending);

    let err = camera.take_picture(PictureCallbacks::new()).unwrap_err();
    assert!(matches!(err, Error::CaptureBusy));
    assert_eq!(err.status(), -libc::EBUSY);
    assert!(matches!(
        camera.start_preview(|_| {}),
        Err(Error::CaptureBusy)
    ));

    driver.complete_picture();
    assert_eq!(rx.recv_timeout(WAIT)?.map(|p| p.len()), Some(100));
    assert_eq!(driver.called("start_snapshot"), 1);

    // Once delivered, a new picture is accepted.
    let (callbacks, rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    driver.complete_picture();
    assert!(rx.recv_timeout(WAIT)?.is_some());

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_cancel_suppresses_pending_callbacks() -> Result<(), Box<dyn StdError>> {
    let (camera, driver, _) = acquire(vec![64])?;
    driver.state.lock().hold_picture = true;

    let events = Events::default();
    let (callbacks, rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    camera.cancel_picture(true, true, false)?;
    camera.cancel_picture(true, true, false)?;
    driver.complete_picture();

    assert_eq!(rx.recv_timeout(WAIT)?.map(|p| p.len()), Some(64));
    assert_eq!(*events.lock(), ["jpeg"]);

    // Cancelling with nothing in flight does nothing.
    camera.cancel_picture(true, true, true)?;
    assert_eq!(camera.capture_state(), CaptureState::Idle);

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_cancel_all_skips_encoding() -> Result<(), Box<dyn StdError>> {
    let (camera, driver, vendor) = acquire(vec![64])?;
    driver.state.lock().hold_picture = true;

    let events = Events::default();
    let (callbacks, _rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    camera.cancel_picture(true, true, true)?;
    driver.complete_picture();

    // Release joins the capture worker.
    camera.release();
    assert!(events.lock().is_empty());
    assert_eq!(*vendor.encodes.lock(), 0);
    assert_eq!(driver.registered(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_size_mismatch_delivers_failure() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![1024, 2048, 512])?;
    *vendor.reported.lock() = Some(4000);

    let events = Events::default();
    let (callbacks, rx) = recorder(&events);
    camera.take_picture(callbacks)?;
    assert!(rx.recv_timeout(WAIT)?.is_none());
    assert_eq!(*events.lock(), ["shutter", "raw", "jpeg"]);
    assert_eq!(camera.capture_state(), CaptureState::Idle);

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_oversized_picture_delivers_failure() -> Result<(), Box<dyn StdError>> {
    let (camera, _, _) = acquire(vec![300, 300])?;
    let mut params = camera.parameters()?;
    params.set_picture_size(16, 16);
    camera.set_parameters(params)?;

    let (tx, rx) = kanal::unbounded();
    camera.take_picture(PictureCallbacks::new().on_jpeg(move |picture| {
        let _ = tx.send(picture.map(<[u8]>::len));
    }))?;
    assert_eq!(rx.recv_timeout(WAIT)?, None);

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_picture_without_jpeg_callback() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![64])?;
    let (tx, rx) = kanal::unbounded();
    camera.take_picture(PictureCallbacks::new().on_shutter(move || {
        let _ = tx.send(());
    }))?;
    rx.recv_timeout(WAIT)?;

    camera.release();
    assert_eq!(*vendor.encodes.lock(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_release_aborts_capture_in_flight() -> Result<(), Box<dyn StdError>> {
    let (camera, driver, _) = acquire(vec![64])?;
    driver.state.lock().hold_picture = true;

    let events = Events::default();
    let (callbacks, _rx) = recorder(&events);
    camera.take_picture(callbacks)?;

    camera.release();
    assert!(events.lock().is_empty());
    assert_eq!(driver.registered(), 0);
    assert!(matches!(
        camera.take_picture(PictureCallbacks::new()),
        Err(Error::Released)
    ));
    Ok(())
}
