// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{acquire, WAIT};
use msm_camera::Error;
use serial_test::serial;
use std::error::Error as StdError;

#[test]
#[serial]
fn test_focus_reports_result() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![])?;
    let (tx, rx) = kanal::unbounded();
    let tx2 = tx.clone();

    camera.auto_focus(move |focused| {
        let _ = tx.send(focused);
    })?;
    assert!(vendor.wait_focus_started());
    vendor.finish_focus(false);
    assert!(!rx.recv_timeout(WAIT)?);

    // A finished search frees the worker for the next request.
    camera.auto_focus(move |focused| {
        let _ = tx2.send(focused);
    })?;
    assert!(vendor.wait_focus_started());
    vendor.finish_focus(true);
    assert!(rx.recv_timeout(WAIT)?);

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_second_request_is_busy() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![])?;
    let (tx, rx) = kanal::unbounded();

    camera.auto_focus(move |focused| {
        let _ = tx.send(focused);
    })?;
    assert!(vendor.wait_focus_started());

    let err = camera.auto_focus(|_| panic!("busy request must not run")).unwrap_err();
    assert!(matches!(err, Error::FocusBusy));
    assert_eq!(err.status(), -libc::EBUSY);

    vendor.finish_focus(true);
    assert!(rx.recv_timeout(WAIT)?);

    camera.release();
    Ok(())
}

#[test]
#[serial]
fn test_cancelled_search_never_calls_back() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![])?;
    let (tx, rx) = kanal::unbounded::<bool>();

    camera.auto_focus(move |focused| {
        let _ = tx.send(focused);
    })?;
    assert!(vendor.wait_focus_started());
    camera.cancel_auto_focus()?;
    // Cancelling again, or with nothing running, is harmless.
    camera.cancel_auto_focus()?;

    // Release joins the focus thread, so its outcome is final here.
    camera.release();
    assert!(rx.try_recv().ok().flatten().is_none());
    Ok(())
}

#[test]
#[serial]
fn test_release_cancels_running_search() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![])?;
    let (tx, rx) = kanal::unbounded::<bool>();

    camera.auto_focus(move |focused| {
        let _ = tx.send(focused);
    })?;
    assert!(vendor.wait_focus_started());

    camera.release();
    assert!(rx.try_recv().ok().flatten().is_none());
    assert!(matches!(camera.auto_focus(|_| {}), Err(Error::Released)));
    Ok(())
}

#[test]
#[serial]
fn test_refused_cancel_is_reported() -> Result<(), Box<dyn StdError>> {
    let (camera, _, vendor) = acquire(vec![])?;
    let (tx, rx) = kanal::unbounded::<bool>();
    *vendor.fail_cancel.lock() = true;

    camera.auto_focus(move |focused| {
        let _ = tx.send(focused);
    })?;
    assert!(vendor.wait_focus_started());
    let err = camera.cancel_auto_focus().unwrap_err();
    assert!(matches!(err, Error::Vendor { op: "cancel auto focus", .. }));
    assert_eq!(err.status(), -libc::EPIPE);

    // The search runs to completion but its result is still suppressed.
    vendor.finish_focus(true);
    *vendor.fail_cancel.lock() = false;
    camera.release();
    assert!(rx.try_recv().ok().flatten().is_none());
    Ok(())
}
