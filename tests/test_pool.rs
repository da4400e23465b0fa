// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{test_config, FakeDriver};
use msm_camera::{
    driver::Planes,
    memory::{Backing, MEMFD_HEAP},
    BufferKind, Error, HalConfig, MemoryPool, PoolLayout, PoolState,
};
use serial_test::serial;
use std::error::Error as StdError;

#[test]
#[serial]
fn test_anonymous_pool() -> Result<(), Box<dyn StdError>> {
    let mut pool = MemoryPool::anonymous("test", PoolLayout::frames(1000, 3));
    assert_eq!(pool.state(), PoolState::Mapped);
    assert!(!pool.initialized());
    assert!(matches!(pool.buffer(0), Err(Error::Uninitialized(_))));

    pool.complete_initialization()?;
    assert!(pool.initialized());
    assert_eq!(pool.backing(), &Backing::Anonymous);
    println!("{pool}");

    let stride = pool.stride().ok_or("no stride")?;
    assert!(stride >= 1000);
    for index in 0..3 {
        let buffer = pool.buffer(index)?;
        assert_eq!(buffer.offset, index * stride);
        assert_eq!(buffer.size, 1000);
    }
    assert!(matches!(
        pool.buffer(3),
        Err(Error::BufferIndex { index: 3, count: 3, .. })
    ));

    pool.copy_into(1, 10, b"frame")?;
    assert_eq!(pool.with_frame(1, |f| f[10..15].to_vec())?, b"frame");

    let driver = FakeDriver::new();
    pool.teardown(driver.as_ref())?;
    assert_eq!(pool.state(), PoolState::Unmapped);
    assert!(!pool.initialized());
    pool.teardown(driver.as_ref())?;
    Ok(())
}

#[test]
#[serial]
fn test_heap_handle_sees_writes() -> Result<(), Box<dyn StdError>> {
    let pool = MemoryPool::raw(
        &HalConfig {
            raw_frame_header: 64,
            ..test_config()
        },
        4096,
    )?;
    assert_eq!(pool.layout().frame_offset, 64);
    pool.with_frame_mut(0, |f| f[..4].copy_from_slice(&[1, 2, 3, 4]))?;

    let heap = pool.heap()?;
    assert_eq!(heap.frame_offset(0), 64);
    let mapped = heap.map()?;
    assert_eq!(&mapped.as_slice()[64..68], &[1, 2, 3, 4]);

    let driver = FakeDriver::new();
    pool.teardown(driver.as_ref())?;
    assert!(pool.heap().is_err());
    // The client mapping outlives the pool.
    assert_eq!(&mapped.as_slice()[64..68], &[1, 2, 3, 4]);
    Ok(())
}

#[test]
#[serial]
fn test_registration_and_teardown() -> Result<(), Box<dyn StdError>> {
    let driver = FakeDriver::new();
    let pool = MemoryPool::preview(&test_config(), 480 * 320 * 3 / 2)?;
    let planes = Planes {
        y_offset: 0,
        cbcr_offset: 480 * 320,
    };

    let first = pool.register(0, BufferKind::Preview, planes, true, driver.as_ref())?;
    let again = pool.register(0, BufferKind::Preview, planes, true, driver.as_ref())?;
    assert_eq!(first, again);
    assert_eq!(driver.called("register_buffer"), 1);
    pool.register(1, BufferKind::Preview, planes, false, driver.as_ref())?;
    assert_eq!(pool.state(), PoolState::Registered);
    assert_eq!(pool.registered_count(), 2);
    assert_eq!(pool.registration(1).map(|r| r.active), Some(false));
    assert_eq!(first.offset, 0);
    assert_eq!(first.len, 480 * 320 * 3 / 2);

    pool.teardown(driver.as_ref())?;
    assert_eq!(pool.state(), PoolState::Unmapped);
    assert_eq!(driver.registered(), 0);
    assert!(matches!(
        pool.register(0, BufferKind::Preview, planes, true, driver.as_ref()),
        Err(Error::Uninitialized(_))
    ));
    Ok(())
}

#[test]
#[serial]
fn test_refused_unregister_keeps_mapping() -> Result<(), Box<dyn StdError>> {
    let driver = FakeDriver::new();
    let pool = MemoryPool::thumbnail(&test_config(), 512 * 384 * 3 / 2)?;
    pool.register(
        0,
        BufferKind::Thumbnail,
        Planes::default(),
        true,
        driver.as_ref(),
    )?;

    driver.state.lock().fail_unregister = true;
    assert!(matches!(
        pool.teardown(driver.as_ref()),
        Err(Error::Driver { .. })
    ));
    assert_eq!(pool.state(), PoolState::Unregistering);
    assert!(pool.mapped_size().is_some());
    assert_eq!(pool.registered_count(), 1);

    driver.state.lock().fail_unregister = false;
    pool.teardown(driver.as_ref())?;
    assert_eq!(pool.state(), PoolState::Unmapped);
    assert!(pool.mapped_size().is_none());
    Ok(())
}

#[test]
#[serial]
fn test_jpeg_pool_sized_from_picture() -> Result<(), Box<dyn StdError>> {
    let pool = MemoryPool::jpeg(&test_config(), 64, 48)?;
    assert_eq!(pool.layout().frame_size, 64 * 48 * 3 / 2);

    let bounded = MemoryPool::jpeg(
        &HalConfig {
            jpeg_max_size: 100,
            ..test_config()
        },
        64,
        48,
    )?;
    bounded.copy_into(0, 0, &[0; 100])?;
    assert!(matches!(
        bounded.copy_into(0, 60, &[0; 50]),
        Err(Error::Truncated {
            accumulated: 110,
            expected: 100
        })
    ));
    Ok(())
}

#[test]
#[serial]
fn test_missing_heap_fails_cleanly() {
    let config = HalConfig {
        preview_heap: "/dev/dma_heap/does-not-exist".to_string(),
        ..test_config()
    };
    assert!(matches!(
        MemoryPool::preview(&config, 4096),
        Err(Error::Allocation(_))
    ));
    assert_eq!(config.raw_heap, MEMFD_HEAP);
}

#[test]
#[serial]
#[ignore = "requires a CMA dma-heap"]
fn test_physical_pool() -> Result<(), Box<dyn StdError>> {
    let mut pool = MemoryPool::physical("cma", "preview", PoolLayout::frames(460800, 4));
    pool.complete_initialization()?;
    println!("{pool}");
    let stride = pool.stride().ok_or("no stride")?;
    assert_eq!(stride % 4096, 0);
    assert!(pool.mapped_size().ok_or("not mapped")? >= 4 * stride);
    assert_eq!(
        pool.backing(),
        &Backing::Physical {
            heap: "cma".to_string()
        }
    );
    pool.teardown(FakeDriver::new().as_ref())?;
    Ok(())
}
