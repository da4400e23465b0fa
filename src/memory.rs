// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffer pools shared between the HAL, the kernel driver and the client.
//!
//! A [`MemoryPool`] is a fixed array of equal-sized buffers carved out of a
//! single mapped region. The region is backed either by an anonymous shared
//! memory object (`memfd`) or by a physically-contiguous DMA heap
//! allocation. Physically-contiguous pools are what the VFE writes into, so
//! their buffers are registered with the driver and the pool must outlive
//! every registration.
//!
//! Pool lifecycle:
//!
//! ```text
//! Failed                     backing could not be mapped; unusable
//! Mapped -> Ready            complete_initialization()
//! Ready -> Registered        register()
//! Registered -> Unregistering -> Unmapped   teardown()
//! ```
//!
//! If the driver refuses to unregister a buffer the pool stays in
//! `Unregistering` and the mapping is leaked rather than unmapped under the
//! hardware.

use crate::{
    config::HalConfig,
    driver::{yuv420sp_size, BufferKind, BufferRegistration, Driver, Planes},
    Error,
};
use dma_heap::{Heap, HeapKind};
use parking_lot::RwLock;
use std::{
    ffi::CString,
    fmt, io, mem,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
    path::PathBuf,
    ptr::{self, NonNull},
    slice,
};
use tracing::{debug, error, warn};

/// Geometry of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    /// Requested bytes per buffer, header included.
    pub buffer_size: usize,
    pub num_buffers: usize,
    /// Payload bytes per buffer.
    pub frame_size: usize,
    /// Offset of the payload from the start of the buffer.
    pub frame_offset: usize,
}

impl PoolLayout {
    /// One buffer per frame with no header.
    pub fn frames(frame_size: usize, num_buffers: usize) -> Self {
        Self {
            buffer_size: frame_size,
            num_buffers,
            frame_size,
            frame_offset: 0,
        }
    }

    /// Frames preceded by a `header` byte prefix.
    pub fn with_header(frame_size: usize, header: usize, num_buffers: usize) -> Self {
        Self {
            buffer_size: frame_size + header,
            num_buffers,
            frame_size,
            frame_offset: header,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Failed,
    Mapped,
    Ready,
    Registered,
    Unregistering,
    Unmapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// Anonymous shared memory.
    Anonymous,
    /// Physically-contiguous memory from the named DMA heap.
    Physical { heap: String },
}

/// One buffer of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBuffer {
    pub index: usize,
    /// Offset of the buffer inside the backing region.
    pub offset: usize,
    pub size: usize,
}

struct Mapping {
    fd: OwnedFd,
    base: NonNull<u8>,
    len: usize,
    stride: usize,
    alignment: usize,
}

// The mapping is plain shared memory; access is serialized by the pool lock.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) } != 0 {
            warn!("unmap failed: {}", io::Error::last_os_error());
        }
    }
}

struct PoolInner {
    state: PoolState,
    mapping: Option<Mapping>,
    buffers: Vec<PoolBuffer>,
    registrations: Vec<Option<BufferRegistration>>,
}

impl PoolInner {
    fn usable(&self) -> bool {
        matches!(self.state, PoolState::Ready | PoolState::Registered)
    }
}

/// A fixed-size buffer array over one mapped region.
pub struct MemoryPool {
    name: String,
    backing: Backing,
    layout: PoolLayout,
    inner: RwLock<PoolInner>,
}

/// Heap name that backs device pools with anonymous shared memory, for hosts
/// without DMA heaps.
pub const MEMFD_HEAP: &str = "memfd";

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

fn heap_kind(heap: &str) -> HeapKind {
    match heap {
        "cma" | "linux,cma" => HeapKind::Cma,
        "system" => HeapKind::System,
        path => HeapKind::Custom(PathBuf::from(path)),
    }
}

fn map_shared(fd: OwnedFd, len: usize, stride: usize, alignment: usize) -> io::Result<Mapping> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    let base =
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))?;
    Ok(Mapping {
        fd,
        base,
        len,
        stride,
        alignment,
    })
}

fn map_anonymous(name: &str, layout: &PoolLayout) -> io::Result<Mapping> {
    let page = page_size();
    let stride = layout.buffer_size;
    let len = (stride * layout.num_buffers).next_multiple_of(page);
    let cname = CString::new(name)?;
    let raw = unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    map_shared(fd, len, stride, 1)
}

fn map_physical(heap: &str, layout: &PoolLayout) -> io::Result<Mapping> {
    let page = page_size();
    // Buffers must not straddle a page: the VFE addresses each one on its own.
    let stride = layout.buffer_size.next_multiple_of(page);
    let requested = stride * layout.num_buffers;
    let heap = Heap::new(heap_kind(heap)).map_err(io::Error::other)?;
    let fd = heap.allocate(requested).map_err(io::Error::other)?;

    // The heap may round the allocation up; map what it really gave us.
    let real = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
    if real < 0 {
        return Err(io::Error::last_os_error());
    }
    let real = real as usize;
    if real < requested {
        return Err(io::Error::other(format!(
            "heap returned {real} bytes, {requested} requested"
        )));
    }
    map_shared(fd, real, stride, page)
}

impl MemoryPool {
    fn with_mapping(
        name: &str,
        backing: Backing,
        layout: PoolLayout,
        mapping: io::Result<Mapping>,
    ) -> Self {
        let (state, mapping) = match mapping {
            Ok(m) => {
                debug!(
                    "{name} pool mapped {} bytes, stride {} align {}",
                    m.len, m.stride, m.alignment
                );
                (PoolState::Mapped, Some(m))
            }
            Err(e) => {
                warn!("{name} pool backing failed: {e}");
                (PoolState::Failed, None)
            }
        };
        Self {
            name: name.to_string(),
            backing,
            layout,
            inner: RwLock::new(PoolInner {
                state,
                mapping,
                buffers: Vec::new(),
                registrations: Vec::new(),
            }),
        }
    }

    /// Maps a pool over anonymous shared memory.
    ///
    /// A mapping failure leaves the pool in [`PoolState::Failed`]; check
    /// [`MemoryPool::initialized`] after [`MemoryPool::complete_initialization`].
    pub fn anonymous(name: &str, layout: PoolLayout) -> Self {
        let mapping = map_anonymous(name, &layout);
        Self::with_mapping(name, Backing::Anonymous, layout, mapping)
    }

    /// Maps a pool over physically-contiguous memory from `heap`.
    pub fn physical(heap: &str, name: &str, layout: PoolLayout) -> Self {
        let mapping = map_physical(heap, &layout);
        let backing = Backing::Physical {
            heap: heap.to_string(),
        };
        Self::with_mapping(name, backing, layout, mapping)
    }

    fn device(heap: &str, name: &str, layout: PoolLayout) -> Self {
        match heap {
            MEMFD_HEAP => Self::anonymous(name, layout),
            heap => Self::physical(heap, name, layout),
        }
    }

    /// Viewfinder frames, physically contiguous, one buffer per frame.
    pub fn preview(config: &HalConfig, frame_size: usize) -> Result<Self, Error> {
        let layout = PoolLayout::frames(frame_size, config.preview_buffers);
        Self::device(&config.preview_heap, "preview", layout).initialize()
    }

    /// Full-resolution snapshot frames, physically contiguous.
    pub fn raw(config: &HalConfig, frame_size: usize) -> Result<Self, Error> {
        let layout =
            PoolLayout::with_header(frame_size, config.raw_frame_header, config.raw_buffers);
        Self::device(&config.raw_heap, "raw", layout).initialize()
    }

    /// Snapshot thumbnail fed to the encoder alongside the main image.
    pub fn thumbnail(config: &HalConfig, frame_size: usize) -> Result<Self, Error> {
        let layout = PoolLayout::frames(frame_size, 1);
        Self::device(&config.raw_heap, "thumbnail", layout).initialize()
    }

    /// Encoded picture output, anonymous shared memory.
    pub fn jpeg(config: &HalConfig, picture_width: u32, picture_height: u32) -> Result<Self, Error> {
        let max = match config.jpeg_max_size {
            0 => yuv420sp_size(picture_width, picture_height)
                .ok_or_else(|| Error::Allocation("jpeg".to_string()))?,
            n => n,
        };
        let layout = PoolLayout::frames(max, config.jpeg_buffers);
        Self::anonymous("jpeg", layout).initialize()
    }

    fn initialize(mut self) -> Result<Self, Error> {
        self.complete_initialization()?;
        Ok(self)
    }

    /// Builds the buffer handles over the mapped region.
    ///
    /// Must run exactly once, after the backing is mapped and before any
    /// buffer is handed to the driver or the client.
    pub fn complete_initialization(&mut self) -> Result<(), Error> {
        let name = &self.name;
        let layout = self.layout;
        let inner = self.inner.get_mut();
        let stride = match (&inner.state, &inner.mapping) {
            (PoolState::Mapped, Some(mapping)) => mapping.stride,
            (PoolState::Failed, _) | (PoolState::Unmapped, _) | (_, None) => {
                return Err(Error::Allocation(name.clone()));
            }
            _ => return Err(Error::AlreadyInitialized(name.clone())),
        };
        if layout.num_buffers == 0 || layout.frame_offset + layout.frame_size > layout.buffer_size {
            inner.state = PoolState::Failed;
            inner.mapping = None;
            return Err(Error::Allocation(name.clone()));
        }
        inner.buffers = (0..layout.num_buffers)
            .map(|index| PoolBuffer {
                index,
                offset: index * stride,
                size: layout.buffer_size,
            })
            .collect();
        inner.registrations = vec![None; layout.num_buffers];
        inner.state = PoolState::Ready;
        Ok(())
    }

    /// True once the backing is mapped and the buffers are built, until
    /// teardown.
    pub fn initialized(&self) -> bool {
        self.inner.read().usable()
    }

    pub fn state(&self) -> PoolState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    pub fn count(&self) -> usize {
        self.layout.num_buffers
    }

    /// Distance between consecutive buffers; the aligned buffer size.
    pub fn stride(&self) -> Option<usize> {
        self.inner.read().mapping.as_ref().map(|m| m.stride)
    }

    /// Size of the mapped region as reported by the backing.
    pub fn mapped_size(&self) -> Option<usize> {
        self.inner.read().mapping.as_ref().map(|m| m.len)
    }

    pub fn buffer(&self, index: usize) -> Result<PoolBuffer, Error> {
        let inner = self.inner.read();
        if !inner.usable() {
            return Err(Error::Uninitialized(self.name.clone()));
        }
        inner
            .buffers
            .get(index)
            .copied()
            .ok_or_else(|| self.out_of_range(index))
    }

    fn out_of_range(&self, index: usize) -> Error {
        Error::BufferIndex {
            pool: self.name.clone(),
            index,
            count: self.layout.num_buffers,
        }
    }

    fn frame_ptr(&self, inner: &PoolInner, index: usize) -> Result<*mut u8, Error> {
        if !inner.usable() {
            return Err(Error::Uninitialized(self.name.clone()));
        }
        let (Some(mapping), Some(buffer)) = (inner.mapping.as_ref(), inner.buffers.get(index))
        else {
            return Err(self.out_of_range(index));
        };
        Ok(unsafe {
            mapping
                .base
                .as_ptr()
                .add(buffer.offset + self.layout.frame_offset)
        })
    }

    /// Runs `f` over the payload of buffer `index`.
    ///
    /// The pool cannot be torn down while `f` runs.
    pub fn with_frame<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, Error> {
        let inner = self.inner.read();
        let ptr = self.frame_ptr(&inner, index)?;
        let data = unsafe { slice::from_raw_parts(ptr, self.layout.frame_size) };
        Ok(f(data))
    }

    /// Runs `f` over the writable payload of buffer `index`.
    pub fn with_frame_mut<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, Error> {
        let inner = self.inner.write();
        let ptr = self.frame_ptr(&inner, index)?;
        let data = unsafe { slice::from_raw_parts_mut(ptr, self.layout.frame_size) };
        Ok(f(data))
    }

    /// Copies `data` into buffer `index` at `offset` within the payload.
    pub fn copy_into(&self, index: usize, offset: usize, data: &[u8]) -> Result<(), Error> {
        let capacity = self.layout.frame_size;
        if offset + data.len() > capacity {
            return Err(Error::Truncated {
                accumulated: offset + data.len(),
                expected: capacity,
            });
        }
        self.with_frame_mut(index, |frame| {
            frame[offset..offset + data.len()].copy_from_slice(data)
        })
    }

    /// Registers buffer `index` with the driver.
    pub fn register(
        &self,
        index: usize,
        kind: BufferKind,
        planes: Planes,
        active: bool,
        driver: &dyn Driver,
    ) -> Result<BufferRegistration, Error> {
        let mut inner = self.inner.write();
        let ptr = self.frame_ptr(&inner, index)?;
        if let Some(existing) = inner.registrations[index] {
            return Ok(existing);
        }
        let (Some(mapping), Some(buffer)) = (inner.mapping.as_ref(), inner.buffers.get(index))
        else {
            return Err(self.out_of_range(index));
        };
        let registration = BufferRegistration {
            kind,
            index,
            fd: mapping.fd.as_raw_fd(),
            vaddr: ptr as usize,
            offset: buffer.offset + self.layout.frame_offset,
            len: self.layout.frame_size,
            planes,
            active,
        };
        driver
            .register_buffer(&registration)
            .map_err(Error::driver("register buffer"))?;
        inner.registrations[index] = Some(registration);
        inner.state = PoolState::Registered;
        debug!("{} buffer {index} registered as {kind:?}", self.name);
        Ok(registration)
    }

    /// The registration of buffer `index`, if it is registered.
    pub fn registration(&self, index: usize) -> Option<BufferRegistration> {
        self.inner.read().registrations.get(index).copied().flatten()
    }

    pub fn registered_count(&self) -> usize {
        self.inner.read().registrations.iter().flatten().count()
    }

    /// Unregisters every buffer from the driver, then unmaps the backing.
    ///
    /// Idempotent once the pool is unmapped. If the driver refuses an
    /// unregistration the pool is left in [`PoolState::Unregistering`] with
    /// its mapping intact and the call can be retried.
    pub fn teardown(&self, driver: &dyn Driver) -> Result<(), Error> {
        let mut inner = self.inner.write();
        match inner.state {
            PoolState::Unmapped => return Ok(()),
            PoolState::Registered | PoolState::Unregistering => {
                inner.state = PoolState::Unregistering;
            }
            _ => {}
        }

        let mut failure = None;
        for slot in inner.registrations.iter_mut() {
            let Some(registration) = *slot else { continue };
            match driver.unregister_buffer(&registration) {
                Ok(()) => *slot = None,
                Err(e) => {
                    error!(
                        "{} buffer {} unregister failed: {e}",
                        self.name, registration.index
                    );
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(source) = failure {
            return Err(Error::Driver {
                op: "unregister buffer",
                source,
            });
        }

        inner.buffers.clear();
        inner.mapping = None;
        inner.state = PoolState::Unmapped;
        debug!("{} pool unmapped", self.name);
        Ok(())
    }

    /// A duplicate handle to the backing region for zero-copy client access.
    pub fn heap(&self) -> Result<HeapHandle, Error> {
        let inner = self.inner.read();
        let mapping = match (inner.usable(), inner.mapping.as_ref()) {
            (true, Some(m)) => m,
            _ => return Err(Error::Uninitialized(self.name.clone())),
        };
        Ok(HeapHandle {
            fd: mapping.fd.try_clone()?,
            size: mapping.len,
            stride: mapping.stride,
            layout: self.layout,
        })
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if matches!(
            inner.state,
            PoolState::Registered | PoolState::Unregistering
        ) {
            error!(
                "{} pool dropped with {} driver registrations, leaking its mapping",
                self.name,
                inner.registrations.iter().flatten().count()
            );
            mem::forget(inner.mapping.take());
        }
    }
}

impl fmt::Display for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.read();
        let backing = match &self.backing {
            Backing::Anonymous => "anonymous".to_string(),
            Backing::Physical { heap } => format!("physical:{heap}"),
        };
        write!(
            f,
            "{} {} {}x{} frame {}@{} {:?}",
            self.name,
            backing,
            self.layout.num_buffers,
            self.layout.buffer_size,
            self.layout.frame_size,
            self.layout.frame_offset,
            inner.state,
        )?;
        if let Some(m) = &inner.mapping {
            write!(f, " stride {} mapped {}", m.stride, m.len)?;
        }
        Ok(())
    }
}

/// Client handle to a pool's backing region.
#[derive(Debug)]
pub struct HeapHandle {
    fd: OwnedFd,
    size: usize,
    stride: usize,
    layout: PoolLayout,
}

impl HeapHandle {
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Distance between buffers in the region.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// Offset of the payload of buffer `index` in the region.
    pub fn frame_offset(&self, index: usize) -> usize {
        index * self.stride + self.layout.frame_offset
    }

    /// Maps the region read-only into this process.
    pub fn map(&self) -> io::Result<MappedHeap> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                self.size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(MappedHeap {
            ptr: ptr.cast(),
            len: self.size,
        })
    }
}

/// Read-only view of a [`HeapHandle`]; unmapped on drop.
pub struct MappedHeap {
    ptr: *const u8,
    len: usize,
}

impl MappedHeap {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for MappedHeap {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) } != 0 {
            warn!("heap unmap failed: {}", io::Error::last_os_error());
        }
    }
}
