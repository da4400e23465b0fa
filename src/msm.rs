// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! [`Driver`] over the MSM camera control and frame nodes.

use crate::{
    driver::{
        BufferKind, BufferRegistration, Dimension, Driver, FrameNotice, SensorParm, ZoomInfo,
    },
    Error,
};
use mmcamera_sys::{
    cam_parm_info_t, ctrl, msm_cam_ioctl_ctrl_command, msm_cam_ioctl_get_picture,
    msm_cam_ioctl_getframe, msm_cam_ioctl_register_pmem, msm_cam_ioctl_release_frame_buffer,
    msm_cam_ioctl_unblock_poll_frame, msm_cam_ioctl_unregister_pmem, msm_ctrl_cmd, msm_frame,
    msm_pmem_info, CAM_CTRL_SUCCESS, MSM_PMEM_MAINIMG, MSM_PMEM_OUTPUT2, MSM_PMEM_THUMBAIL,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
    ptr,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, trace};
use unix_ts::Timestamp;

/// Sends one control command on `fd` and checks the daemon's answer.
pub(crate) fn ctrl_command<T>(fd: RawFd, type_: u16, value: Option<&mut T>) -> io::Result<()> {
    let value = value.map_or(ptr::null_mut(), |v| v as *mut T);
    let mut cmd = unsafe { msm_ctrl_cmd::new(type_, value) };
    unsafe { msm_cam_ioctl_ctrl_command(fd, &mut cmd) }.map_err(io::Error::from)?;
    if cmd.status != CAM_CTRL_SUCCESS {
        return Err(io::Error::other(format!(
            "control command {type_} status {}",
            cmd.status
        )));
    }
    Ok(())
}

pub(crate) fn open_node(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| Error::Open {
            path: path.display().to_string(),
            source,
        })
}

/// The frame node that pairs with a control node: `controlN` → `frameN`.
fn frame_node(control: &Path) -> PathBuf {
    match control.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.starts_with("control") => {
            control.with_file_name(name.replacen("control", "frame", 1))
        }
        _ => control.to_path_buf(),
    }
}

fn pmem_type(kind: BufferKind) -> libc::c_int {
    match kind {
        BufferKind::Preview => MSM_PMEM_OUTPUT2,
        BufferKind::Thumbnail => MSM_PMEM_THUMBAIL,
        BufferKind::MainImage => MSM_PMEM_MAINIMG,
    }
}

fn pmem_info(registration: &BufferRegistration) -> msm_pmem_info {
    msm_pmem_info {
        type_: pmem_type(registration.kind),
        fd: registration.fd,
        vaddr: registration.vaddr as *mut libc::c_void,
        y_off: registration.planes.y_offset as u32,
        cbcr_off: registration.planes.cbcr_offset as u32,
        active: registration.active as u8,
    }
}

fn now() -> Timestamp {
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(since.as_secs() as i64, since.subsec_nanos())
}

enum Ready {
    Node,
    Woken,
}

pub struct MsmDriver {
    control: File,
    frame: File,
    /// Sticky wake-up for blocked waits, set by `unblock`.
    wake: OwnedFd,
    preview: Mutex<HashMap<usize, BufferRegistration>>,
}

impl MsmDriver {
    /// Opens the control node and its frame node.
    pub fn open(control: &Path) -> Result<Self, Error> {
        let frame_path = frame_node(control);
        let control = open_node(control)?;
        let frame = open_node(&frame_path)?;
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let wake = unsafe { OwnedFd::from_raw_fd(raw) };
        debug!("opened {}", frame_path.display());
        Ok(Self {
            control,
            frame,
            wake,
            preview: Mutex::new(HashMap::new()),
        })
    }

    fn fd(&self) -> RawFd {
        self.control.as_raw_fd()
    }

    fn ctrl<T>(&self, type_: u16, value: Option<&mut T>) -> io::Result<()> {
        ctrl_command(self.fd(), type_, value)
    }

    /// Consumes a pending wake-up. Returns whether there was one.
    fn drain_wake(&self) -> bool {
        let mut count = 0u64;
        let n = unsafe {
            libc::read(
                self.wake.as_raw_fd(),
                (&mut count as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        n == std::mem::size_of::<u64>() as isize
    }

    /// Blocks until `fd` is readable or a wake-up is posted.
    fn wait(&self, fd: RawFd) -> io::Result<Ready> {
        let mut fds = [
            libc::pollfd {
                fd,
                events: libc::POLLIN | libc::POLLPRI,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        loop {
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(e);
            }
            if fds[1].revents != 0 && self.drain_wake() {
                return Ok(Ready::Woken);
            }
            if fds[0].revents != 0 {
                return Ok(Ready::Node);
            }
        }
    }
}

impl Driver for MsmDriver {
    fn set_dimension(&self, dimension: &Dimension) -> io::Result<()> {
        let mut raw = dimension
            .to_raw()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.ctrl(ctrl::CAMERA_SET_PARM_DIMENSION, Some(&mut raw))
    }

    fn register_buffer(&self, registration: &BufferRegistration) -> io::Result<()> {
        let info = pmem_info(registration);
        unsafe { msm_cam_ioctl_register_pmem(self.fd(), &info) }.map_err(io::Error::from)?;
        if registration.kind == BufferKind::Preview {
            self.preview
                .lock()
                .insert(registration.index, *registration);
        }
        Ok(())
    }

    fn unregister_buffer(&self, registration: &BufferRegistration) -> io::Result<()> {
        let info = pmem_info(registration);
        unsafe { msm_cam_ioctl_unregister_pmem(self.fd(), &info) }.map_err(io::Error::from)?;
        if registration.kind == BufferKind::Preview {
            self.preview.lock().remove(&registration.index);
        }
        Ok(())
    }

    fn start_preview(&self) -> io::Result<()> {
        self.drain_wake();
        self.ctrl::<u8>(ctrl::CAMERA_START_PREVIEW, None)
    }

    fn stop_preview(&self) -> io::Result<()> {
        self.ctrl::<u8>(ctrl::CAMERA_STOP_PREVIEW, None)
    }

    fn wait_frame(&self) -> io::Result<Option<FrameNotice>> {
        if let Ready::Woken = self.wait(self.frame.as_raw_fd())? {
            return Ok(None);
        }
        let mut frame = msm_frame::default();
        match unsafe { msm_cam_ioctl_getframe(self.frame.as_raw_fd(), &mut frame) } {
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let vaddr = frame.buffer as usize;
        let index = self
            .preview
            .lock()
            .values()
            .find(|r| r.vaddr == vaddr)
            .map(|r| r.index)
            .ok_or_else(|| io::Error::other(format!("frame at {vaddr:#x} not registered")))?;
        trace!("getframe {index}");
        Ok(Some(FrameNotice {
            index,
            timestamp: now(),
        }))
    }

    fn release_frame(&self, notice: &FrameNotice) -> io::Result<()> {
        let registration = self
            .preview
            .lock()
            .get(&notice.index)
            .copied()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        let frame = msm_frame {
            buffer: registration.vaddr as libc::c_ulong,
            y_off: registration.planes.y_offset as u32,
            cbcr_off: registration.planes.cbcr_offset as u32,
            fd: registration.fd,
            ..Default::default()
        };
        unsafe { msm_cam_ioctl_release_frame_buffer(self.frame.as_raw_fd(), &frame) }
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn unblock(&self) -> io::Result<()> {
        let one = 1u64;
        let n = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { msm_cam_ioctl_unblock_poll_frame(self.frame.as_raw_fd()) }
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn start_snapshot(&self) -> io::Result<()> {
        self.drain_wake();
        self.ctrl::<u8>(ctrl::CAMERA_START_SNAPSHOT, None)
    }

    fn get_picture(&self) -> io::Result<()> {
        if let Ready::Woken = self.wait(self.fd())? {
            return Err(io::ErrorKind::Interrupted.into());
        }
        let mut cmd = unsafe { msm_ctrl_cmd::new::<u8>(0, ptr::null_mut()) };
        unsafe { msm_cam_ioctl_get_picture(self.fd(), &mut cmd) }.map_err(io::Error::from)?;
        if cmd.status != CAM_CTRL_SUCCESS {
            return Err(io::Error::other(format!("get picture status {}", cmd.status)));
        }
        Ok(())
    }

    fn stop_snapshot(&self) -> io::Result<()> {
        self.ctrl::<u8>(ctrl::CAMERA_STOP_SNAPSHOT, None)
    }

    fn get_zoom(&self) -> io::Result<ZoomInfo> {
        let mut info = cam_parm_info_t::default();
        self.ctrl(ctrl::CAMERA_GET_PARM_ZOOM, Some(&mut info))?;
        Ok(ZoomInfo {
            current: info.current_value,
            min: info.minimum_value,
            max: info.maximum_value,
            step: info.step_value,
        })
    }

    fn set_zoom(&self, value: i32) -> io::Result<()> {
        let mut value = value;
        self.ctrl(ctrl::CAMERA_SET_PARM_ZOOM, Some(&mut value))
    }

    fn set_parm(&self, parm: SensorParm, value: i32) -> io::Result<()> {
        let type_ = match parm {
            SensorParm::Effect => ctrl::CAMERA_SET_PARM_EFFECT,
            SensorParm::WhiteBalance => ctrl::CAMERA_SET_PARM_WB,
            SensorParm::Antibanding => ctrl::CAMERA_SET_PARM_ANTIBANDING,
            SensorParm::Brightness => ctrl::CAMERA_SET_PARM_BRIGHTNESS,
        };
        let mut value = value;
        self.ctrl(type_, Some(&mut value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_node_follows_control_node() {
        assert_eq!(
            frame_node(Path::new("/dev/msm_camera/control0")),
            PathBuf::from("/dev/msm_camera/frame0")
        );
        assert_eq!(
            frame_node(Path::new("/tmp/camera")),
            PathBuf::from("/tmp/camera")
        );
    }

    #[test]
    fn open_failure_names_the_node() {
        let err = MsmDriver::open(Path::new("/nonexistent/msm_camera/control0"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Open { .. }));
        assert_eq!(err.status(), -libc::ENODEV);
    }
}
