// src/surface/fbdev.rs

//! Linux framebuffer device (`/dev/fbN`) mapped as a host surface, using raw
//! `libc` ioctl and mmap calls.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr::NonNull;

use crate::surface::PixelSurface;

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;

#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

// Mirrors `struct fb_var_screeninfo` from <linux/fb.h>.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

// Mirrors `struct fb_fix_screeninfo` from <linux/fb.h>.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbFixScreenInfo {
    id: [libc::c_char; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

#[derive(Debug)]
pub struct FbdevSurface {
    fd: RawFd,
    map: NonNull<u8>,
    map_len: usize,
    width: u32,
    height: u32,
    depth: u32,
    stride: usize,
}

// SAFETY: the mapping is owned by this value and only touched through
// `SharedSurface`'s mutex.
unsafe impl Send for FbdevSurface {}

impl FbdevSurface {
    pub fn open(path: &Path) -> Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("Invalid framebuffer path {}", path.display()))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to open framebuffer {}", path.display()));
        }

        match Self::map(fd) {
            Ok(surface) => {
                debug!(
                    "FbdevSurface: mapped {} ({}x{}, {} bpp, stride {})",
                    path.display(),
                    surface.width,
                    surface.height,
                    surface.depth,
                    surface.stride
                );
                Ok(surface)
            }
            Err(e) => {
                unsafe { libc::close(fd) };
                Err(e)
            }
        }
    }

    fn map(fd: RawFd) -> Result<Self> {
        let mut var = FbVarScreenInfo::default();
        let var_ptr = &mut var as *mut FbVarScreenInfo;
        if unsafe { libc::ioctl(fd, FBIOGET_VSCREENINFO as _, var_ptr) } == -1 {
            return Err(io::Error::last_os_error()).context("FBIOGET_VSCREENINFO failed");
        }
        let mut fix = FbFixScreenInfo::default();
        let fix_ptr = &mut fix as *mut FbFixScreenInfo;
        if unsafe { libc::ioctl(fd, FBIOGET_FSCREENINFO as _, fix_ptr) } == -1 {
            return Err(io::Error::last_os_error()).context("FBIOGET_FSCREENINFO failed");
        }

        let stride = fix.line_length as usize;
        let map_len = fix.smem_len as usize;
        let visible = stride * var.yres as usize;
        if map_len < visible {
            anyhow::bail!(
                "Framebuffer memory ({} bytes) smaller than visible area ({} bytes)",
                map_len,
                visible
            );
        }

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).context("Failed to mmap framebuffer");
        }
        let map = NonNull::new(addr as *mut u8).context("mmap returned a null mapping")?;

        Ok(Self {
            fd,
            map,
            map_len,
            width: var.xres,
            height: var.yres,
            depth: var.bits_per_pixel,
            stride,
        })
    }

    fn visible_len(&self) -> usize {
        self.stride * self.height as usize
    }
}

impl PixelSurface for FbdevSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is at least `visible_len` bytes and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr(), self.visible_len()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes this the only live slice.
        unsafe { std::slice::from_raw_parts_mut(self.map.as_ptr(), self.visible_len()) }
    }
}

impl Drop for FbdevSurface {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.map.as_ptr() as *mut libc::c_void, self.map_len) } == -1 {
            warn!(
                "FbdevSurface: munmap failed: {}",
                io::Error::last_os_error()
            );
        }
        if unsafe { libc::close(self.fd) } == -1 {
            warn!("FbdevSurface: close failed: {}", io::Error::last_os_error());
        }
    }
}
