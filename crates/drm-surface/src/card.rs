//! DRM card device node access
//!
//! Opens `/dev/dri/cardN` and implements [`DrmDevice`] through the kernel's
//! mode-setting ioctls.

use crate::DrmError;
use crate::device::{
    CardResources, Connection, ConnectorInfo, CrtcState, DrmDevice, DumbBuffer, EncoderInfo,
    FramebufferDesc, ModeInfo,
};
use crate::ioctl;
use nix::errno::Errno;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Default directory holding DRM device nodes
pub const DRI_DIR: &str = "/dev/dri";

/// Variable-length ioctl results can change between the sizing call and the
/// fetch call (hotplug); give up after this many attempts.
const MAX_FETCH_ATTEMPTS: usize = 4;

/// Open DRM card
#[derive(Debug)]
pub struct Card {
    file: File,
    path: PathBuf,
}

impl Card {
    /// Open `/dev/dri/card<index>`
    pub fn open(index: u32) -> Result<Self, DrmError> {
        Self::open_path(Path::new(DRI_DIR).join(format!("card{}", index)))
    }

    /// Open a card device node by path
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, DrmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| DrmError::DeviceOpen {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Opened DRM device {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl DrmDevice for Card {
    type Mapping = MmapRegion;

    fn has_dumb_buffer(&self) -> Result<bool, Errno> {
        let mut cap = ioctl::DrmGetCap {
            capability: ioctl::DRM_CAP_DUMB_BUFFER,
            value: 0,
        };
        unsafe { ioctl::drm_get_cap(self.fd(), &mut cap) }?;
        Ok(cap.value != 0)
    }

    fn resources(&self) -> Result<CardResources, Errno> {
        for _ in 0..MAX_FETCH_ATTEMPTS {
            let mut res = ioctl::DrmModeCardRes::default();
            unsafe { ioctl::drm_mode_getresources(self.fd(), &mut res) }?;

            let mut crtcs = vec![0u32; res.count_crtcs as usize];
            let mut connectors = vec![0u32; res.count_connectors as usize];
            let mut encoders = vec![0u32; res.count_encoders as usize];
            let wanted = (res.count_crtcs, res.count_connectors, res.count_encoders);

            res.count_fbs = 0;
            res.fb_id_ptr = 0;
            res.crtc_id_ptr = crtcs.as_mut_ptr() as u64;
            res.connector_id_ptr = connectors.as_mut_ptr() as u64;
            res.encoder_id_ptr = encoders.as_mut_ptr() as u64;
            unsafe { ioctl::drm_mode_getresources(self.fd(), &mut res) }?;

            if (res.count_crtcs, res.count_connectors, res.count_encoders) != wanted {
                tracing::debug!("Card resources changed while reading, retrying");
                continue;
            }

            return Ok(CardResources {
                crtcs,
                connectors,
                encoders,
                min_width: res.min_width,
                max_width: res.max_width,
                min_height: res.min_height,
                max_height: res.max_height,
            });
        }

        Err(Errno::EAGAIN)
    }

    fn connector(&self, connector_id: u32) -> Result<ConnectorInfo, Errno> {
        for _ in 0..MAX_FETCH_ATTEMPTS {
            let mut conn = ioctl::DrmModeGetConnector {
                connector_id,
                ..Default::default()
            };
            unsafe { ioctl::drm_mode_getconnector(self.fd(), &mut conn) }?;

            let mut modes = vec![ModeInfo::default(); conn.count_modes as usize];
            let mut encoders = vec![0u32; conn.count_encoders as usize];
            let wanted = (conn.count_modes, conn.count_encoders);

            conn.modes_ptr = modes.as_mut_ptr() as u64;
            conn.encoders_ptr = encoders.as_mut_ptr() as u64;
            conn.count_props = 0;
            conn.props_ptr = 0;
            conn.prop_values_ptr = 0;
            unsafe { ioctl::drm_mode_getconnector(self.fd(), &mut conn) }?;

            if (conn.count_modes, conn.count_encoders) != wanted {
                tracing::debug!("Connector {} changed while reading, retrying", connector_id);
                continue;
            }

            return Ok(ConnectorInfo {
                connector_id: conn.connector_id,
                connector_type: conn.connector_type,
                connection: Connection::from_raw(conn.connection),
                encoder_id: conn.encoder_id,
                encoders,
                modes,
                mm_width: conn.mm_width,
                mm_height: conn.mm_height,
            });
        }

        Err(Errno::EAGAIN)
    }

    fn encoder(&self, encoder_id: u32) -> Result<EncoderInfo, Errno> {
        let mut enc = ioctl::DrmModeGetEncoder {
            encoder_id,
            ..Default::default()
        };
        unsafe { ioctl::drm_mode_getencoder(self.fd(), &mut enc) }?;

        Ok(EncoderInfo {
            encoder_id: enc.encoder_id,
            crtc_id: enc.crtc_id,
            possible_crtcs: enc.possible_crtcs,
        })
    }

    fn create_dumb_buffer(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, Errno> {
        let mut create = ioctl::DrmModeCreateDumb {
            width,
            height,
            bpp,
            ..Default::default()
        };
        unsafe { ioctl::drm_mode_create_dumb(self.fd(), &mut create) }?;

        Ok(DumbBuffer {
            handle: create.handle,
            pitch: create.pitch,
            size: create.size,
        })
    }

    fn destroy_dumb_buffer(&self, handle: u32) -> Result<(), Errno> {
        let mut destroy = ioctl::DrmModeDestroyDumb { handle };
        unsafe { ioctl::drm_mode_destroy_dumb(self.fd(), &mut destroy) }?;
        Ok(())
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, Errno> {
        let mut cmd = ioctl::DrmModeFbCmd {
            fb_id: 0,
            width: desc.width,
            height: desc.height,
            pitch: desc.pitch,
            bpp: desc.bpp,
            depth: desc.depth,
            handle: desc.handle,
        };
        unsafe { ioctl::drm_mode_addfb(self.fd(), &mut cmd) }?;
        Ok(cmd.fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno> {
        let mut id = fb_id;
        unsafe { ioctl::drm_mode_rmfb(self.fd(), &mut id) }?;
        Ok(())
    }

    fn map_dumb_buffer(&self, handle: u32) -> Result<u64, Errno> {
        let mut map = ioctl::DrmModeMapDumb {
            handle,
            ..Default::default()
        };
        unsafe { ioctl::drm_mode_map_dumb(self.fd(), &mut map) }?;
        Ok(map.offset)
    }

    fn map_memory(&self, offset: u64, len: usize) -> Result<MmapRegion, Errno> {
        MmapRegion::map(self.file.as_fd(), offset, len)
    }

    fn get_crtc(&self, crtc_id: u32) -> Result<CrtcState, Errno> {
        let mut crtc = ioctl::DrmModeCrtc {
            crtc_id,
            ..Default::default()
        };
        unsafe { ioctl::drm_mode_getcrtc(self.fd(), &mut crtc) }?;

        Ok(CrtcState {
            crtc_id: crtc.crtc_id,
            fb_id: crtc.fb_id,
            x: crtc.x,
            y: crtc.y,
            gamma_size: crtc.gamma_size,
            mode: (crtc.mode_valid != 0).then_some(crtc.mode),
        })
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        position: (u32, u32),
        connectors: &[u32],
        mode: &ModeInfo,
    ) -> Result<(), Errno> {
        let mut crtc = ioctl::DrmModeCrtc {
            set_connectors_ptr: connectors.as_ptr() as u64,
            count_connectors: connectors.len() as u32,
            crtc_id,
            fb_id,
            x: position.0,
            y: position.1,
            gamma_size: 0,
            mode_valid: 1,
            mode: *mode,
        };
        unsafe { ioctl::drm_mode_setcrtc(self.fd(), &mut crtc) }?;
        Ok(())
    }
}

/// Shared read/write memory mapping of a device buffer
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

// The region is plain device memory owned exclusively by this value.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Map `len` bytes of `fd` at `offset`
    pub fn map(fd: BorrowedFd<'_>, offset: u64, len: usize) -> Result<Self, Errno> {
        let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
        let offset = libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;

        let ptr = unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }?;

        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl AsMut<[u8]> for MmapRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mman::munmap(self.ptr, self.len) } {
            tracing::warn!("munmap of {} byte region failed: {}", self.len, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_missing_card() {
        let err = Card::open_path("/nonexistent/dri/card9").unwrap_err();
        match err {
            DrmError::DeviceOpen { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/dri/card9"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_regular_file_is_not_a_card() {
        let temp_file = NamedTempFile::new().unwrap();
        let card = Card::open_path(temp_file.path()).unwrap();
        assert_eq!(card.path(), temp_file.path());
        assert!(card.has_dumb_buffer().is_err());
    }

    #[test]
    fn test_mmap_region_shares_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0xaa; 4096]).unwrap();
        temp_file.flush().unwrap();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp_file.path())
            .unwrap();

        {
            let mut region = MmapRegion::map(file.as_fd(), 0, 4096).unwrap();
            assert_eq!(region.len(), 4096);
            assert!(region.as_ref().iter().all(|&b| b == 0xaa));
            region.as_mut()[0] = 0x11;
        }

        let contents = std::fs::read(temp_file.path()).unwrap();
        assert_eq!(contents[0], 0x11);
    }

    #[test]
    fn test_mmap_zero_length_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let file = File::open(temp_file.path()).unwrap();
        assert_eq!(
            MmapRegion::map(file.as_fd(), 0, 0).unwrap_err(),
            Errno::EINVAL
        );
    }
}
