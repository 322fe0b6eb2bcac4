//! DRM device capability trait and the data it exchanges
//!
//! [`DrmDevice`] is everything the acquisition logic needs from a card:
//! discovery queries, dumb-buffer lifecycle, framebuffer registration,
//! memory mapping and CRTC control. [`crate::Card`] implements it over real
//! ioctls, [`crate::mock::MockCard`] in memory.

use nix::errno::Errno;

/// Display timing, laid out exactly as the kernel's `drm_mode_modeinfo`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeInfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [u8; 32],
}

impl ModeInfo {
    /// Mode with only the visible size, refresh rate and name filled in
    pub fn with_size(width: u16, height: u16, vrefresh: u32) -> Self {
        let mut mode = Self {
            hdisplay: width,
            vdisplay: height,
            vrefresh,
            ..Self::default()
        };
        let name = format!("{}x{}", width, height);
        let len = name.len().min(mode.name.len() - 1);
        mode.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        mode
    }

    pub fn width(&self) -> u32 {
        self.hdisplay as u32
    }

    pub fn height(&self) -> u32 {
        self.vdisplay as u32
    }

    /// Mode name up to the first NUL
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// One way to drive an output: connector, CRTC and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modeset {
    pub connector: u32,
    pub crtc: u32,
    pub mode: ModeInfo,
}

impl Modeset {
    pub fn width(&self) -> u32 {
        self.mode.width()
    }

    pub fn height(&self) -> u32 {
        self.mode.height()
    }
}

/// Dumb buffer as reported by the device after allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbBuffer {
    pub handle: u32,
    /// Bytes per scanline, may include alignment padding
    pub pitch: u32,
    /// Total allocation size in bytes
    pub size: u64,
}

/// Parameters for registering a dumb buffer as a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bpp: u32,
    pub pitch: u32,
    pub handle: u32,
}

/// CRTC configuration as read back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcState {
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    /// Active mode, `None` when the CRTC is disabled
    pub mode: Option<ModeInfo>,
}

/// Card-wide object lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardResources {
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

/// Connector link status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected,
    Unknown,
}

impl Connection {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Connection::Connected,
            2 => Connection::Disconnected,
            _ => Connection::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub connector_id: u32,
    pub connector_type: u32,
    pub connection: Connection,
    /// Currently bound encoder, 0 when none
    pub encoder_id: u32,
    pub encoders: Vec<u32>,
    /// Supported modes, preferred first
    pub modes: Vec<ModeInfo>,
    pub mm_width: u32,
    pub mm_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub encoder_id: u32,
    /// Currently bound CRTC, 0 when none
    pub crtc_id: u32,
    /// Bitmask over the card's CRTC list
    pub possible_crtcs: u32,
}

/// Operations a DRM card must provide.
///
/// Errors are the raw errno the device reported.
pub trait DrmDevice {
    /// CPU view of a mapped buffer; unmapped when dropped.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    fn has_dumb_buffer(&self) -> Result<bool, Errno>;

    fn resources(&self) -> Result<CardResources, Errno>;

    fn connector(&self, connector_id: u32) -> Result<ConnectorInfo, Errno>;

    fn encoder(&self, encoder_id: u32) -> Result<EncoderInfo, Errno>;

    fn create_dumb_buffer(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, Errno>;

    fn destroy_dumb_buffer(&self, handle: u32) -> Result<(), Errno>;

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, Errno>;

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno>;

    /// Offset to pass to [`DrmDevice::map_memory`] for a dumb buffer
    fn map_dumb_buffer(&self, handle: u32) -> Result<u64, Errno>;

    /// Map `len` bytes at `offset`, read/write and shared with the device
    fn map_memory(&self, offset: u64, len: usize) -> Result<Self::Mapping, Errno>;

    fn get_crtc(&self, crtc_id: u32) -> Result<CrtcState, Errno>;

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        position: (u32, u32),
        connectors: &[u32],
        mode: &ModeInfo,
    ) -> Result<(), Errno>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_info_layout() {
        assert_eq!(std::mem::size_of::<ModeInfo>(), 68);
    }

    #[test]
    fn test_mode_with_size() {
        let mode = ModeInfo::with_size(1920, 1080, 60);
        assert_eq!(mode.width(), 1920);
        assert_eq!(mode.height(), 1080);
        assert_eq!(mode.name(), "1920x1080");
    }

    #[test]
    fn test_connection_from_raw() {
        assert_eq!(Connection::from_raw(1), Connection::Connected);
        assert_eq!(Connection::from_raw(2), Connection::Disconnected);
        assert_eq!(Connection::from_raw(3), Connection::Unknown);
        assert_eq!(Connection::from_raw(0), Connection::Unknown);
    }
}
