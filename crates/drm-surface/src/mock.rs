//! Mock DRM card for testing without display hardware
//!
//! [`MockCard`] implements [`DrmDevice`] entirely in memory. It records every
//! call, tracks which device objects are still alive, can be told to fail
//! specific operations, and hands out mappings pre-filled with non-zero
//! "stale" bytes so callers can check they clear them.
//!
//! # Usage
//!
//! ```
//! use drm_surface::mock::{MockCard, MockConnector, MockFailure};
//! use drm_surface::{SurfaceAcquirer, discover_modesets};
//!
//! let card = MockCard::new()
//!     .with_connector(MockConnector::connected(31, 1280, 720))
//!     .with_connector(MockConnector::connected(32, 640, 480));
//!
//! // First allocation attempt is refused
//! card.fail_times(MockFailure::CreateDumb, 1);
//!
//! let modesets = discover_modesets(&card, true).unwrap();
//! assert_eq!(modesets.len(), 2);
//!
//! let mut acquirer = SurfaceAcquirer::new(card).unwrap();
//! let surface = acquirer.acquire(modesets).unwrap();
//! assert_eq!(surface.modeset().connector, 32);
//! assert_eq!(acquirer.attempts(), 2);
//! ```

use crate::device::{
    CardResources, Connection, ConnectorInfo, CrtcState, DrmDevice, DumbBuffer, EncoderInfo,
    FramebufferDesc, ModeInfo,
};
use nix::errno::Errno;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Byte value fresh mock mappings are filled with
pub const STALE_BYTE: u8 = 0xa5;

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFailure {
    HasDumbBuffer,
    Resources,
    Connector,
    Encoder,
    CreateDumb,
    AddFramebuffer,
    MapDumb,
    MapMemory,
    GetCrtc,
    SetCrtc,
}

impl MockFailure {
    /// Errno reported when this failure triggers
    pub fn errno(self) -> Errno {
        match self {
            MockFailure::HasDumbBuffer => Errno::EIO,
            MockFailure::Resources => Errno::EACCES,
            MockFailure::Connector => Errno::EIO,
            MockFailure::Encoder => Errno::ENOENT,
            MockFailure::CreateDumb => Errno::ENOMEM,
            MockFailure::AddFramebuffer => Errno::EINVAL,
            MockFailure::MapDumb => Errno::ENOENT,
            MockFailure::MapMemory => Errno::ENOMEM,
            MockFailure::GetCrtc => Errno::ENOENT,
            MockFailure::SetCrtc => Errno::EINVAL,
        }
    }
}

/// Recorded device call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    HasDumbBuffer,
    Resources,
    Connector(u32),
    Encoder(u32),
    CreateDumb { width: u32, height: u32, bpp: u32 },
    DestroyDumb(u32),
    AddFramebuffer(FramebufferDesc),
    RemoveFramebuffer(u32),
    MapDumb(u32),
    MapMemory { offset: u64, len: usize },
    Unmap,
    GetCrtc(u32),
    SetCrtc {
        crtc: u32,
        fb_id: u32,
        connectors: Vec<u32>,
        width: u32,
        height: u32,
    },
}

/// Connector as the mock card reports it
#[derive(Debug, Clone)]
pub struct MockConnector {
    pub id: u32,
    pub connection: Connection,
    pub modes: Vec<ModeInfo>,
    /// CRTC currently driving this connector, if any
    pub bound_crtc: Option<u32>,
}

impl MockConnector {
    pub fn connected(id: u32, width: u16, height: u16) -> Self {
        Self {
            id,
            connection: Connection::Connected,
            modes: vec![ModeInfo::with_size(width, height, 60)],
            bound_crtc: None,
        }
    }

    pub fn disconnected(id: u32) -> Self {
        Self {
            id,
            connection: Connection::Disconnected,
            modes: Vec::new(),
            bound_crtc: None,
        }
    }

    pub fn unknown(id: u32, width: u16, height: u16) -> Self {
        Self {
            connection: Connection::Unknown,
            ..Self::connected(id, width, height)
        }
    }

    /// Report this connector as already driven by `crtc`
    pub fn bound_to(mut self, crtc: u32) -> Self {
        self.bound_crtc = Some(crtc);
        self
    }
}

/// Shared mock state
#[derive(Debug)]
pub struct MockState {
    pub dumb_buffers_supported: bool,
    pub pitch_alignment: u32,
    /// Bytes to drop from the end of every mapping
    pub mapping_shortfall: usize,
    pub crtcs: Vec<u32>,
    pub connectors: Vec<MockConnector>,
    pub crtc_states: BTreeMap<u32, CrtcState>,
    pub calls: Vec<MockCall>,
    /// Remaining failures per operation, `None` meaning forever
    pub failures: HashMap<MockFailure, Option<u32>>,
    /// Allocation sizes refused with `ENOMEM`
    pub refused_sizes: HashSet<(u32, u32)>,
    /// CRTCs that refuse every commit with `EINVAL`
    pub refused_crtcs: HashSet<u32>,
    pub dumb_buffers: BTreeMap<u32, DumbBuffer>,
    pub framebuffers: BTreeMap<u32, FramebufferDesc>,
    pub live_mappings: usize,
    next_handle: u32,
    next_fb_id: u32,
}

impl MockState {
    fn new(crtcs: &[u32]) -> Self {
        let crtc_states = crtcs
            .iter()
            .map(|&crtc_id| {
                (
                    crtc_id,
                    CrtcState {
                        crtc_id,
                        fb_id: 0,
                        x: 0,
                        y: 0,
                        gamma_size: 256,
                        mode: None,
                    },
                )
            })
            .collect();

        Self {
            dumb_buffers_supported: true,
            pitch_alignment: 64,
            mapping_shortfall: 0,
            crtcs: crtcs.to_vec(),
            connectors: Vec::new(),
            crtc_states,
            calls: Vec::new(),
            failures: HashMap::new(),
            refused_sizes: HashSet::new(),
            refused_crtcs: HashSet::new(),
            dumb_buffers: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            live_mappings: 0,
            next_handle: 1,
            next_fb_id: 100,
        }
    }

    fn check(&mut self, failure: MockFailure) -> Result<(), Errno> {
        match self.failures.get_mut(&failure) {
            Some(None) => Err(failure.errno()),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(failure.errno())
            }
            _ => Ok(()),
        }
    }

    // Every connector gets one encoder (id = connector id + 1000) that can
    // drive any CRTC.
    fn encoder_for(&self, encoder_id: u32) -> Option<EncoderInfo> {
        let connector = self.connectors.iter().find(|c| c.id + 1000 == encoder_id)?;
        Some(EncoderInfo {
            encoder_id,
            crtc_id: connector.bound_crtc.unwrap_or(0),
            possible_crtcs: (1u32 << self.crtcs.len().min(31)) - 1,
        })
    }
}

/// In-memory DRM card
#[derive(Debug, Clone)]
pub struct MockCard {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockCard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCard {
    /// Card with two CRTCs and no connectors
    pub fn new() -> Self {
        Self::with_crtcs(&[40, 41])
    }

    pub fn with_crtcs(crtcs: &[u32]) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::new(crtcs))),
        }
    }

    pub fn with_connector(self, connector: MockConnector) -> Self {
        self.with_state(|s| s.connectors.push(connector));
        self
    }

    pub fn with_pitch_alignment(self, alignment: u32) -> Self {
        self.with_state(|s| s.pitch_alignment = alignment.max(1));
        self
    }

    /// Make every mapping `shortfall` bytes shorter than requested
    pub fn with_short_mappings(self, shortfall: usize) -> Self {
        self.with_state(|s| s.mapping_shortfall = shortfall);
        self
    }

    pub fn without_dumb_buffers(self) -> Self {
        self.with_state(|s| s.dumb_buffers_supported = false);
        self
    }

    /// Fail every future call of `failure`
    pub fn fail(&self, failure: MockFailure) {
        self.with_state(|s| {
            s.failures.insert(failure, None);
        });
    }

    /// Fail the next `times` calls of `failure`
    pub fn fail_times(&self, failure: MockFailure, times: u32) {
        self.with_state(|s| {
            s.failures.insert(failure, Some(times));
        });
    }

    /// Refuse every dumb buffer allocation of exactly `width` x `height`
    pub fn refuse_size(&self, width: u32, height: u32) {
        self.with_state(|s| {
            s.refused_sizes.insert((width, height));
        });
    }

    /// Refuse every commit to `crtc_id`
    pub fn refuse_crtc(&self, crtc_id: u32) {
        self.with_state(|s| {
            s.refused_crtcs.insert(crtc_id);
        });
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    /// Live (dumb buffers, framebuffers, mappings)
    pub fn live_objects(&self) -> (usize, usize, usize) {
        self.with_state(|s| (s.dumb_buffers.len(), s.framebuffers.len(), s.live_mappings))
    }

    pub fn crtc_state(&self, crtc_id: u32) -> Option<CrtcState> {
        self.with_state(|s| s.crtc_states.get(&crtc_id).copied())
    }

    /// Shared state for manipulation in tests
    pub fn state(&self) -> Arc<RwLock<MockState>> {
        Arc::clone(&self.state)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

impl DrmDevice for MockCard {
    type Mapping = MockMapping;

    fn has_dumb_buffer(&self) -> Result<bool, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::HasDumbBuffer);
            s.check(MockFailure::HasDumbBuffer)?;
            Ok(s.dumb_buffers_supported)
        })
    }

    fn resources(&self) -> Result<CardResources, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::Resources);
            s.check(MockFailure::Resources)?;
            Ok(CardResources {
                crtcs: s.crtcs.clone(),
                connectors: s.connectors.iter().map(|c| c.id).collect(),
                encoders: s.connectors.iter().map(|c| c.id + 1000).collect(),
                min_width: 0,
                max_width: 8192,
                min_height: 0,
                max_height: 8192,
            })
        })
    }

    fn connector(&self, connector_id: u32) -> Result<ConnectorInfo, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::Connector(connector_id));
            s.check(MockFailure::Connector)?;
            let connector = s
                .connectors
                .iter()
                .find(|c| c.id == connector_id)
                .ok_or(Errno::ENOENT)?;

            Ok(ConnectorInfo {
                connector_id,
                connector_type: 11, // HDMI-A
                connection: connector.connection,
                encoder_id: connector.bound_crtc.map(|_| connector_id + 1000).unwrap_or(0),
                encoders: vec![connector_id + 1000],
                modes: connector.modes.clone(),
                mm_width: 0,
                mm_height: 0,
            })
        })
    }

    fn encoder(&self, encoder_id: u32) -> Result<EncoderInfo, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::Encoder(encoder_id));
            s.check(MockFailure::Encoder)?;
            s.encoder_for(encoder_id).ok_or(Errno::ENOENT)
        })
    }

    fn create_dumb_buffer(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::CreateDumb { width, height, bpp });
            s.check(MockFailure::CreateDumb)?;
            if s.refused_sizes.contains(&(width, height)) {
                return Err(Errno::ENOMEM);
            }
            if width == 0 || height == 0 {
                return Err(Errno::EINVAL);
            }

            let row = width * bpp.div_ceil(8);
            let pitch = row.div_ceil(s.pitch_alignment) * s.pitch_alignment;
            let buffer = DumbBuffer {
                handle: s.next_handle,
                pitch,
                size: pitch as u64 * height as u64,
            };
            s.next_handle += 1;
            s.dumb_buffers.insert(buffer.handle, buffer);

            tracing::debug!("[MOCK] Created dumb buffer {}", buffer.handle);
            Ok(buffer)
        })
    }

    fn destroy_dumb_buffer(&self, handle: u32) -> Result<(), Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::DestroyDumb(handle));
            s.dumb_buffers.remove(&handle).map(|_| ()).ok_or(Errno::ENOENT)
        })
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::AddFramebuffer(*desc));
            s.check(MockFailure::AddFramebuffer)?;
            if !s.dumb_buffers.contains_key(&desc.handle) {
                return Err(Errno::ENOENT);
            }

            let fb_id = s.next_fb_id;
            s.next_fb_id += 1;
            s.framebuffers.insert(fb_id, *desc);
            Ok(fb_id)
        })
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::RemoveFramebuffer(fb_id));
            s.framebuffers.remove(&fb_id).ok_or(Errno::ENOENT)?;

            // The kernel disables any CRTC still scanning out a removed framebuffer
            for crtc in s.crtc_states.values_mut() {
                if crtc.fb_id == fb_id {
                    crtc.fb_id = 0;
                    crtc.mode = None;
                }
            }
            Ok(())
        })
    }

    fn map_dumb_buffer(&self, handle: u32) -> Result<u64, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::MapDumb(handle));
            s.check(MockFailure::MapDumb)?;
            if !s.dumb_buffers.contains_key(&handle) {
                return Err(Errno::ENOENT);
            }
            Ok(handle as u64 * 0x1_0000_0000)
        })
    }

    fn map_memory(&self, offset: u64, len: usize) -> Result<MockMapping, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::MapMemory { offset, len });
            s.check(MockFailure::MapMemory)?;
            if len == 0 {
                return Err(Errno::EINVAL);
            }

            s.live_mappings += 1;
            Ok(MockMapping {
                bytes: vec![STALE_BYTE; len.saturating_sub(s.mapping_shortfall)],
                state: Arc::clone(&self.state),
            })
        })
    }

    fn get_crtc(&self, crtc_id: u32) -> Result<CrtcState, Errno> {
        self.with_state(|s| {
            s.calls.push(MockCall::GetCrtc(crtc_id));
            s.check(MockFailure::GetCrtc)?;
            s.crtc_states.get(&crtc_id).copied().ok_or(Errno::ENOENT)
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
        self.with_state(|s| {
            s.calls.push(MockCall::SetCrtc {
                crtc: crtc_id,
                fb_id,
                connectors: connectors.to_vec(),
                width: mode.width(),
                height: mode.height(),
            });
            s.check(MockFailure::SetCrtc)?;
            if s.refused_crtcs.contains(&crtc_id) {
                return Err(Errno::EINVAL);
            }
            if !s.framebuffers.contains_key(&fb_id) {
                return Err(Errno::ENOENT);
            }

            let crtc = s.crtc_states.get_mut(&crtc_id).ok_or(Errno::ENOENT)?;
            crtc.fb_id = fb_id;
            crtc.x = position.0;
            crtc.y = position.1;
            crtc.mode = Some(*mode);

            tracing::debug!("[MOCK] CRTC {} now scanning out framebuffer {}", crtc_id, fb_id);
            Ok(())
        })
    }
}

/// Mapping handed out by [`MockCard`]
#[derive(Debug)]
pub struct MockMapping {
    bytes: Vec<u8>,
    state: Arc<RwLock<MockState>>,
}

impl AsRef<[u8]> for MockMapping {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for MockMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.calls.push(MockCall::Unmap);
        state.live_mappings = state.live_mappings.saturating_sub(1);
    }
}
