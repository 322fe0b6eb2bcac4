//! Display surface acquisition
//!
//! [`SurfaceAcquirer`] walks an ordered list of candidate modesets. For each
//! one it allocates a framebuffer, reads the CRTC's current configuration and
//! commits the new framebuffer to it. The first candidate that gets through
//! all three steps becomes the [`DisplaySurface`]; any failure along the way
//! is logged, the candidate's device objects are released, and the next
//! candidate is tried.

use crate::DrmError;
use crate::device::{CrtcState, DrmDevice, Modeset};
use crate::framebuffer::Framebuffer;
use crate::image::{Color, ColorModel, DrawImage, Nrgba, Rect, Rgb565Image};
use std::sync::Arc;

/// Where the acquirer currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireState {
    /// Nothing attempted yet
    Idle,
    /// Attempting this candidate
    Trying(Modeset),
    /// This candidate is on screen
    Acquired(Modeset),
    /// Every one of `attempts` candidates failed; the caller got
    /// [`DrmError::NoUsableModeset`]
    Exhausted { attempts: usize },
}

/// Tries candidate modesets until one can be displayed
#[derive(Debug)]
pub struct SurfaceAcquirer<D: DrmDevice> {
    device: Arc<D>,
    state: AcquireState,
    attempts: usize,
}

impl<D: DrmDevice> SurfaceAcquirer<D> {
    /// Take ownership of `device`, refusing it unless it supports dumb
    /// buffers.
    pub fn new(device: D) -> Result<Self, DrmError> {
        Self::from_shared(Arc::new(device))
    }

    /// Like [`SurfaceAcquirer::new`] for a device that is already shared
    pub fn from_shared(device: Arc<D>) -> Result<Self, DrmError> {
        match device.has_dumb_buffer() {
            Ok(true) => {}
            Ok(false) => return Err(DrmError::Capability),
            Err(e) => {
                tracing::warn!("Dumb buffer capability query failed: {}", e);
                return Err(DrmError::Capability);
            }
        }

        Ok(Self {
            device,
            state: AcquireState::Idle,
            attempts: 0,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn state(&self) -> &AcquireState {
        &self.state
    }

    /// Number of candidates attempted so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Try `candidates` in order and return the first displayable surface.
    ///
    /// Per-candidate failures are only logged; the caller sees either a
    /// surface or [`DrmError::NoUsableModeset`].
    pub fn acquire<I>(&mut self, candidates: I) -> Result<DisplaySurface<D>, DrmError>
    where
        I: IntoIterator<Item = Modeset>,
    {
        for modeset in candidates {
            self.state = AcquireState::Trying(modeset);
            self.attempts += 1;

            match self.try_modeset(&modeset) {
                Ok(surface) => {
                    tracing::info!(
                        "Display ready: {}x{} on connector {} via CRTC {} (framebuffer {})",
                        modeset.width(),
                        modeset.height(),
                        modeset.connector,
                        modeset.crtc,
                        surface.framebuffer_id()
                    );
                    self.state = AcquireState::Acquired(modeset);
                    return Ok(surface);
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping modeset for connector {} (CRTC {}, {}x{}): {}",
                        modeset.connector,
                        modeset.crtc,
                        modeset.width(),
                        modeset.height(),
                        e
                    );
                }
            }
        }

        self.state = AcquireState::Exhausted {
            attempts: self.attempts,
        };
        tracing::error!("No usable modeset after {} candidate(s)", self.attempts);
        Err(DrmError::NoUsableModeset)
    }

    fn try_modeset(&self, modeset: &Modeset) -> Result<DisplaySurface<D>, DrmError> {
        let framebuffer = Framebuffer::acquire(&self.device, modeset.width(), modeset.height())?;

        let saved_crtc = self
            .device
            .get_crtc(modeset.crtc)
            .map_err(|source| DrmError::CrtcQuery {
                crtc: modeset.crtc,
                connector: modeset.connector,
                source,
            })?;

        self.device
            .set_crtc(
                modeset.crtc,
                framebuffer.id(),
                (0, 0),
                &[modeset.connector],
                &modeset.mode,
            )
            .map_err(|source| DrmError::CrtcCommit {
                crtc: modeset.crtc,
                connector: modeset.connector,
                source,
            })?;

        let stride = framebuffer.stride() as usize;
        let image = Rgb565Image::new(framebuffer, stride, modeset.width(), modeset.height())?;

        Ok(DisplaySurface {
            image,
            modeset: *modeset,
            saved_crtc,
        })
    }
}

/// A framebuffer on screen, drawable through [`DrawImage`].
///
/// Owns the framebuffer and, through it, the device: the mapping stays
/// valid for the surface's whole lifetime. Dropping the surface releases
/// the framebuffer, which blanks the output.
#[derive(Debug)]
pub struct DisplaySurface<D: DrmDevice> {
    image: Rgb565Image<Framebuffer<D>>,
    modeset: Modeset,
    saved_crtc: CrtcState,
}

impl<D: DrmDevice> DisplaySurface<D> {
    /// The modeset being displayed
    pub fn modeset(&self) -> &Modeset {
        &self.modeset
    }

    /// CRTC configuration read just before this surface was committed
    pub fn saved_crtc(&self) -> &CrtcState {
        &self.saved_crtc
    }

    pub fn framebuffer_id(&self) -> u32 {
        self.framebuffer().id()
    }

    pub fn framebuffer(&self) -> &Framebuffer<D> {
        self.image.store()
    }

    /// Bytes per scanline
    pub fn stride(&self) -> usize {
        self.image.stride()
    }

    /// Byte offset of pixel `(x, y)` in [`DisplaySurface::pixels`], or
    /// `None` outside the bounds
    pub fn pix_offset(&self, x: i32, y: i32) -> Option<usize> {
        self.image.pix_offset(x, y)
    }

    /// Raw framebuffer bytes
    pub fn pixels(&self) -> &[u8] {
        self.image.pixels()
    }
}

impl<D: DrmDevice> DrawImage for DisplaySurface<D> {
    fn bounds(&self) -> Rect {
        self.image.bounds()
    }

    fn color_model(&self) -> ColorModel {
        self.image.color_model()
    }

    fn at(&self, x: i32, y: i32) -> Nrgba {
        self.image.at(x, y)
    }

    fn set(&mut self, x: i32, y: i32, color: &dyn Color) {
        self.image.set(x, y, color)
    }
}
