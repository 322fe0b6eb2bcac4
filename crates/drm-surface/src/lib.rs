//! Paintable surfaces over DRM dumb buffers
//!
//! This crate opens a direct-rendering-manager card, finds an output it can
//! drive, allocates a CPU-mappable framebuffer for it, puts that framebuffer
//! on screen and hands back an image you can paint pixel by pixel.
//!
//! # Layers
//!
//! - [`image`]: the [`DrawImage`] contract and the packed RGB565 encoding
//! - [`device`]: the [`DrmDevice`] capability trait and its data types
//! - [`card`]: the real `/dev/dri/cardN` implementation over DRM ioctls
//! - [`modeset`]: connector/CRTC/mode discovery
//! - [`framebuffer`]: RAII ownership of one mapped dumb buffer
//! - [`acquire`]: tries candidate modesets until one can be displayed
//! - [`mock`]: in-memory device for tests and desktop development
//!
//! # Example
//!
//! ```no_run
//! use drm_surface::{DrawImage, Nrgba};
//!
//! fn main() -> drm_surface::Result<()> {
//!     let mut surface = drm_surface::open_display(0)?;
//!     let bounds = surface.bounds();
//!     println!("Display: {}x{}", bounds.width(), bounds.height());
//!
//!     surface.set(10, 10, &Nrgba::opaque(255, 0, 0));
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod card;
pub mod config;
pub mod device;
pub mod framebuffer;
pub mod image;
mod ioctl;
pub mod mock;
pub mod modeset;

pub use acquire::{AcquireState, DisplaySurface, SurfaceAcquirer};
pub use card::{Card, MmapRegion};
pub use config::{ConfigError, SurfaceConfig};
pub use device::{
    CardResources, Connection, ConnectorInfo, CrtcState, DrmDevice, DumbBuffer, EncoderInfo,
    FramebufferDesc, ModeInfo, Modeset,
};
pub use framebuffer::Framebuffer;
pub use image::{
    Color, ColorModel, DrawImage, Gray, Nrgba, Point, Rect, Rgb565Image, Rgba, pack_rgb565,
    unpack_rgb565,
};
pub use modeset::discover_modesets;

use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrmError {
    #[error("Failed to open DRM device {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DRM device does not support dumb buffers")]
    Capability,

    #[error("Modeset discovery failed ({what}): {source}")]
    ModesetDiscovery {
        what: String,
        #[source]
        source: Errno,
    },

    #[error("Failed to create {width}x{height} dumb buffer: {source}")]
    Allocation {
        width: u32,
        height: u32,
        #[source]
        source: Errno,
    },

    #[error("Cannot register {width}x{height} framebuffer: {source}")]
    Registration {
        width: u32,
        height: u32,
        #[source]
        source: Errno,
    },

    #[error("Cannot resolve map offset for buffer handle {handle}: {source}")]
    OffsetResolution {
        handle: u32,
        #[source]
        source: Errno,
    },

    #[error("Failed to mmap {size} byte framebuffer: {source}")]
    Mapping {
        size: u64,
        #[source]
        source: Errno,
    },

    #[error("Mapped {actual} bytes but the device reported {expected}")]
    MappingSize { expected: u64, actual: usize },

    #[error("Cannot get CRTC {crtc} for connector {connector}: {source}")]
    CrtcQuery {
        crtc: u32,
        connector: u32,
        #[source]
        source: Errno,
    },

    #[error("Cannot set CRTC {crtc} for connector {connector}: {source}")]
    CrtcCommit {
        crtc: u32,
        connector: u32,
        #[source]
        source: Errno,
    },

    #[error("Unable to find any usable modeset for framebuffer")]
    NoUsableModeset,

    #[error("Invalid surface geometry: {0}")]
    InvalidSurface(String),
}

/// Crate result type
pub type Result<T> = std::result::Result<T, DrmError>;

/// Acquire a drawable surface for `/dev/dri/card<index>`.
///
/// The card is opened, checked for dumb-buffer support, its modesets are
/// discovered and the first one that can be displayed wins. The returned
/// surface keeps the card open for as long as it lives.
pub fn open_display(index: u32) -> Result<DisplaySurface<Card>> {
    let config = SurfaceConfig {
        card: index,
        ..SurfaceConfig::default()
    };
    open_display_with(&config)
}

/// Acquire a drawable surface using an explicit configuration
pub fn open_display_with(config: &SurfaceConfig) -> Result<DisplaySurface<Card>> {
    let card = Card::open_path(config.device_path())?;
    let mut acquirer = SurfaceAcquirer::new(card)?;

    let modesets = discover_modesets(acquirer.device(), config.require_connected)?;
    tracing::debug!(
        "Found {} candidate modeset(s) on {}",
        modesets.len(),
        acquirer.device().path().display()
    );

    acquirer.acquire(modesets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DrmError::Allocation {
            width: 640,
            height: 480,
            source: Errno::ENOMEM,
        };
        assert!(err.to_string().contains("640x480"));

        let err = DrmError::NoUsableModeset;
        assert!(err.to_string().contains("modeset"));

        let err = DrmError::CrtcCommit {
            crtc: 41,
            connector: 33,
            source: Errno::EINVAL,
        };
        let msg = err.to_string();
        assert!(msg.contains("41") && msg.contains("33"));
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let config = SurfaceConfig {
            dri_dir: PathBuf::from("/nonexistent/dri"),
            ..SurfaceConfig::default()
        };
        let err = open_display_with(&config).unwrap_err();
        assert!(matches!(err, DrmError::DeviceOpen { .. }));
    }
}
