//! Mapped dumb-buffer framebuffers
//!
//! A [`Framebuffer`] is built in three owned layers, each released on drop
//! in reverse order of acquisition:
//!
//! 1. [`DumbAllocation`]: the device memory (destroyed last)
//! 2. [`FramebufferRegistration`]: the displayable framebuffer object
//! 3. the CPU mapping (unmapped first)
//!
//! A failure at any step drops the layers built so far, so an abandoned
//! attempt leaves nothing behind on the device. Every layer holds the
//! device through an `Arc`, keeping the file descriptor open for as long
//! as the mapping exists.

use crate::DrmError;
use crate::device::{DrmDevice, DumbBuffer, FramebufferDesc};
use std::sync::Arc;

/// Bits per pixel requested for the dumb buffer allocation
pub const ALLOCATION_BPP: u32 = 32;

/// Color depth used when registering the framebuffer object
pub const FRAMEBUFFER_DEPTH: u32 = 24;

/// Bits per pixel used when registering the framebuffer object
pub const FRAMEBUFFER_BPP: u32 = 32;

/// Dumb buffer owned until drop
#[derive(Debug)]
pub struct DumbAllocation<D: DrmDevice> {
    device: Arc<D>,
    buffer: DumbBuffer,
}

impl<D: DrmDevice> DumbAllocation<D> {
    pub fn create(device: &Arc<D>, width: u32, height: u32) -> Result<Self, DrmError> {
        let buffer = device
            .create_dumb_buffer(width, height, ALLOCATION_BPP)
            .map_err(|source| DrmError::Allocation {
                width,
                height,
                source,
            })?;

        tracing::debug!(
            "Created dumb buffer {} ({}x{}, pitch {}, {} bytes)",
            buffer.handle,
            width,
            height,
            buffer.pitch,
            buffer.size
        );

        Ok(Self {
            device: Arc::clone(device),
            buffer,
        })
    }

    pub fn buffer(&self) -> &DumbBuffer {
        &self.buffer
    }
}

impl<D: DrmDevice> Drop for DumbAllocation<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_dumb_buffer(self.buffer.handle) {
            tracing::warn!("Failed to destroy dumb buffer {}: {}", self.buffer.handle, e);
        }
    }
}

/// Framebuffer object registration owned until drop
#[derive(Debug)]
pub struct FramebufferRegistration<D: DrmDevice> {
    device: Arc<D>,
    fb_id: u32,
}

impl<D: DrmDevice> FramebufferRegistration<D> {
    pub fn register(device: &Arc<D>, desc: &FramebufferDesc) -> Result<Self, DrmError> {
        let fb_id = device
            .add_framebuffer(desc)
            .map_err(|source| DrmError::Registration {
                width: desc.width,
                height: desc.height,
                source,
            })?;

        tracing::debug!("Registered framebuffer {} for handle {}", fb_id, desc.handle);

        Ok(Self {
            device: Arc::clone(device),
            fb_id,
        })
    }

    pub fn id(&self) -> u32 {
        self.fb_id
    }
}

impl<D: DrmDevice> Drop for FramebufferRegistration<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.remove_framebuffer(self.fb_id) {
            tracing::warn!("Failed to remove framebuffer {}: {}", self.fb_id, e);
        }
    }
}

/// A displayable, CPU-mapped framebuffer.
///
/// Derefs to the mapped bytes through `AsRef<[u8]>`/`AsMut<[u8]>`, whose
/// length always equals the device-reported buffer size.
pub struct Framebuffer<D: DrmDevice> {
    // Field order is drop order: unmap, unregister, free.
    mapping: D::Mapping,
    registration: FramebufferRegistration<D>,
    allocation: DumbAllocation<D>,
    width: u32,
    height: u32,
}

impl<D: DrmDevice> Framebuffer<D> {
    /// Allocate, register, map and clear a `width` x `height` framebuffer
    pub fn acquire(device: &Arc<D>, width: u32, height: u32) -> Result<Self, DrmError> {
        let allocation = DumbAllocation::create(device, width, height)?;
        let buffer = *allocation.buffer();

        let registration = FramebufferRegistration::register(
            device,
            &FramebufferDesc {
                width,
                height,
                depth: FRAMEBUFFER_DEPTH,
                bpp: FRAMEBUFFER_BPP,
                pitch: buffer.pitch,
                handle: buffer.handle,
            },
        )?;

        let offset =
            device
                .map_dumb_buffer(buffer.handle)
                .map_err(|source| DrmError::OffsetResolution {
                    handle: buffer.handle,
                    source,
                })?;

        let len = usize::try_from(buffer.size).map_err(|_| DrmError::MappingSize {
            expected: buffer.size,
            actual: 0,
        })?;

        let mut mapping =
            device
                .map_memory(offset, len)
                .map_err(|source| DrmError::Mapping {
                    size: buffer.size,
                    source,
                })?;

        let actual = mapping.as_ref().len();
        if actual as u64 != buffer.size {
            return Err(DrmError::MappingSize {
                expected: buffer.size,
                actual,
            });
        }

        mapping.as_mut().fill(0);

        Ok(Self {
            mapping,
            registration,
            allocation,
            width,
            height,
        })
    }

    /// Framebuffer object id, as passed to the CRTC
    pub fn id(&self) -> u32 {
        self.registration.id()
    }

    /// Dumb buffer handle
    pub fn handle(&self) -> u32 {
        self.allocation.buffer().handle
    }

    /// Bytes per scanline
    pub fn stride(&self) -> u32 {
        self.allocation.buffer().pitch
    }

    /// Device-reported size in bytes
    pub fn size(&self) -> u64 {
        self.allocation.buffer().size
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl<D: DrmDevice> AsRef<[u8]> for Framebuffer<D> {
    fn as_ref(&self) -> &[u8] {
        self.mapping.as_ref()
    }
}

impl<D: DrmDevice> AsMut<[u8]> for Framebuffer<D> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.mapping.as_mut()
    }
}

impl<D: DrmDevice> std::fmt::Debug for Framebuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id())
            .field("handle", &self.handle())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockCard, MockFailure};

    #[test]
    fn test_acquire_reports_device_geometry() {
        let card = Arc::new(MockCard::new());
        let fb = Framebuffer::acquire(&card, 640, 480).unwrap();

        assert_eq!(fb.stride(), 640 * 4);
        assert_eq!(fb.size(), 640 * 4 * 480);
        assert_eq!(fb.as_ref().len() as u64, fb.size());
        assert_eq!((fb.width(), fb.height()), (640, 480));
    }

    #[test]
    fn test_acquire_zero_fills() {
        let card = Arc::new(MockCard::new());
        let fb = Framebuffer::acquire(&card, 100, 10).unwrap();
        assert!(fb.as_ref().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_registration_parameters() {
        let card = Arc::new(MockCard::new().with_pitch_alignment(256));
        let fb = Framebuffer::acquire(&card, 100, 10).unwrap();

        assert_eq!(fb.stride(), 512);
        assert!(card.calls().contains(&MockCall::AddFramebuffer(FramebufferDesc {
            width: 100,
            height: 10,
            depth: 24,
            bpp: 32,
            pitch: 512,
            handle: fb.handle(),
        })));
    }

    #[test]
    fn test_allocation_failure() {
        let card = Arc::new(MockCard::new());
        card.fail(MockFailure::CreateDumb);

        let err = Framebuffer::acquire(&card, 640, 480).unwrap_err();
        assert!(matches!(err, DrmError::Allocation { .. }));
        assert_eq!(card.live_objects(), (0, 0, 0));
    }

    #[test]
    fn test_registration_failure_frees_allocation() {
        let card = Arc::new(MockCard::new());
        card.fail(MockFailure::AddFramebuffer);

        let err = Framebuffer::acquire(&card, 640, 480).unwrap_err();
        assert!(matches!(err, DrmError::Registration { .. }));
        assert_eq!(card.live_objects(), (0, 0, 0));
    }

    #[test]
    fn test_offset_failure_releases_everything() {
        let card = Arc::new(MockCard::new());
        card.fail(MockFailure::MapDumb);

        let err = Framebuffer::acquire(&card, 640, 480).unwrap_err();
        assert!(matches!(err, DrmError::OffsetResolution { .. }));
        assert_eq!(card.live_objects(), (0, 0, 0));
    }

    #[test]
    fn test_mapping_failure_releases_everything() {
        let card = Arc::new(MockCard::new());
        card.fail(MockFailure::MapMemory);

        let err = Framebuffer::acquire(&card, 640, 480).unwrap_err();
        assert!(matches!(err, DrmError::Mapping { .. }));
        assert_eq!(card.live_objects(), (0, 0, 0));
    }

    #[test]
    fn test_short_mapping_rejected() {
        let card = Arc::new(MockCard::new().with_short_mappings(16));

        let err = Framebuffer::acquire(&card, 64, 64).unwrap_err();
        assert!(matches!(err, DrmError::MappingSize { .. }));
        assert_eq!(card.live_objects(), (0, 0, 0));
    }

    #[test]
    fn test_drop_releases_in_order() {
        let card = Arc::new(MockCard::new());
        let fb = Framebuffer::acquire(&card, 32, 32).unwrap();
        let (fb_id, handle) = (fb.id(), fb.handle());
        assert_eq!(card.live_objects(), (1, 1, 1));
        card.clear_calls();

        drop(fb);

        assert_eq!(card.live_objects(), (0, 0, 0));
        assert_eq!(
            card.calls(),
            vec![
                MockCall::Unmap,
                MockCall::RemoveFramebuffer(fb_id),
                MockCall::DestroyDumb(handle),
            ]
        );
    }

    #[test]
    fn test_keeps_device_alive() {
        let card = Arc::new(MockCard::new());
        let fb = Framebuffer::acquire(&card, 8, 8).unwrap();
        assert!(Arc::strong_count(&card) > 1);

        drop(fb);
        assert_eq!(Arc::strong_count(&card), 1);
    }
}
