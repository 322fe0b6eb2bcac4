//! Modeset discovery
//!
//! Walks the card's connectors and pairs each usable one with its preferred
//! mode and a free CRTC. The resulting list is in connector order and is
//! what [`crate::SurfaceAcquirer`] tries, first to last.

use crate::DrmError;
use crate::device::{Connection, ConnectorInfo, DrmDevice, Modeset};
use std::collections::HashSet;

/// Discover candidate modesets on `device`.
///
/// Connectors that are disconnected, have no modes, or cannot get a free
/// CRTC are skipped. With `require_connected` unset, connectors in the
/// unknown state are tried as well. Only a failure to list the card's
/// resources is an error; per-connector failures are logged and skipped.
pub fn discover_modesets<D: DrmDevice + ?Sized>(
    device: &D,
    require_connected: bool,
) -> Result<Vec<Modeset>, DrmError> {
    let resources = device
        .resources()
        .map_err(|source| DrmError::ModesetDiscovery {
            what: "cannot retrieve DRM resources".into(),
            source,
        })?;

    let mut taken_crtcs = HashSet::new();
    let mut modesets = Vec::new();

    for &connector_id in &resources.connectors {
        let connector = match device.connector(connector_id) {
            Ok(connector) => connector,
            Err(e) => {
                tracing::warn!("Cannot retrieve connector {}: {}", connector_id, e);
                continue;
            }
        };

        let usable = match connector.connection {
            Connection::Connected => true,
            Connection::Unknown => !require_connected,
            Connection::Disconnected => false,
        };
        if !usable {
            tracing::debug!("Ignoring unused connector {}", connector_id);
            continue;
        }

        let Some(mode) = connector.modes.first().copied() else {
            tracing::debug!("No valid mode for connector {}", connector_id);
            continue;
        };

        let Some(crtc) = find_crtc(device, &connector, &resources.crtcs, &taken_crtcs) else {
            tracing::warn!("No free CRTC for connector {}", connector_id);
            continue;
        };

        tracing::debug!(
            "Connector {} -> CRTC {} at {} ({}x{}@{})",
            connector_id,
            crtc,
            mode.name(),
            mode.width(),
            mode.height(),
            mode.vrefresh
        );

        taken_crtcs.insert(crtc);
        modesets.push(Modeset {
            connector: connector_id,
            crtc,
            mode,
        });
    }

    Ok(modesets)
}

/// Prefer the CRTC already driving the connector, then any free CRTC one
/// of its encoders can reach.
#[allow(clippy::collapsible_if)] // Avoid if-let chains for MSRV 1.85 compatibility
fn find_crtc<D: DrmDevice + ?Sized>(
    device: &D,
    connector: &ConnectorInfo,
    crtcs: &[u32],
    taken: &HashSet<u32>,
) -> Option<u32> {
    if connector.encoder_id != 0 {
        if let Ok(encoder) = device.encoder(connector.encoder_id) {
            if encoder.crtc_id != 0 && !taken.contains(&encoder.crtc_id) {
                return Some(encoder.crtc_id);
            }
        }
    }

    for &encoder_id in &connector.encoders {
        let encoder = match device.encoder(encoder_id) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::debug!("Cannot retrieve encoder {}: {}", encoder_id, e);
                continue;
            }
        };

        for (i, &crtc) in crtcs.iter().enumerate().take(32) {
            if encoder.possible_crtcs & (1 << i) != 0 && !taken.contains(&crtc) {
                return Some(crtc);
            }
        }
    }

    None
}
