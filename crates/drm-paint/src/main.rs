//! drm-paint
//!
//! Takes over a DRM output, paints a test pattern through the drawable
//! surface and keeps it on screen until SIGINT or SIGTERM.
//!
//! Usage:
//!
//! ```text
//! drm-paint [CONFIG]
//! ```
//!
//! Without a config path the default locations are searched; the card index
//! can be overridden with `DRM_SURFACE_CARD`.

use anyhow::{Context, Result};
use drm_surface::{DrawImage, Gray, Nrgba, SurfaceConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Set from the signal handler once SIGINT or SIGTERM arrives
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// SMPTE-style color bars, top to bottom of the upper two thirds
const BARS: [Nrgba; 7] = [
    Nrgba::opaque(192, 192, 192),
    Nrgba::opaque(192, 192, 0),
    Nrgba::opaque(0, 192, 192),
    Nrgba::opaque(0, 192, 0),
    Nrgba::opaque(192, 0, 192),
    Nrgba::opaque(192, 0, 0),
    Nrgba::opaque(0, 0, 192),
];

fn main() -> Result<()> {
    setup_logging();

    let config = load_config()?;
    info!("Opening {}", config.device_path().display());

    let start = Instant::now();
    let mut surface = drm_surface::open_display_with(&config).with_context(|| {
        format!(
            "Failed to acquire display on {}",
            config.device_path().display()
        )
    })?;
    debug!("Display acquired in {:?}", start.elapsed());

    let modeset = *surface.modeset();
    info!(
        "Painting {}x{}@{} ({}) on connector {}",
        modeset.width(),
        modeset.height(),
        modeset.mode.vrefresh,
        modeset.mode.name(),
        modeset.connector
    );

    paint_test_pattern(&mut surface);

    info!("Pattern on screen, press Ctrl+C to exit");
    let shown = hold_until_interrupted()?;

    info!("Interrupted after {:?}, releasing the display", shown);
    drop(surface);
    Ok(())
}

/// Console logging for this tool and the surface library, `RUST_LOG` wins
fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("drm_paint=info,drm_surface=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn load_config() -> Result<SurfaceConfig> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SurfaceConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => SurfaceConfig::load_default().context("Failed to load default config"),
    }
}

/// Keep the current frame on screen until SIGINT or SIGTERM and return how
/// long it was shown.
fn hold_until_interrupted() -> Result<Duration> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("Failed to install {:?} handler", signal))?;
    }

    let shown = Instant::now();
    while !INTERRUPTED.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(shown.elapsed())
}

extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Color bars over the top two thirds, a gray ramp below, and a one pixel
/// white border.
fn paint_test_pattern(image: &mut dyn DrawImage) {
    let bounds = image.bounds();
    let (width, height) = (bounds.width(), bounds.height());
    if bounds.is_empty() {
        return;
    }

    let bars_end = height * 2 / 3;
    for y in 0..height {
        for x in 0..width {
            let px = bounds.min.x + x;
            let py = bounds.min.y + y;

            if y < bars_end {
                let bar = (x as usize * BARS.len()) / width as usize;
                image.set(px, py, &BARS[bar]);
            } else {
                let level = (x as i64 * 255 / (width as i64 - 1).max(1)) as u8;
                image.set(px, py, &Gray(level));
            }
        }
    }

    let white = Nrgba::opaque(255, 255, 255);
    for x in bounds.min.x..bounds.max.x {
        image.set(x, bounds.min.y, &white);
        image.set(x, bounds.max.y - 1, &white);
    }
    for y in bounds.min.y..bounds.max.y {
        image.set(bounds.min.x, y, &white);
        image.set(bounds.max.x - 1, y, &white);
    }
}
