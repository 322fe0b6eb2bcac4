//! Integration tests for surface acquisition against the mock card

use drm_surface::mock::{MockCall, MockCard, MockConnector, MockFailure};
use drm_surface::{
    DrawImage, DrmError, ModeInfo, Modeset, Nrgba, Rect, SurfaceAcquirer, discover_modesets,
};

/// Mock card plus the candidates discovered on it
struct AcquireTestEnv {
    acquirer: SurfaceAcquirer<MockCard>,
    modesets: Vec<Modeset>,
}

impl AcquireTestEnv {
    fn new(card: MockCard) -> Self {
        let modesets = discover_modesets(&card, true).expect("Failed to discover modesets");
        let acquirer = SurfaceAcquirer::new(card).expect("Mock card supports dumb buffers");
        acquirer.device().clear_calls();
        Self { acquirer, modesets }
    }

    fn three_outputs() -> Self {
        Self::new(
            MockCard::with_crtcs(&[40, 41, 42])
                .with_connector(MockConnector::connected(10, 1920, 1080))
                .with_connector(MockConnector::connected(11, 1280, 720))
                .with_connector(MockConnector::connected(12, 640, 480)),
        )
    }

    fn card(&self) -> &MockCard {
        self.acquirer.device()
    }

    fn allocation_attempts(&self) -> Vec<(u32, u32)> {
        self.card()
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::CreateDumb { width, height, .. } => Some((width, height)),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn test_falls_back_to_third_candidate() {
    let mut env = AcquireTestEnv::three_outputs();
    env.card().fail_times(MockFailure::CreateDumb, 2);

    let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    assert_eq!(surface.modeset(), &env.modesets[2]);
    assert_eq!(surface.bounds(), Rect::from_size(640, 480));
    assert_eq!(env.acquirer.attempts(), 3);
    assert_eq!(
        env.allocation_attempts(),
        vec![(1920, 1080), (1280, 720), (640, 480)]
    );
}

#[test]
fn test_falls_back_past_refused_size_and_crtc() {
    let mut env = AcquireTestEnv::three_outputs();
    env.card().refuse_size(1920, 1080);
    env.card().refuse_crtc(env.modesets[1].crtc);

    let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    assert_eq!(surface.modeset(), &env.modesets[2]);
    assert_eq!(env.acquirer.attempts(), 3);
    assert_eq!(env.card().live_objects(), (1, 1, 1));
    assert_eq!(
        env.card()
            .crtc_state(env.modesets[1].crtc)
            .unwrap()
            .fb_id,
        0
    );
}

#[test]
fn test_first_success_stops_iteration() {
    let mut env = AcquireTestEnv::three_outputs();

    let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    assert_eq!(surface.modeset().connector, 10);
    assert_eq!(env.acquirer.attempts(), 1);
    assert_eq!(env.allocation_attempts(), vec![(1920, 1080)]);
}

#[test]
fn test_empty_candidates_touch_nothing() {
    let mut env = AcquireTestEnv::new(MockCard::new());
    assert!(env.modesets.is_empty());

    let err = env.acquirer.acquire(Vec::new()).unwrap_err();

    assert!(matches!(err, DrmError::NoUsableModeset));
    assert_eq!(env.acquirer.attempts(), 0);
    assert!(env.card().calls().is_empty());
}

#[test]
fn test_all_candidates_failing_is_single_error() {
    let mut env = AcquireTestEnv::three_outputs();
    env.card().fail(MockFailure::SetCrtc);

    let err = env.acquirer.acquire(env.modesets.clone()).unwrap_err();

    assert!(matches!(err, DrmError::NoUsableModeset));
    assert_eq!(env.acquirer.attempts(), 3);
}

#[test]
fn test_failed_candidates_leave_nothing_behind() {
    for failure in [
        MockFailure::AddFramebuffer,
        MockFailure::MapDumb,
        MockFailure::MapMemory,
        MockFailure::GetCrtc,
        MockFailure::SetCrtc,
    ] {
        let mut env = AcquireTestEnv::three_outputs();
        env.card().fail_times(failure, 2);

        let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

        assert_eq!(surface.modeset().connector, 12, "{:?}", failure);
        assert_eq!(env.card().live_objects(), (1, 1, 1), "{:?}", failure);
    }
}

#[test]
fn test_fresh_surface_is_zeroed() {
    let mut env = AcquireTestEnv::three_outputs();

    let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    assert!(!surface.pixels().is_empty());
    assert!(surface.pixels().iter().all(|&b| b == 0));

    let bounds = surface.bounds();
    for (x, y) in [(0, 0), (bounds.max.x - 1, bounds.max.y - 1), (960, 540)] {
        assert_eq!(surface.at(x, y), Nrgba::opaque(0, 0, 0));
    }
}

#[test]
fn test_surface_roundtrip_and_offsets() {
    let card = MockCard::new()
        .with_pitch_alignment(256)
        .with_connector(MockConnector::connected(10, 100, 30));
    let mut env = AcquireTestEnv::new(card);
    let mut surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    let stride = surface.stride();
    assert_eq!(stride, 512);

    let len = surface.pixels().len();
    for y in 0..30 {
        for x in 0..100 {
            let offset = surface.pix_offset(x, y).unwrap();
            assert_eq!(offset, y as usize * stride + x as usize * 2);
            assert!(offset <= len - 2);
        }
    }

    let color = Nrgba::new(200, 96, 16, 0);
    surface.set(99, 29, &color);
    assert_eq!(surface.at(99, 29), Nrgba::opaque(200, 96, 16));

    assert_eq!(surface.pix_offset(100, 29), None);
    assert_eq!(surface.pix_offset(-1, 0), None);

    let i = surface.pix_offset(99, 29).unwrap();
    assert_ne!(&surface.pixels()[i..i + 2], &[0, 0]);
}

#[test]
fn test_out_of_bounds_writes_are_dropped() {
    let card = MockCard::new().with_connector(MockConnector::connected(10, 16, 8));
    let mut env = AcquireTestEnv::new(card);
    let mut surface = env.acquirer.acquire(env.modesets.clone()).unwrap();
    let before = surface.pixels().to_vec();

    for (x, y) in [(-1, -1), (16, 0), (0, 8), (16, 8), (i32::MIN, 3)] {
        surface.set(x, y, &Nrgba::opaque(255, 255, 255));
        assert_eq!(surface.at(x, y), Nrgba::default());
    }

    assert_eq!(surface.pixels(), &before[..]);
}

#[test]
fn test_surface_is_usable_as_trait_object() {
    let card = MockCard::new().with_connector(MockConnector::connected(10, 4, 4));
    let mut env = AcquireTestEnv::new(card);
    let surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    let mut image: Box<dyn DrawImage> = Box::new(surface);
    image.fill(&Nrgba::opaque(8, 16, 24));

    let bounds = image.bounds();
    for y in bounds.min.y..bounds.max.y {
        for x in bounds.min.x..bounds.max.x {
            assert_eq!(image.at(x, y), Nrgba::opaque(8, 16, 24));
        }
    }
}

#[test]
fn test_explicit_candidates_without_discovery() {
    let mut acquirer = SurfaceAcquirer::new(MockCard::new()).unwrap();
    let candidate = Modeset {
        connector: 7,
        crtc: 41,
        mode: ModeInfo::with_size(320, 200, 70),
    };

    let surface = acquirer.acquire(vec![candidate]).unwrap();

    assert_eq!(surface.bounds(), Rect::from_size(320, 200));
    assert_eq!(
        acquirer.device().crtc_state(41).unwrap().fb_id,
        surface.framebuffer_id()
    );
}

#[test]
fn test_surface_outlives_acquirer() {
    let card = MockCard::new().with_connector(MockConnector::connected(10, 8, 8));
    let observer = card.clone();
    let mut env = AcquireTestEnv::new(card);
    let mut surface = env.acquirer.acquire(env.modesets.clone()).unwrap();

    drop(env);

    surface.set(1, 1, &Nrgba::opaque(255, 0, 0));
    assert_eq!(surface.at(1, 1), Nrgba::opaque(248, 0, 0));
    assert_eq!(observer.live_objects(), (1, 1, 1));

    drop(surface);
    assert_eq!(observer.live_objects(), (0, 0, 0));
}
