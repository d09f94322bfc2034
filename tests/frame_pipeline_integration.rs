use parallax_vr::config::VrConfig;
use parallax_vr::gpu::{NullGraphics, SurfaceHandle, TextureHandle};
use parallax_vr::hooks::{AimState, CameraHook, CameraTransform, PresentHook};
use parallax_vr::vr::{Eye, NullRuntime, VrSession};
use std::sync::{Arc, Mutex};

struct Pipeline {
    config: Arc<VrConfig>,
    session: Arc<VrSession>,
    present: PresentHook,
    camera: CameraHook,
    runtime: Arc<Mutex<NullRuntime>>,
    graphics: Arc<Mutex<NullGraphics>>,
}

fn make_pipeline() -> Pipeline {
    let config = Arc::new(VrConfig::new());
    let (runtime, runtime_handle) = NullRuntime::new().into_shared();
    let (graphics, graphics_handle) = NullGraphics::new().into_shared();

    let session = Arc::new(VrSession::new(
        runtime,
        Arc::clone(&graphics),
        Arc::clone(&config),
    ));
    let present = PresentHook::new(
        Arc::clone(&session),
        Arc::clone(&graphics),
        Arc::clone(&config),
    );
    let aim = Arc::new(AimState::new());
    let camera = CameraHook::new(Arc::clone(&session), Arc::clone(&config), aim);

    Pipeline {
        config,
        session,
        present,
        camera,
        runtime: runtime_handle,
        graphics: graphics_handle,
    }
}

fn surface() -> SurfaceHandle {
    SurfaceHandle::from_raw(0x5000)
}

/// One host frame: camera update before rendering, presentation after.
fn host_frame(pipeline: &Pipeline) -> (Option<f32>, Option<Eye>) {
    let mut transform = CameraTransform::default();
    let overridden = pipeline.camera.on_camera_update(&mut transform);
    let offset = overridden.then_some(transform.position.x);
    let submitted = pipeline.present.on_present(surface());
    (offset, submitted)
}

#[test]
fn camera_offset_parity_matches_submitted_eye_every_frame() {
    let pipeline = make_pipeline();

    // First presentation captures resources and initializes the session;
    // the camera hook has no pose until then.
    host_frame(&pipeline);

    for host_frame_index in 0..32u64 {
        let (offset, submitted) = host_frame(&pipeline);
        let offset = offset.expect("camera should be overridden once running");
        let submitted = submitted.expect("presentation should submit once captured");

        // Left eye offsets negative along the lateral axis, right positive.
        if submitted == Eye::Left {
            assert!(
                offset < 0.0,
                "frame {host_frame_index}: left submission with right-eye camera offset"
            );
        } else {
            assert!(
                offset > 0.0,
                "frame {host_frame_index}: right submission with left-eye camera offset"
            );
        }
    }
}

#[test]
fn end_frame_fires_exactly_once_per_eye_pair() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);

    let baseline = pipeline.runtime.lock().unwrap().end_frames().len();
    for _ in 0..10 {
        host_frame(&pipeline);
    }

    let end_frames = pipeline.runtime.lock().unwrap().end_frames().len();
    // Ten host frames after the warm-up frame: the warm-up submitted the
    // left eye, so five logical frames close in this window.
    assert_eq!(end_frames - baseline, 5);
}

#[test]
fn copies_alternate_between_eye_swapchains() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);
    for _ in 0..8 {
        host_frame(&pipeline);
    }

    let graphics = pipeline.graphics.lock().unwrap();
    let copies = graphics.copies();
    assert!(copies.len() >= 8);
    for pair in copies.windows(2) {
        assert_ne!(
            pair[0].dest, pair[1].dest,
            "consecutive copies should target different eye swapchains"
        );
    }
}

#[test]
fn back_buffer_is_refetched_every_presentation() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);
    for _ in 0..6 {
        host_frame(&pipeline);
    }

    let graphics = pipeline.graphics.lock().unwrap();
    let copies = graphics.copies();
    let mut sources: Vec<_> = copies.iter().map(|copy| copy.source).collect();
    sources.dedup();
    // The null surface rotates three buffers; a cached buffer would show a
    // single repeated source.
    assert!(sources.len() > 1);
}

#[test]
fn repeated_left_eye_drops_frame_and_recovers_on_next_update() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);
    host_frame(&pipeline);

    pipeline.session.update();
    assert!(pipeline.session.frame_in_progress());
    let texture = TextureHandle::from_raw(0x9999);

    pipeline.session.submit_frame(texture, Eye::Left);
    assert!(pipeline.session.frame_in_progress());

    let before = pipeline.runtime.lock().unwrap().end_frames().len();
    // Second left-eye submission without an intervening update: the open
    // frame is discarded without a layered submission.
    pipeline.session.submit_frame(texture, Eye::Left);
    assert!(!pipeline.session.frame_in_progress());
    {
        let runtime = pipeline.runtime.lock().unwrap();
        let records = runtime.end_frames();
        assert_eq!(records.len(), before + 1);
        assert!(!records.last().unwrap().layered);
    }

    // A right-eye submission now has no frame to close.
    pipeline.session.submit_frame(texture, Eye::Right);
    assert_eq!(
        pipeline.runtime.lock().unwrap().end_frames().len(),
        before + 1
    );

    // The next update opens a fresh frame and the pair completes normally.
    pipeline.session.update().expect("recovered frame");
    pipeline.session.submit_frame(texture, Eye::Left);
    pipeline.session.submit_frame(texture, Eye::Right);
    {
        let runtime = pipeline.runtime.lock().unwrap();
        let records = runtime.end_frames();
        assert_eq!(records.len(), before + 2);
        assert!(records.last().unwrap().layered);
    }
}

#[test]
fn fence_timeout_drops_copy_but_frame_still_closes() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);
    host_frame(&pipeline);

    let copies_before = pipeline.graphics.lock().unwrap().copies().len();
    let ends_before = pipeline.runtime.lock().unwrap().end_frames().len();

    pipeline.graphics.lock().unwrap().fail_next_fence();
    host_frame(&pipeline);
    host_frame(&pipeline);

    // One of the two copies was dropped, but the logical frame still closed.
    assert_eq!(
        pipeline.graphics.lock().unwrap().copies().len(),
        copies_before + 1
    );
    assert_eq!(
        pipeline.runtime.lock().unwrap().end_frames().len(),
        ends_before + 1
    );
}

#[test]
fn disabling_vr_mid_stream_reverts_to_pass_through() {
    let pipeline = make_pipeline();
    host_frame(&pipeline);
    host_frame(&pipeline);

    pipeline.config.set_vr_enabled(false);

    let original = CameraTransform::default();
    let mut transform = original;
    assert!(!pipeline.camera.on_camera_update(&mut transform));
    assert_eq!(transform, original);
    assert_eq!(pipeline.present.on_present(surface()), None);

    // Re-enabling resumes the schedule on the next full host frame.
    pipeline.config.set_vr_enabled(true);
    let (offset, submitted) = host_frame(&pipeline);
    assert!(offset.is_some());
    assert!(submitted.is_some());
}
