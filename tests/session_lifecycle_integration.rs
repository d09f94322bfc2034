use parallax_vr::config::VrConfig;
use parallax_vr::gpu::{GraphicsQueue, NullGraphics, TextureHandle};
use parallax_vr::vr::{
    Eye, InitPhase, NullRuntime, SessionError, SessionState, TrackingSpaceKind, VrSession,
};
use std::sync::{Arc, Mutex};

fn make_session(runtime: NullRuntime) -> (VrSession, Arc<Mutex<NullRuntime>>) {
    let (backend, handle) = runtime.into_shared();
    let (graphics, _) = NullGraphics::new().into_shared();
    (
        VrSession::new(backend, graphics, Arc::new(VrConfig::new())),
        handle,
    )
}

fn queue() -> GraphicsQueue {
    GraphicsQueue::from_raw(0x0c00_0001)
}

#[test]
fn session_runs_only_between_synchronized_and_stopping() {
    let (session, runtime) = make_session(NullRuntime::new());
    session.initialize(Some(queue())).expect("init");
    assert_eq!(session.session_state(), SessionState::Unknown);
    assert!(!session.is_session_running());

    // Idle/Ready drain on the first update; Ready triggers exactly one
    // begin-session request and the runtime walks to Focused.
    session.update().expect("first frame");
    assert_eq!(session.session_state(), SessionState::Focused);
    assert!(session.is_session_running());
    assert_eq!(runtime.lock().unwrap().begin_session_requests(), 1);

    // Stopping ends the session and halts frame operations.
    runtime.lock().unwrap().push_event(SessionState::Stopping);
    assert!(session.update().is_none());
    assert_eq!(session.session_state(), SessionState::Stopping);
    assert!(!session.is_session_running());
    assert_eq!(runtime.lock().unwrap().end_session_requests(), 1);

    runtime.lock().unwrap().push_event(SessionState::Exiting);
    assert!(session.update().is_none());
    assert_eq!(session.session_state(), SessionState::Exiting);
}

#[test]
fn intermediate_states_report_running_correctly() {
    let (session, runtime) = make_session(NullRuntime::new());
    session.initialize(Some(queue())).expect("init");
    // Drain the startup events so each pushed state is observed alone.
    session.update();

    // Walk each state by hand and observe the running flag. Events only
    // drain inside update, so push one state per tick.
    let expectations = [
        (SessionState::Idle, false),
        (SessionState::Synchronized, true),
        (SessionState::Visible, true),
        (SessionState::Focused, true),
        (SessionState::LossPending, false),
        (SessionState::Exiting, false),
    ];
    for (state, running) in expectations {
        runtime.lock().unwrap().push_event(state);
        session.update();
        assert_eq!(session.session_state(), state);
        assert_eq!(session.is_session_running(), running, "{state:?}");
    }
}

#[test]
fn headset_loss_stops_frame_submission() {
    let (session, runtime) = make_session(NullRuntime::new());
    session.initialize(Some(queue())).expect("init");
    session.update().expect("running");
    session.submit_frame(TextureHandle::from_raw(0x1), Eye::Left);

    let ends_before = runtime.lock().unwrap().end_frames().len();
    runtime.lock().unwrap().push_event(SessionState::LossPending);

    // The update that observes the loss discards the open frame without a
    // layered submission and reports no pose.
    assert!(session.update().is_none());
    assert!(!session.is_session_running());
    {
        let runtime = runtime.lock().unwrap();
        let records = runtime.end_frames();
        assert_eq!(records.len(), ends_before + 1);
        assert!(!records.last().unwrap().layered);
    }

    // Submissions after loss are no-ops.
    session.submit_frame(TextureHandle::from_raw(0x1), Eye::Right);
    assert_eq!(runtime.lock().unwrap().end_frames().len(), ends_before + 1);
}

#[test]
fn headset_absent_then_connected_completes_initialization() {
    let (session, runtime) = make_session(NullRuntime::without_headset());

    // Phase 1 succeeds without any hardware.
    assert_eq!(
        session.initialize(None).expect("phase 1"),
        InitPhase::AwaitingQueue
    );

    // A queue alone does not help while no headset is present, and no
    // swapchains may be created on this path.
    let err = session.initialize(Some(queue())).unwrap_err();
    assert!(matches!(err, SessionError::NoHeadsetFound));
    assert!(!session.is_session_ready());
    assert_eq!(runtime.lock().unwrap().swapchain_count(), 0);

    // Headset appears later; the same call now completes phase 2.
    runtime.lock().unwrap().set_headset_present(true);
    assert_eq!(
        session.initialize(Some(queue())).expect("phase 2"),
        InitPhase::Ready
    );
    assert!(session.is_session_ready());
    assert_eq!(runtime.lock().unwrap().swapchain_count(), 2);
    assert_eq!(session.tracking_space(), Some(TrackingSpaceKind::Stage));
}

#[test]
fn shutdown_from_running_ends_session_once() {
    let (session, runtime) = make_session(NullRuntime::new());
    session.initialize(Some(queue())).expect("init");
    session.update().expect("running");

    session.shutdown();
    assert!(!session.is_session_ready());
    assert_eq!(session.session_state(), SessionState::Unknown);
    assert_eq!(runtime.lock().unwrap().end_session_requests(), 1);

    // Frame operations are inert after shutdown.
    assert!(session.update().is_none());
    session.submit_frame(TextureHandle::from_raw(0x1), Eye::Left);
}
