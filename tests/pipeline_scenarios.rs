mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use face_relay::detect::{ClassifierInput, ColorSpace, FaceClassifier};
use face_relay::{
    BoundingBox, CameraRegistration, CancelToken, DispatchLoop, IngestionQueue, StreamWorker,
    Termination, WorkerLauncher, WorkerProbe, WorkerState, WorkerSupervisor,
};

use support::{context, face, wait_until, FakeOpener, RecordingSink, ScriptedClassifier, StreamPlan};

const INTERVAL: Duration = Duration::from_millis(20);

fn registration(device: &str, event: &str) -> CameraRegistration {
    CameraRegistration::new("rtsp://cam1/stream", device, event).unwrap()
}

#[test]
fn one_dispatch_iteration_starts_one_matching_worker() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(1)));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(opener.clone(), classifier, RecordingSink::default(), INTERVAL);
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    queue.enqueue(registration("dev-1", "evt-7")).unwrap();

    let dispatch = DispatchLoop::new(queue.clone(), supervisor.clone());
    let id = dispatch.dispatch_next().unwrap().unwrap();
    supervisor.join_all();

    let statuses = supervisor.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].id, id);
    assert_eq!(statuses[0].device_id, "dev-1");
    assert_eq!(statuses[0].event_id, "evt-7");
    assert!(queue.is_empty());
    assert_eq!(
        opener.opened(),
        vec!["rtsp://cam1/stream?rtsp_transport=tcp&timeout=3000".to_string()]
    );
}

#[test]
fn duplicate_registrations_run_two_workers() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Endless));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(
        opener.clone(),
        classifier,
        RecordingSink::default(),
        Duration::from_secs(30),
    );
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    queue.enqueue(registration("dev-1", "evt-7")).unwrap();
    queue.enqueue(registration("dev-1", "evt-7")).unwrap();

    let dispatch = DispatchLoop::new(queue.clone(), supervisor.clone());
    let first = dispatch.dispatch_next().unwrap().unwrap();
    let second = dispatch.dispatch_next().unwrap().unwrap();
    assert_ne!(first, second);

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor
            .statuses()
            .iter()
            .filter(|s| s.state == WorkerState::Streaming)
            .count()
            == 2
    }));
    assert_eq!(supervisor.live_count(), 2);
    assert_eq!(opener.opened().len(), 2);

    supervisor.cancel_all();
    supervisor.join_all();
    assert_eq!(supervisor.live_count(), 0);
    for status in supervisor.statuses() {
        assert_eq!(status.termination, Some(Termination::Cancelled));
    }
}

#[test]
fn open_failure_never_detects_or_uploads() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::FailOpen));
    let (classifier, calls) = ScriptedClassifier::new(vec![vec![face()]]);
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    let reason = StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();

    assert_eq!(reason, Termination::OpenFailed);
    assert_eq!(probe.state(), WorkerState::Terminated);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(sink.attempts().is_empty());
}

#[test]
fn n_frames_give_n_cycles_spaced_by_interval() {
    const FRAMES: u64 = 4;
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(FRAMES)));
    let (classifier, calls) = ScriptedClassifier::new(vec![vec![face()]; FRAMES as usize]);
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    let started = Instant::now();
    let reason = StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();
    let elapsed = started.elapsed();

    assert_eq!(reason, Termination::EndOfStream);
    assert_eq!(calls.load(Ordering::SeqCst), FRAMES as usize);
    assert_eq!(sink.attempts().len(), FRAMES as usize);
    assert!(elapsed >= INTERVAL * (FRAMES as u32 - 1));
    let status = probe.snapshot();
    assert_eq!(status.frames_processed, FRAMES);
    assert_eq!(status.uploads_delivered, FRAMES);
}

#[test]
fn empty_detection_uploads_nothing() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(2)));
    let (classifier, calls) = ScriptedClassifier::new(vec![vec![], vec![]]);
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    let reason = StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();

    assert_eq!(reason, Termination::EndOfStream);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(sink.attempts().is_empty());
    assert_eq!(probe.snapshot().frames_processed, 2);
}

#[test]
fn failed_region_upload_does_not_skip_the_next() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(1)));
    let regions = vec![
        face(),
        BoundingBox::new(30, 10, 10, 10),
        BoundingBox::new(40, 20, 8, 8),
    ];
    let (classifier, _) = ScriptedClassifier::new(vec![regions]);
    let sink = RecordingSink::failing_first(1);
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();

    assert_eq!(sink.attempts().len(), 3);
    let status = probe.snapshot();
    assert_eq!(status.regions_detected, 3);
    assert_eq!(status.uploads_failed, 1);
    assert_eq!(status.uploads_delivered, 2);
}

#[test]
fn three_frame_stream_uploads_two_tagged_regions() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(3)));
    let (classifier, _) = ScriptedClassifier::new(vec![vec![face()], vec![face()], vec![]]);
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    let request = face_relay::RegistrationRequest {
        rtsp_url: Some("rtsp://cam1/stream".to_string()),
        device_id: Some("dev-1".to_string()),
        event_id: Some("evt-7".to_string()),
    };
    queue.enqueue(request.validate().unwrap()).unwrap();

    let dispatch = DispatchLoop::new(queue, supervisor.clone());
    let id = dispatch.dispatch_next().unwrap().unwrap();
    let peak = supervisor.live_count();
    assert_eq!(peak, 1);
    supervisor.join_all();

    let attempts = sink.attempts();
    assert_eq!(attempts.len(), 2);
    for event in &attempts {
        assert_eq!(event.camera_id, "dev-1");
        assert_eq!(event.event_id, "evt-7");
        assert!(!event.image_jpeg.is_empty());
        assert!(event.detection_time_iso().ends_with('Z'));
    }
    let status = supervisor.status(id).unwrap();
    assert_eq!(status.state, WorkerState::Terminated);
    assert_eq!(status.termination, Some(Termination::EndOfStream));
    assert_eq!(supervisor.live_count(), peak - 1);
}

#[test]
fn live_count_excludes_terminated_workers() {
    let opener = Arc::new(FakeOpener::new(|url| {
        if url.starts_with("rtsp://dead") {
            StreamPlan::FailOpen
        } else {
            StreamPlan::Endless
        }
    }));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(
        opener.clone(),
        classifier,
        RecordingSink::default(),
        Duration::from_secs(30),
    );
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    for n in 0..3 {
        let reg = CameraRegistration::new(format!("rtsp://live{n}/s"), format!("live-{n}"), "evt")
            .unwrap();
        queue.enqueue(reg).unwrap();
    }
    for n in 0..2 {
        let reg = CameraRegistration::new(format!("rtsp://dead{n}/s"), format!("dead-{n}"), "evt")
            .unwrap();
        queue.enqueue(reg).unwrap();
    }
    queue.close();

    let dispatch = DispatchLoop::new(queue, supervisor.clone()).spawn().unwrap();
    dispatch.join().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let statuses = supervisor.statuses();
        let streaming = statuses
            .iter()
            .filter(|s| s.state == WorkerState::Streaming)
            .count();
        let terminated_remain = statuses
            .iter()
            .filter(|s| s.state != WorkerState::Streaming)
            .all(|s| s.termination == Some(Termination::OpenFailed));
        streaming == 3 && terminated_remain && supervisor.live_count() == 3
    }));
    assert_eq!(opener.opened().len(), 5);

    supervisor.cancel_all();
    supervisor.join_all();
    assert_eq!(supervisor.live_count(), 0);
}

#[test]
fn reap_drops_finished_workers() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::FailOpen));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(opener, classifier, RecordingSink::default(), INTERVAL);
    let supervisor = WorkerSupervisor::new(ctx);

    supervisor.launch(registration("dev-1", "evt-1")).unwrap();
    supervisor.launch(registration("dev-2", "evt-2")).unwrap();
    supervisor.join_all();

    // The second launch may already have reaped the first worker.
    let remaining = supervisor.statuses().len();
    assert!(remaining >= 1);
    assert_eq!(supervisor.reap(), remaining);
    assert!(supervisor.statuses().is_empty());
    assert_eq!(supervisor.live_count(), 0);
}

/// Fails on the first frame, then finds one face per frame.
struct FailsOnceClassifier {
    failed: bool,
}

impl FaceClassifier for FailsOnceClassifier {
    fn name(&self) -> &'static str {
        "fails-once"
    }

    fn color_space(&self) -> ColorSpace {
        ColorSpace::Rgb
    }

    fn classify(&mut self, _input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        if !self.failed {
            self.failed = true;
            return Err(anyhow!("inference backend error"));
        }
        Ok(vec![face()])
    }
}

#[test]
fn detection_failure_skips_only_that_frame() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(2)));
    let sink = RecordingSink::default();
    let ctx = context(opener, FailsOnceClassifier { failed: false }, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    let reason = StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();

    assert_eq!(reason, Termination::EndOfStream);
    assert_eq!(sink.attempts().len(), 1);
    let status = probe.snapshot();
    assert_eq!(status.frames_processed, 2);
    assert_eq!(status.regions_detected, 1);
}

#[test]
fn read_error_terminates_after_processed_frames() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::FailAfter(2)));
    let (classifier, calls) = ScriptedClassifier::new(vec![vec![face()], vec![face()]]);
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let reg = registration("dev-1", "evt-7");
    let probe = Arc::new(WorkerProbe::new(1, &reg));

    let reason = StreamWorker::new(reg, ctx, probe.clone(), CancelToken::new()).run();

    assert_eq!(reason, Termination::ReadFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.attempts().len(), 2);
    let status = probe.snapshot();
    assert_eq!(status.state, WorkerState::Terminated);
    assert_eq!(status.termination, Some(Termination::ReadFailed));
}

#[test]
fn panicking_worker_is_counted_out_and_dispatch_continues() {
    let opener = Arc::new(FakeOpener::new(|url| {
        if url.starts_with("rtsp://crash") {
            StreamPlan::PanicOnOpen
        } else {
            StreamPlan::Frames(1)
        }
    }));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(opener.clone(), classifier, RecordingSink::default(), INTERVAL);
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    queue
        .enqueue(CameraRegistration::new("rtsp://crash/s", "dev-1", "evt").unwrap())
        .unwrap();
    queue
        .enqueue(CameraRegistration::new("rtsp://fine/s", "dev-2", "evt").unwrap())
        .unwrap();

    let dispatch = DispatchLoop::new(queue, supervisor.clone());
    let crashed = dispatch.dispatch_next().unwrap().unwrap();
    supervisor.join_all();
    assert_eq!(
        supervisor.status(crashed).and_then(|s| s.termination),
        Some(Termination::Panicked)
    );
    assert_eq!(supervisor.live_count(), 0);

    let fine = dispatch.dispatch_next().unwrap().unwrap();
    supervisor.join_all();
    assert_eq!(
        supervisor.status(fine).and_then(|s| s.termination),
        Some(Termination::EndOfStream)
    );
    assert_eq!(opener.opened().len(), 2);
    assert_eq!(supervisor.live_count(), 0);
}

/// Panics on its first call, then finds one face per frame.
struct PanicsOnceClassifier {
    calls: Arc<std::sync::atomic::AtomicUsize>,
}

impl FaceClassifier for PanicsOnceClassifier {
    fn name(&self) -> &'static str {
        "panics-once"
    }

    fn color_space(&self) -> ColorSpace {
        ColorSpace::Gray
    }

    fn classify(&mut self, _input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("model runtime aborted");
        }
        Ok(vec![face()])
    }
}

#[test]
fn classifier_panic_leaves_other_frames_and_workers_detecting() {
    let opener = Arc::new(FakeOpener::new(|url| {
        if url.starts_with("rtsp://first") {
            StreamPlan::Frames(2)
        } else {
            StreamPlan::Frames(3)
        }
    }));
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let classifier = PanicsOnceClassifier {
        calls: calls.clone(),
    };
    let sink = RecordingSink::default();
    let ctx = context(opener, classifier, sink.clone(), INTERVAL);
    let supervisor = WorkerSupervisor::new(ctx);

    let first = supervisor
        .launch(CameraRegistration::new("rtsp://first/s", "dev-1", "evt").unwrap())
        .unwrap();
    supervisor.join_all();
    let status = supervisor.status(first).unwrap();
    assert_eq!(status.termination, Some(Termination::EndOfStream));
    assert_eq!(status.frames_processed, 2);
    assert_eq!(status.regions_detected, 1);

    let second = supervisor
        .launch(CameraRegistration::new("rtsp://second/s", "dev-2", "evt").unwrap())
        .unwrap();
    supervisor.join_all();
    let status = supervisor.status(second).unwrap();
    assert_eq!(status.termination, Some(Termination::EndOfStream));
    assert_eq!(status.regions_detected, 3);
    assert_eq!(status.uploads_delivered, 3);

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let devices: Vec<String> = sink.attempts().into_iter().map(|e| e.camera_id).collect();
    assert_eq!(devices, ["dev-1", "dev-2", "dev-2", "dev-2"]);
}

/// Panics when asked to start a worker for `dev-bad`.
struct PanickyLauncher {
    inner: Arc<WorkerSupervisor>,
}

impl WorkerLauncher for PanickyLauncher {
    fn launch(&self, registration: CameraRegistration) -> Result<u64> {
        if registration.device_id() == "dev-bad" {
            panic!("launcher crashed");
        }
        self.inner.launch(registration)
    }
}

#[test]
fn launch_panic_does_not_stop_dispatch() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(1)));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(opener.clone(), classifier, RecordingSink::default(), INTERVAL);
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    queue.enqueue(registration("dev-bad", "evt")).unwrap();
    queue.enqueue(registration("dev-2", "evt")).unwrap();
    queue.close();

    let launcher = Arc::new(PanickyLauncher {
        inner: supervisor.clone(),
    });
    let dispatch = DispatchLoop::new(queue.clone(), launcher);
    let first = dispatch.dispatch_next().unwrap();
    assert!(first.unwrap_err().to_string().contains("dev-bad"));
    assert_eq!(supervisor.live_count(), 0);

    let id = dispatch.dispatch_next().unwrap().unwrap();
    assert!(dispatch.dispatch_next().is_none());
    supervisor.join_all();
    assert_eq!(
        supervisor.status(id).and_then(|s| s.termination),
        Some(Termination::EndOfStream)
    );
    assert_eq!(opener.opened().len(), 1);
    assert_eq!(supervisor.live_count(), 0);
}

#[test]
fn nul_in_device_id_still_gets_a_worker() {
    let opener = Arc::new(FakeOpener::always(StreamPlan::Frames(1)));
    let (classifier, _) = ScriptedClassifier::new(vec![]);
    let ctx = context(opener, classifier, RecordingSink::default(), INTERVAL);
    let supervisor = WorkerSupervisor::new(ctx);

    let id = supervisor.launch(registration("dev\0odd", "evt")).unwrap();
    supervisor.join_all();
    assert_eq!(supervisor.status(id).unwrap().device_id, "dev\0odd");
}
