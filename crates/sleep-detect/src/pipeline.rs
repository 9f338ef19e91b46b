//! Detection pipeline: frame gate, classifier and state machine behind an
//! enable switch.
//!
//! A single processing task owns the gate, the state machine and the enable
//! flag, so none of them need locking. Classification runs on a blocking
//! worker and its result is sent back to that task before it touches any
//! state.

use std::sync::Arc;
use std::time::Instant;

use camera_capture::{FrameReceiver, VideoFrame};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::classifier::EyeStateClassifier;
use crate::clock::{Clock, SystemClock};
use crate::face::{any_eyes_closed, FaceSample};
use crate::gate::{FrameGate, GateDecision};
use crate::output::{PipelineStats, SleepEvent, StatsCounters};
use crate::state::SleepStateMachine;
use crate::{DetectError, DetectorConfig};

/// Sleep events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 16;

enum Command {
    SetEnabled(bool),
    Shutdown,
}

struct Completion {
    /// Enable epoch the frame was dispatched under
    epoch: u64,
    sampled_at: Instant,
    sequence: u64,
    result: Result<Vec<FaceSample>, DetectError>,
    /// False when the classifier timed out and is still running
    worker_done: bool,
}

enum Report {
    Sample(Completion),
    /// A timed-out classifier call has finally returned
    WorkerDone { sequence: u64 },
}

enum Next {
    Command(Option<Command>),
    Report(Report),
    Frame(Option<VideoFrame>),
}

/// Handle to a running detection pipeline
pub struct DetectionPipeline {
    config: Arc<DetectorConfig>,
    commands: mpsc::UnboundedSender<Command>,
    sleeping: watch::Receiver<bool>,
    events: broadcast::Sender<SleepEvent>,
    stats: Arc<StatsCounters>,
    task: JoinHandle<()>,
}

impl DetectionPipeline {
    /// Start processing `frames` on the current tokio runtime
    pub fn spawn(
        config: DetectorConfig,
        classifier: Arc<dyn EyeStateClassifier>,
        frames: FrameReceiver,
    ) -> Result<Self, DetectError> {
        Self::spawn_with_clock(config, classifier, frames, Arc::new(SystemClock))
    }

    /// Same as [`DetectionPipeline::spawn`] with an explicit time source
    pub fn spawn_with_clock(
        config: DetectorConfig,
        classifier: Arc<dyn EyeStateClassifier>,
        frames: FrameReceiver,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DetectError> {
        config.validate()?;
        let config = Arc::new(config);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (sleeping_tx, sleeping_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let stats = Arc::new(StatsCounters::default());

        let worker = Worker {
            gate: FrameGate::new(config.processing_interval()),
            machine: SleepStateMachine::new(&config),
            enabled: config.enabled,
            epoch: 0,
            config: Arc::clone(&config),
            classifier,
            clock,
            frames,
            frames_open: true,
            commands: command_rx,
            completion_tx,
            completions: completion_rx,
            sleeping: sleeping_tx,
            events: events_tx.clone(),
            stats: Arc::clone(&stats),
        };

        info!(
            "Starting detection pipeline: closed>={}ms, cooldown={}ms, interval={}ms, enabled={}",
            config.minimum_closed_ms, config.cooldown_ms, config.processing_interval_ms, config.enabled
        );

        let task = tokio::spawn(worker.run());

        Ok(Self {
            config,
            commands: command_tx,
            sleeping: sleeping_rx,
            events: events_tx,
            stats,
            task,
        })
    }

    /// Turn detection on or off. Disabling clears the running episode and
    /// publishes `false`; the cooldown clock is kept.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), DetectError> {
        self.commands
            .send(Command::SetEnabled(enabled))
            .map_err(|_| DetectError::Closed)
    }

    /// Continuous sleeping signal. Every processed sample republishes,
    /// so consecutive equal values are possible.
    pub fn subscribe_sleeping(&self) -> watch::Receiver<bool> {
        let mut rx = self.sleeping.clone();
        rx.borrow_and_update();
        rx
    }

    /// One event per qualifying closure episode
    pub fn subscribe_events(&self) -> broadcast::Receiver<SleepEvent> {
        self.events.subscribe()
    }

    /// Last published sleeping value
    pub fn is_sleeping(&self) -> bool {
        *self.sleeping.borrow()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Stop the processing task and wait for it to finish
    pub async fn shutdown(self) -> Result<PipelineStats, DetectError> {
        // The task may already be gone if the frame source and commands closed
        let _ = self.commands.send(Command::Shutdown);
        self.task.await.map_err(|e| DetectError::Task(e.to_string()))?;
        Ok(self.stats.snapshot())
    }
}

/// Processing context. Owns all mutable detector state.
struct Worker {
    config: Arc<DetectorConfig>,
    classifier: Arc<dyn EyeStateClassifier>,
    clock: Arc<dyn Clock>,
    gate: FrameGate,
    machine: SleepStateMachine,
    enabled: bool,
    epoch: u64,
    frames: FrameReceiver,
    frames_open: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    completion_tx: mpsc::UnboundedSender<Report>,
    completions: mpsc::UnboundedReceiver<Report>,
    sleeping: watch::Sender<bool>,
    events: broadcast::Sender<SleepEvent>,
    stats: Arc<StatsCounters>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            // Commands first so a disable lands before any later sample
            let next = tokio::select! {
                biased;
                command = self.commands.recv() => Next::Command(command),
                Some(report) = self.completions.recv() => Next::Report(report),
                frame = self.frames.recv(), if self.frames_open => Next::Frame(frame),
            };

            match next {
                Next::Command(Some(Command::SetEnabled(enabled))) => self.set_enabled(enabled),
                Next::Command(Some(Command::Shutdown)) | Next::Command(None) => break,
                Next::Report(Report::Sample(done)) => self.handle_completion(done),
                Next::Report(Report::WorkerDone { sequence }) => {
                    debug!("Timed-out classification of frame {} returned", sequence);
                    self.gate.complete();
                }
                Next::Frame(Some(frame)) => self.handle_frame(frame),
                Next::Frame(None) => {
                    info!("Frame source closed ({} frames dropped upstream)", self.frames.dropped());
                    self.frames_open = false;
                }
            }
        }

        info!("Detection pipeline stopped");
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            if !self.enabled {
                info!("Sleep detection enabled");
            }
            self.enabled = true;
            return;
        }

        info!("Sleep detection disabled");
        self.enabled = false;
        // Results still in flight belong to the old epoch and get dropped
        self.epoch += 1;
        self.machine.reset();
        self.sleeping.send_replace(false);
    }

    fn handle_frame(&mut self, frame: VideoFrame) {
        StatsCounters::bump(&self.stats.frames_received);

        if !self.enabled {
            StatsCounters::bump(&self.stats.dropped_disabled);
            return;
        }

        let now = self.clock.now();
        match self.gate.admit(now) {
            GateDecision::Admit => self.dispatch(frame, now),
            GateDecision::DropBusy => {
                trace!("Frame {} dropped: classification in flight", frame.sequence);
                StatsCounters::bump(&self.stats.dropped_busy);
            }
            GateDecision::DropThrottled => {
                trace!("Frame {} dropped: throttled", frame.sequence);
                StatsCounters::bump(&self.stats.dropped_throttled);
            }
        }
    }

    fn dispatch(&self, frame: VideoFrame, sampled_at: Instant) {
        let classifier = Arc::clone(&self.classifier);
        let completions = self.completion_tx.clone();
        let timeout = self.config.classification_timeout();
        let epoch = self.epoch;
        let sequence = frame.sequence;

        debug!("Classifying frame {}", sequence);

        tokio::spawn(async move {
            let mut work = tokio::task::spawn_blocking(move || classifier.classify(&frame));
            let (result, worker_done) = match tokio::time::timeout(timeout, &mut work).await {
                Ok(Ok(result)) => (result, true),
                Ok(Err(e)) => (
                    Err(DetectError::Classification(format!("classifier worker failed: {}", e))),
                    true,
                ),
                Err(_) => (Err(DetectError::Timeout(timeout.as_millis() as u64)), false),
            };

            // The processing task only goes away on shutdown
            let _ = completions.send(Report::Sample(Completion {
                epoch,
                sampled_at,
                sequence,
                result,
                worker_done,
            }));

            // A blocking call cannot be cancelled; the gate stays busy until it returns
            if !worker_done {
                let _ = work.await;
                let _ = completions.send(Report::WorkerDone { sequence });
            }
        });
    }

    fn handle_completion(&mut self, done: Completion) {
        // Release the gate unless the classifier is still running
        if done.worker_done {
            self.gate.complete();
        }

        if done.epoch != self.epoch || !self.enabled {
            debug!("Discarding result for frame {}: detection disabled", done.sequence);
            StatsCounters::bump(&self.stats.discarded);
            return;
        }

        let faces = match done.result {
            Ok(faces) => faces,
            Err(e) => {
                // Freeze the closure timer: no observation this tick
                warn!("Frame {} not classified: {}", done.sequence, e);
                StatsCounters::bump(&self.stats.failed);
                return;
            }
        };

        StatsCounters::bump(&self.stats.classified);

        let closed = any_eyes_closed(&faces, &self.config);
        let observation = self.machine.observe(closed, done.sampled_at);
        trace!(
            "Frame {}: {} face(s), closed={}, closed_for={:?}",
            done.sequence,
            faces.len(),
            closed,
            observation.closed_for
        );

        self.sleeping.send_replace(observation.is_sleeping);

        if observation.fired {
            info!("Sleep detected: eyes closed for {}ms", observation.closed_for.as_millis());
            StatsCounters::bump(&self.stats.events_fired);
            // No subscribers is fine
            let _ = self.events.send(SleepEvent::now(observation.closed_for));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, ReplayClassifier, ScriptedOutcome};
    use camera_capture::{frame_channel, FrameSender, PixelFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn closed() -> ScriptedOutcome {
        Ok(vec![FaceSample::new(0.9, Some(0.05), Some(0.06))])
    }

    fn open() -> ScriptedOutcome {
        Ok(vec![FaceSample::new(0.9, Some(0.3), Some(0.28))])
    }

    fn no_face() -> ScriptedOutcome {
        Ok(Vec::new())
    }

    fn failure() -> ScriptedOutcome {
        Err("vision request failed".to_string())
    }

    struct Harness {
        pipeline: DetectionPipeline,
        frames: FrameSender,
        clock: ManualClock,
        sleeping: watch::Receiver<bool>,
        events: broadcast::Receiver<SleepEvent>,
        sequence: u64,
    }

    impl Harness {
        fn new(config: DetectorConfig, classifier: Arc<dyn EyeStateClassifier>) -> Self {
            let (frames, rx) = frame_channel(4);
            let clock = ManualClock::new();
            let pipeline =
                DetectionPipeline::spawn_with_clock(config, classifier, rx, Arc::new(clock.clone())).unwrap();
            let sleeping = pipeline.subscribe_sleeping();
            let events = pipeline.subscribe_events();

            Self {
                pipeline,
                frames,
                clock,
                sleeping,
                events,
                sequence: 0,
            }
        }

        fn replay(config: DetectorConfig, script: Vec<ScriptedOutcome>) -> Self {
            Self::new(config, Arc::new(ReplayClassifier::new(script)))
        }

        fn push(&mut self, advance_ms: u64) {
            self.clock.advance(Duration::from_millis(advance_ms));
            let frame = VideoFrame::blank(4, 4, PixelFormat::Gray8, 0, self.sequence);
            self.sequence += 1;
            assert!(self.frames.send(frame).unwrap());
        }

        /// Push a frame and wait for its sample to be published
        async fn sample(&mut self, advance_ms: u64) -> bool {
            self.push(advance_ms);
            timeout(WAIT, self.sleeping.changed())
                .await
                .expect("sample was not published")
                .unwrap();
            *self.sleeping.borrow_and_update()
        }

        async fn wait_for(&self, check: impl Fn(&PipelineStats) -> bool) {
            timeout(WAIT, async {
                while !check(&self.pipeline.stats()) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .expect("pipeline stats never reached the expected state");
        }
    }

    /// Blocks inside `classify` until the test releases it
    struct GatedClassifier {
        started: mpsc::UnboundedSender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl EyeStateClassifier for GatedClassifier {
        fn classify(&self, _frame: &VideoFrame) -> Result<Vec<FaceSample>, DetectError> {
            let _ = self.started.send(());
            self.release
                .lock()
                .map_err(|_| DetectError::Classification("poisoned".into()))?
                .recv()
                .map_err(|_| DetectError::Classification("released".into()))?;
            closed().map_err(DetectError::Classification)
        }
    }

    fn gated() -> (Arc<GatedClassifier>, mpsc::UnboundedReceiver<()>, std::sync::mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let classifier = GatedClassifier {
            started: started_tx,
            release: Mutex::new(release_rx),
        };
        (Arc::new(classifier), started_rx, release_tx)
    }

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            processing_interval_ms: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fires_after_two_seconds_closed() {
        let mut h = Harness::replay(fast_config(), vec![closed(); 21]);

        assert!(!h.sample(0).await);
        for _ in 1..20 {
            assert!(!h.sample(100).await);
        }
        assert!(h.events.try_recv().is_err());

        // t = 2.0s
        assert!(h.sample(100).await);
        let event = timeout(WAIT, h.events.recv()).await.unwrap().unwrap();
        assert_eq!(event.closed_for_ms, 2000);
        assert_eq!(h.pipeline.stats().events_fired, 1);
    }

    #[tokio::test]
    async fn test_cooldown_holds_while_eyes_stay_closed() {
        let mut h = Harness::replay(DetectorConfig::default(), vec![closed(); 60]);

        assert!(!h.sample(0).await);
        for _ in 0..10 {
            h.sample(200).await;
        }
        assert!(h.pipeline.is_sleeping());
        assert!(h.events.try_recv().is_ok());

        // Closed through t = 10s: still sleeping, no second event
        for _ in 0..40 {
            assert!(h.sample(200).await);
        }
        assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(h.pipeline.stats().events_fired, 1);
    }

    #[tokio::test]
    async fn test_no_face_restarts_episode() {
        let mut script = vec![closed(); 3];
        script.push(no_face());
        script.extend(vec![closed(); 10]);
        let mut h = Harness::replay(DetectorConfig::default(), script);

        assert!(!h.sample(0).await); // t=0.0
        assert!(!h.sample(500).await); // t=0.5
        assert!(!h.sample(1000).await); // t=1.5
        assert!(!h.sample(200).await); // t=1.7, no face
        assert!(!h.sample(200).await); // t=1.9, new episode
        assert!(!h.sample(1800).await); // t=3.7
        assert!(h.sample(200).await); // t=3.9
        assert_eq!(h.pipeline.stats().events_fired, 1);
    }

    #[tokio::test]
    async fn test_failures_freeze_closure_timer() {
        let mut script = vec![closed()];
        script.extend(vec![failure(); 5]);
        script.push(closed());
        let mut h = Harness::replay(DetectorConfig::default(), script);

        assert!(!h.sample(0).await);
        for failed in 1..=5 {
            h.push(200);
            h.wait_for(|s| s.failed == failed).await;
        }
        assert!(!h.pipeline.is_sleeping());

        // Episode start is untouched by the failed samples: t=2.0 qualifies
        assert!(h.sample(1000).await);
        assert!(timeout(WAIT, h.events.recv()).await.unwrap().is_ok());

        let stats = h.pipeline.stats();
        assert_eq!(stats.classified, 2);
        assert_eq!(stats.failed, 5);
    }

    #[tokio::test]
    async fn test_throttles_bursts() {
        let mut h = Harness::replay(DetectorConfig::default(), vec![open(); 4]);

        assert!(!h.sample(0).await);
        for _ in 0..3 {
            h.push(50);
            h.wait_for(|s| s.frames_received == h.sequence).await;
        }
        let stats = h.pipeline.stats();
        assert_eq!(stats.dropped_throttled, 3);
        assert_eq!(stats.classified, 1);

        // 50 * 3 + 30 = 180ms after the last admitted frame
        assert!(!h.sample(30).await);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (classifier, mut started, release) = gated();
        let mut h = Harness::new(DetectorConfig::default(), classifier);

        h.push(0);
        timeout(WAIT, started.recv()).await.unwrap();

        for _ in 0..5 {
            h.push(500);
            h.wait_for(|s| s.frames_received == h.sequence).await;
        }
        assert_eq!(h.pipeline.stats().dropped_busy, 5);
        assert!(started.try_recv().is_err());

        release.send(()).unwrap();
        timeout(WAIT, h.sleeping.changed()).await.unwrap().unwrap();
        assert_eq!(h.pipeline.stats().classified, 1);

        // Gate is free again
        h.push(500);
        timeout(WAIT, started.recv()).await.unwrap();
        release.send(()).unwrap();
        timeout(WAIT, h.sleeping.changed()).await.unwrap().unwrap();
        assert_eq!(h.pipeline.stats().classified, 2);
    }

    #[tokio::test]
    async fn test_disable_resets_but_keeps_cooldown() {
        let mut h = Harness::replay(DetectorConfig::default(), vec![closed(); 40]);

        h.sample(0).await;
        for _ in 0..10 {
            h.sample(200).await;
        }
        assert!(h.pipeline.is_sleeping());
        assert_eq!(h.pipeline.stats().events_fired, 1);

        h.pipeline.set_enabled(false).unwrap();
        timeout(WAIT, h.sleeping.changed()).await.unwrap().unwrap();
        assert!(!*h.sleeping.borrow_and_update());

        h.push(200);
        h.wait_for(|s| s.dropped_disabled == 1).await;

        h.pipeline.set_enabled(true).unwrap();

        // New episode qualifies after 2s, but the cooldown from t=2.0 still applies
        assert!(!h.sample(200).await);
        for _ in 0..9 {
            assert!(!h.sample(200).await);
        }
        assert!(h.sample(200).await);
        assert_eq!(h.pipeline.stats().events_fired, 1);
    }

    #[tokio::test]
    async fn test_late_result_after_disable_is_discarded() {
        let (classifier, mut started, release) = gated();
        let mut h = Harness::new(DetectorConfig::default(), classifier);

        h.push(0);
        timeout(WAIT, started.recv()).await.unwrap();

        h.pipeline.set_enabled(false).unwrap();
        timeout(WAIT, h.sleeping.changed()).await.unwrap().unwrap();
        h.pipeline.set_enabled(true).unwrap();

        release.send(()).unwrap();
        h.wait_for(|s| s.discarded == 1).await;
        assert_eq!(h.pipeline.stats().classified, 0);
        assert!(!h.pipeline.is_sleeping());

        // In-flight flag was cleared by the discarded result
        h.push(500);
        timeout(WAIT, started.recv()).await.unwrap();
        release.send(()).unwrap();
        h.wait_for(|s| s.classified == 1).await;
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure_and_holds_gate() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let classifier = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |_: &VideoFrame| -> Result<Vec<FaceSample>, DetectError> {
                let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        };
        let config = DetectorConfig {
            classification_timeout_ms: 20,
            ..Default::default()
        };
        let mut h = Harness::new(config, Arc::new(classifier));

        h.push(0);
        h.wait_for(|s| s.failed == 1).await;

        // Timed out, but the first call is still running
        for _ in 0..4 {
            h.push(500);
            h.wait_for(|s| s.frames_received == h.sequence).await;
        }
        let stats = h.pipeline.stats();
        assert_eq!(stats.dropped_busy, 4);
        assert_eq!(stats.failed, 1);
        assert!(!h.pipeline.is_sleeping());

        // Once it returns the gate admits again
        timeout(WAIT, async {
            while h.pipeline.stats().failed < 2 {
                h.push(500);
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("gate never reopened after the timed-out call returned");

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(h.pipeline.stats().classified, 0);
    }

    #[tokio::test]
    async fn test_panicking_classifier_does_not_wedge_gate() {
        let classifier = |_: &VideoFrame| -> Result<Vec<FaceSample>, DetectError> {
            panic!("classifier blew up");
        };
        let mut h = Harness::new(DetectorConfig::default(), Arc::new(classifier));

        h.push(0);
        h.wait_for(|s| s.failed == 1).await;
        h.push(500);
        h.wait_for(|s| s.failed == 2).await;
    }

    #[tokio::test]
    async fn test_starts_disabled() {
        let config = DetectorConfig {
            enabled: false,
            ..Default::default()
        };
        let mut h = Harness::replay(config, vec![closed()]);

        h.push(0);
        h.wait_for(|s| s.dropped_disabled == 1).await;
        assert_eq!(h.pipeline.stats().classified, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let (_tx, rx) = frame_channel(1);
        let config = DetectorConfig {
            processing_interval_ms: 0,
            ..Default::default()
        };
        let result = DetectionPipeline::spawn(config, Arc::new(ReplayClassifier::new(Vec::new())), rx);
        assert!(matches!(result, Err(DetectError::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_returns_stats() {
        let mut h = Harness::replay(DetectorConfig::default(), vec![open()]);
        h.sample(0).await;

        let stats = h.pipeline.shutdown().await.unwrap();
        assert_eq!(stats.classified, 1);
        assert!(h.frames.is_closed());
    }
}
