//! Pill state coordinator
//!
//! Derives one visual state for the pill window from three inputs:
//! - the window's own visibility, probed once at activation
//! - the four backend event channels
//! - a short settling poll of window visibility right after activation
//!
//! All inputs are funnelled into a single task that owns the
//! [`PillModel`], so there is exactly one writer and inputs are applied in
//! arrival order. Every state change is also run through the
//! [`EdgeObserver`] to fire feedback sounds.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::events::{BackendEvent, Channel};
use crate::host::{Host, HostWindow, RawEvent, SoundPlayer, Unlisten};

use super::settle::{SettleTiming, SettlingPoll};
use super::sounds::EdgeObserver;
use super::state::{PillModel, PillSnapshot};

/// Which visibility query produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Initial,
    Poll,
}

#[derive(Debug)]
struct Reading {
    probe: Probe,
    visible: bool,
}

/// Listener handles attached so far
///
/// Attachment is asynchronous, so a handle may arrive after the
/// coordinator has been deactivated. Such handles are released on arrival.
#[derive(Default)]
struct Listeners {
    slots: Mutex<ListenerSlots>,
}

#[derive(Default)]
struct ListenerSlots {
    closed: bool,
    handles: Vec<(Channel, Unlisten)>,
}

impl Listeners {
    fn attach(&self, channel: Channel, handle: Unlisten) {
        let mut slots = self.lock();
        if slots.closed {
            drop(slots);
            debug!(%channel, "listener attached after deactivation, releasing");
            handle.release();
            return;
        }
        slots.handles.push((channel, handle));
        debug!(%channel, "listener ready");
    }

    /// Release every attached handle and refuse future ones
    fn close(&self) -> usize {
        let handles = {
            let mut slots = self.lock();
            slots.closed = true;
            std::mem::take(&mut slots.handles)
        };
        let released = handles.len();
        for (_, handle) in handles {
            handle.release();
        }
        released
    }

    fn attached(&self) -> usize {
        self.lock().handles.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerSlots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to an active coordinator
///
/// Dropping the handle deactivates the coordinator.
pub struct PillCoordinator {
    snapshot_rx: watch::Receiver<PillSnapshot>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    listeners: Arc<Listeners>,
}

impl PillCoordinator {
    /// Activate the coordinator on the current tokio runtime
    pub fn activate(host: Host, timing: SettleTiming) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(PillSnapshot::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RawEvent>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listeners = Arc::new(Listeners::default());

        for channel in Channel::ALL {
            let events = Arc::clone(&host.events);
            let sink = event_tx.clone();
            let listeners = Arc::clone(&listeners);
            tokio::spawn(async move {
                match events.listen(channel, sink).await {
                    Ok(handle) => listeners.attach(channel, handle),
                    Err(e) => warn!(?e, %channel, "failed to attach listener"),
                }
            });
        }
        drop(event_tx);

        let runner = Runner {
            window: host.window,
            sounds: host.sounds,
            model: PillModel::new(),
            edges: EdgeObserver::default(),
            snapshot_tx,
        };
        let task = tokio::spawn(runner.run(timing, event_rx, shutdown_rx));

        info!(
            interval_ms = timing.interval.as_millis() as u64,
            window_ms = timing.window.as_millis() as u64,
            "pill coordinator activated"
        );

        Self {
            snapshot_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            listeners,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> PillSnapshot {
        *self.snapshot_rx.borrow()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<PillSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Number of listeners currently attached
    pub fn attached_listeners(&self) -> usize {
        self.listeners.attached()
    }

    pub fn is_active(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Unsubscribe every attached listener and stop the poll.
    /// Safe to call more than once.
    pub fn deactivate(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(());
        let released = self.listeners.close();
        info!(released, "pill coordinator deactivated");
    }

    /// Deactivate and wait for the coordinator task to finish
    pub async fn shutdown(mut self) {
        self.deactivate();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(?e, "coordinator task ended abnormally");
            }
        }
    }
}

impl Drop for PillCoordinator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// State owned by the coordinator task
struct Runner {
    window: Arc<dyn HostWindow>,
    sounds: Arc<dyn SoundPlayer>,
    model: PillModel,
    edges: EdgeObserver,
    snapshot_tx: watch::Sender<PillSnapshot>,
}

impl Runner {
    async fn run(
        mut self,
        timing: SettleTiming,
        mut event_rx: mpsc::UnboundedReceiver<RawEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let (reading_tx, mut reading_rx) = mpsc::unbounded_channel::<Reading>();
        let mut queries = JoinSet::new();
        let mut poll = SettlingPoll::start(timing);

        queries.spawn(probe_visibility(
            Arc::clone(&self.window),
            Probe::Initial,
            reading_tx.clone(),
        ));

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => break,

                Some((channel, payload)) = event_rx.recv() => {
                    self.handle_event(channel, payload);
                }

                Some(reading) = reading_rx.recv() => {
                    if reading.probe == Probe::Poll && poll.is_settled() {
                        debug!(visible = reading.visible, "discarding late poll reading");
                        continue;
                    }
                    self.handle_reading(reading);
                }

                ticked = poll.tick(), if poll.is_running() => {
                    if ticked {
                        queries.spawn(probe_visibility(
                            Arc::clone(&self.window),
                            Probe::Poll,
                            reading_tx.clone(),
                        ));
                    } else {
                        debug!("settling poll finished");
                    }
                }

                Some(joined) = queries.join_next() => {
                    if let Err(e) = joined {
                        warn!(?e, "visibility query task failed");
                    }
                }
            }
        }

        poll.cancel();
        queries.abort_all();
        debug!("coordinator task stopped");
    }

    fn handle_event(&mut self, channel: Channel, payload: Value) {
        match BackendEvent::decode(channel, &payload) {
            Ok(event) => {
                debug!(%event, "backend event");
                self.model.apply_event(&event);
                self.publish();
            }
            Err(e) => {
                warn!(%e, %channel, %payload, "dropping malformed backend event");
            }
        }
    }

    fn handle_reading(&mut self, reading: Reading) {
        match reading.probe {
            Probe::Initial => self.model.apply_initial_visibility(reading.visible),
            Probe::Poll => self.model.apply_poll_visibility(reading.visible),
        }
        self.publish();
    }

    /// Push the snapshot to the render target and fire any edge sound
    fn publish(&mut self) {
        let snapshot = self.model.snapshot();
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        if changed {
            debug!(
                state = %snapshot.state,
                visible = snapshot.visible,
                hold_time = ?snapshot.hold_time,
                "pill snapshot updated"
            );
        }

        let previous = self.edges.previous();
        if let Some(cue) = self.edges.observe(snapshot.state) {
            info!(from = %previous, to = %snapshot.state, %cue, "playing cue");
            self.sounds.play(cue);
        }
    }
}

async fn probe_visibility(
    window: Arc<dyn HostWindow>,
    probe: Probe,
    reading_tx: mpsc::UnboundedSender<Reading>,
) {
    match window.is_visible().await {
        Ok(visible) => {
            let _ = reading_tx.send(Reading { probe, visible });
        }
        Err(e) => warn!(?e, ?probe, "window visibility query failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::host::{EventBus, EventSink, EventSource, HostError};
    use crate::pill::{PillState, SoundCue};

    #[derive(Default)]
    struct FakeWindow {
        visible: AtomicBool,
        failing: AtomicBool,
        queries: AtomicUsize,
        /// How long a query takes to answer after sampling
        delay: Mutex<Duration>,
    }

    impl FakeWindow {
        fn set_visible(&self, visible: bool) {
            self.visible.store(visible, Ordering::SeqCst);
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }
    }

    #[async_trait]
    impl HostWindow for FakeWindow {
        async fn is_visible(&self) -> Result<bool, HostError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(HostError::WindowUnavailable("no window".to_string()));
            }
            let visible = self.visible.load(Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(visible)
        }
    }

    /// Event bus that can refuse or delay individual channels
    #[derive(Default)]
    struct FakeEvents {
        bus: EventBus,
        failing: Vec<Channel>,
        delayed: Vec<(Channel, Duration)>,
        released: Arc<AtomicUsize>,
    }

    impl FakeEvents {
        fn emit(&self, name: &str, payload: Value) {
            self.bus.emit(name, payload);
        }

        fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        fn attached(&self) -> usize {
            Channel::ALL
                .into_iter()
                .map(|channel| self.bus.listener_count(channel))
                .sum()
        }
    }

    #[async_trait]
    impl EventSource for FakeEvents {
        async fn listen(&self, channel: Channel, sink: EventSink) -> Result<Unlisten, HostError> {
            if let Some((_, delay)) = self.delayed.iter().find(|(c, _)| *c == channel) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(&channel) {
                return Err(HostError::ListenerRejected {
                    channel,
                    reason: "refused".to_string(),
                });
            }
            let inner = self.bus.listen(channel, sink).await?;
            let released = Arc::clone(&self.released);
            Ok(Unlisten::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
                inner.release();
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSounds {
        cues: Mutex<Vec<SoundCue>>,
    }

    impl RecordingSounds {
        fn cues(&self) -> Vec<SoundCue> {
            self.cues.lock().unwrap().clone()
        }
    }

    impl SoundPlayer for RecordingSounds {
        fn play(&self, cue: SoundCue) {
            self.cues.lock().unwrap().push(cue);
        }
    }

    struct Harness {
        window: Arc<FakeWindow>,
        events: Arc<FakeEvents>,
        sounds: Arc<RecordingSounds>,
        pill: PillCoordinator,
    }

    impl Harness {
        fn start(visible: bool) -> Self {
            Self::with_events(visible, FakeEvents::default())
        }

        fn with_events(visible: bool, events: FakeEvents) -> Self {
            let window = Arc::new(FakeWindow::default());
            window.set_visible(visible);
            let events = Arc::new(events);
            let sounds = Arc::new(RecordingSounds::default());
            let host = Host {
                window: window.clone(),
                events: events.clone(),
                sounds: sounds.clone(),
            };
            let pill = PillCoordinator::activate(host, SettleTiming::default());
            Self {
                window,
                events,
                sounds,
                pill,
            }
        }

        async fn emit(&self, name: &str, payload: Value) {
            self.events.emit(name, payload);
            settle().await;
        }

        fn state(&self) -> (PillState, bool) {
            let snapshot = self.pill.snapshot();
            (snapshot.state, snapshot.visible)
        }
    }

    /// Let every runnable task finish before the clock moves on
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn past_settle_window() {
        tokio::time::sleep(Duration::from_millis(2100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initially_visible_window_starts_listening() {
        let h = Harness::start(true);
        settle().await;

        assert_eq!(h.state(), (PillState::Listening, true));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initially_hidden_window_stays_idle() {
        let h = Harness::start(false);
        settle().await;

        assert_eq!(h.state(), (PillState::Idle, false));
        assert!(h.sounds.cues().is_empty());
        assert_eq!(h.pill.attached_listeners(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dictation_cycle() {
        let h = Harness::start(false);
        past_settle_window().await;

        h.emit("pill-state", json!("listening")).await;
        assert_eq!(h.state(), (PillState::Listening, true));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start]);

        h.emit("stop-recording", json!("")).await;
        assert_eq!(h.state(), (PillState::Loading, true));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start]);

        h.emit("pill-state", json!("success")).await;
        assert_eq!(h.state(), (PillState::Success, true));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start]);

        h.emit("pill-state", json!("idle")).await;
        assert_eq!(h.state(), (PillState::Idle, false));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start, SoundCue::Ending]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_events_force_state() {
        let h = Harness::start(false);
        past_settle_window().await;

        h.emit("pill-state", json!("error")).await;
        h.emit("start-recording", json!("")).await;
        assert_eq!(h.state(), (PillState::Listening, true));

        h.emit("pill-state", json!("success")).await;
        h.emit("stop-recording", json!(null)).await;
        assert_eq!(h.state(), (PillState::Loading, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_events_last_write_wins() {
        let h = Harness::start(false);
        past_settle_window().await;

        h.events.emit("stop-recording", json!(""));
        h.events.emit("pill-state", json!("listening"));
        settle().await;

        assert_eq!(h.state(), (PillState::Listening, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_time_passes_through() {
        let h = Harness::start(false);
        past_settle_window().await;
        h.emit("pill-state", json!("loading")).await;

        h.emit("hold-time", json!(1875)).await;
        let snapshot = h.pill.snapshot();
        assert_eq!(snapshot.hold_time, Some(1875));
        assert_eq!((snapshot.state, snapshot.visible), (PillState::Loading, true));

        h.emit("pill-state", json!("idle")).await;
        assert_eq!(h.pill.snapshot().hold_time, Some(1875));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_error_plays_once() {
        let h = Harness::start(false);
        past_settle_window().await;

        h.emit("pill-state", json!("loading")).await;
        h.emit("pill-state", json!("error")).await;
        h.emit("pill-state", json!("error")).await;
        assert_eq!(h.sounds.cues(), vec![SoundCue::Error]);

        h.emit("pill-state", json!("idle")).await;
        assert_eq!(h.sounds.cues(), vec![SoundCue::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_events_are_ignored() {
        let h = Harness::start(false);
        past_settle_window().await;
        h.emit("pill-state", json!("loading")).await;

        h.emit("pill-state", json!("recording")).await;
        h.emit("pill-state", json!(7)).await;
        h.emit("hold-time", json!("long")).await;

        let snapshot = h.pill.snapshot();
        assert_eq!((snapshot.state, snapshot.visible), (PillState::Loading, true));
        assert_eq!(snapshot.hold_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_promotes_idle_when_window_appears() {
        let h = Harness::start(false);
        settle().await;
        assert_eq!(h.state(), (PillState::Idle, false));

        h.window.set_visible(true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(h.state(), (PillState::Listening, true));
        assert_eq!(h.sounds.cues(), vec![SoundCue::Start]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_overrides_visibility_while_settling() {
        let h = Harness::start(false);
        settle().await;

        h.emit("pill-state", json!("loading")).await;
        assert_eq!(h.state(), (PillState::Loading, true));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.state(), (PillState::Loading, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polling_after_settle_window() {
        let h = Harness::start(false);
        past_settle_window().await;

        // one initial probe plus ticks at 150, 300, ..., 1950
        assert_eq!(h.window.queries(), 14);

        h.window.set_visible(true);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.window.queries(), 14);
        assert_eq!(h.state(), (PillState::Idle, false));
        assert!(h.sounds.cues().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_answered_after_settle_window_is_discarded() {
        let h = Harness::start(false);
        settle().await;
        h.window.set_delay(Duration::from_millis(100));

        // The 1950 ms tick samples a visible window but answers at 2050 ms
        tokio::time::sleep(Duration::from_millis(1939)).await;
        h.window.set_visible(true);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.window.queries(), 14);
        assert_eq!(h.state(), (PillState::Idle, false));
        assert!(h.sounds.cues().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_failures_are_not_fatal() {
        let h = Harness::start(true);
        h.window.failing.store(true, Ordering::SeqCst);
        past_settle_window().await;

        assert_eq!(h.state(), (PillState::Idle, false));

        h.emit("start-recording", json!("")).await;
        assert_eq!(h.state(), (PillState::Listening, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_after_partial_attach() {
        let events = FakeEvents {
            failing: vec![Channel::HoldTime, Channel::StopRecording],
            ..FakeEvents::default()
        };
        let mut h = Harness::with_events(false, events);
        settle().await;
        assert_eq!(h.pill.attached_listeners(), 2);

        h.emit("pill-state", json!("listening")).await;
        assert_eq!(h.state(), (PillState::Listening, true));

        h.pill.deactivate();
        assert_eq!(h.events.released(), 2);
        assert_eq!(h.events.attached(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_listener_released_after_teardown() {
        let events = FakeEvents {
            delayed: vec![(Channel::PillState, Duration::from_millis(500))],
            ..FakeEvents::default()
        };
        let mut h = Harness::with_events(false, events);
        settle().await;
        assert_eq!(h.pill.attached_listeners(), 3);

        h.pill.deactivate();
        assert_eq!(h.events.released(), 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.events.released(), 4);
        assert_eq!(h.events.attached(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_stops_all_updates() {
        let mut h = Harness::start(false);
        settle().await;

        h.pill.deactivate();
        h.pill.deactivate();
        assert!(!h.pill.is_active());

        h.window.set_visible(true);
        h.emit("pill-state", json!("listening")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.state(), (PillState::Idle, false));
        assert!(h.sounds.cues().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_updates() {
        let h = Harness::start(false);
        past_settle_window().await;
        let mut rx = h.pill.subscribe();
        rx.borrow_and_update();

        h.emit("start-recording", json!("")).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, PillState::Listening);

        h.emit("start-recording", json!("")).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins_task() {
        let h = Harness::start(true);
        settle().await;
        h.pill.shutdown().await;
        assert_eq!(h.events.released(), 4);
    }
}
