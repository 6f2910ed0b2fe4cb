//! Central event dispatch between the control plane and the audio thread
//!
//! The [`EventDispatcher`] owns the non-real-time inbound queue, the two
//! lock-free real-time fifos, the event timer, the poster registry and the
//! notification subscriber lists. Its loop runs on a dedicated thread with a
//! fixed period: due events from the waiting list are dispatched first, then
//! the inbound queue, then the incoming real-time queue is drained and fanned
//! out to subscribers or to the [`Worker`].
//!
//! The worker is a second thread for handling that may block or take
//! unbounded time (plugin loading, asynchronous plugin work). A slow action
//! there delays only later queued actions, never the dispatcher cycle or the
//! audio callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::engine::EngineController;
use crate::event::{
    DispatcherError, Event, EventPayload, EventPoster, EventStatus, PosterId, MAX_POSTERS,
};
use crate::event_timer::EventTimer;
use crate::rt_event::RtEvent;
use crate::rt_fifo::{RtEventConsumer, RtEventProducer};
use crate::time::Time;

/// Fixed period of the dispatcher loop.
pub const DISPATCHER_PERIOD: Duration = Duration::from_millis(1);

/// Fixed period of the worker loop.
pub const WORKER_PERIOD: Duration = Duration::from_millis(5);

/// How often the worker asks the engine for a timing report.
const TIMING_REPORT_INTERVAL: Duration = Duration::from_secs(5);

type ListenerList = Arc<Mutex<Vec<Weak<dyn EventPoster>>>>;

/// Cloneable handle for posting events into the dispatcher from control
/// frontends and from worker follow-ups.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Non-blocking enqueue; the caller relinquishes ownership.
    pub fn post(&self, event: Event) {
        if self.tx.send(event).is_err() {
            error!("event dispatcher is gone, dropping event");
        }
    }
}

/// Registry mapping the closed poster id space to weak poster references.
struct PosterRegistry {
    slots: [Option<Weak<dyn EventPoster>>; MAX_POSTERS],
}

impl PosterRegistry {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn register(&mut self, poster: &Arc<dyn EventPoster>) -> Result<(), DispatcherError> {
        let slot = &mut self.slots[poster.poster_id().index()];
        if slot.is_some() {
            return Err(DispatcherError::AlreadySubscribed);
        }
        *slot = Some(Arc::downgrade(poster));
        Ok(())
    }

    fn deregister(&mut self, id: PosterId) -> Result<(), DispatcherError> {
        match self.slots[id.index()].take() {
            Some(_) => Ok(()),
            None => Err(DispatcherError::UnknownPoster),
        }
    }

    fn lookup(&self, id: PosterId) -> Option<Arc<dyn EventPoster>> {
        self.slots[id.index()].as_ref()?.upgrade()
    }
}

fn subscribe(list: &ListenerList, poster: &Arc<dyn EventPoster>) -> Result<(), DispatcherError> {
    let mut list = list.lock().unwrap();
    let candidate = Arc::downgrade(poster);
    if list.iter().any(|existing| existing.ptr_eq(&candidate)) {
        return Err(DispatcherError::AlreadySubscribed);
    }
    list.push(candidate);
    Ok(())
}

fn unsubscribe(list: &ListenerList, poster: &Arc<dyn EventPoster>) -> Result<(), DispatcherError> {
    let mut list = list.lock().unwrap();
    let candidate = Arc::downgrade(poster);
    match list.iter().position(|existing| existing.ptr_eq(&candidate)) {
        Some(index) => {
            list.remove(index);
            Ok(())
        }
        None => Err(DispatcherError::UnknownPoster),
    }
}

/// Result of one dispatch step. `Done` returns the event so the caller can
/// fire its completion callback; `Moved` means ownership went onward.
enum Dispatch {
    Done(Event, EventStatus),
    Moved(EventStatus),
}

/// Everything the dispatch loop owns. Moves onto the loop thread on `run`
/// and moves back on `stop`.
struct DispatcherCore {
    event_rx: Receiver<Event>,
    in_rt_queue: RtEventConsumer,
    out_rt_queue: RtEventProducer,
    waiting_list: VecDeque<Event>,
    event_timer: EventTimer,
    rt_batch: Vec<RtEvent>,
    worker_tx: Sender<Event>,
    posters: Arc<Mutex<PosterRegistry>>,
    keyboard_listeners: ListenerList,
    parameter_listeners: ListenerList,
}

impl DispatcherCore {
    /// Dispatch policy for events addressed to the dispatcher itself.
    fn process(&mut self, mut event: Event) -> Dispatch {
        if event.is_async() {
            event.set_receiver(PosterId::Worker);
            let _ = self.worker_tx.send(event);
            return Dispatch::Moved(EventStatus::QueuedHandling);
        }
        if event.maps_to_rt_event() {
            let (send_now, sample_offset) =
                self.event_timer.sample_offset_from_realtime(event.time());
            if send_now {
                self.log_if_overdue(&event, sample_offset);
                if let Some(rt_event) = event.to_rt_event(sample_offset) {
                    match self.out_rt_queue.push(rt_event) {
                        Ok(()) => return Dispatch::Done(event, EventStatus::HandledOk),
                        // A full queue is not a failure: the event retries
                        // from the waiting list on a later cycle.
                        Err(rejected) => rejected.reclaim(),
                    }
                }
            }
            self.insert_waiting(event);
            return Dispatch::Moved(EventStatus::QueuedHandling);
        }
        if event.is_parameter_change_notification() {
            self.publish_parameter_notifications(&event);
            return Dispatch::Done(event, EventStatus::HandledOk);
        }
        Dispatch::Done(event, EventStatus::UnrecognizedEvent)
    }

    fn log_if_overdue(&self, event: &Event, sample_offset: usize) {
        if sample_offset != 0 || event.time() == Time::immediate() {
            return;
        }
        let anchor = self.event_timer.real_time_from_sample_offset(0);
        let late_nanos = anchor.nanos_since(event.time());
        let block_nanos = (self.event_timer.block_size() as f64
            / self.event_timer.sample_rate() as f64
            * 1e9) as i64;
        if late_nanos > block_nanos {
            debug!("event overdue by {} ns, delivering at offset 0", late_nanos);
        }
    }

    /// Keep the waiting list ordered by target time, newest-first from the
    /// front so consumption from the back sees non-decreasing times. Events
    /// sharing a target time keep their insertion order.
    fn insert_waiting(&mut self, event: Event) {
        let position = self
            .waiting_list
            .iter()
            .position(|waiting| waiting.time() <= event.time())
            .unwrap_or(self.waiting_list.len());
        self.waiting_list.insert(position, event);
    }

    /// Receiver-lookup path used by the loop for every event.
    fn deliver(&mut self, event: Event) {
        match event.receiver() {
            PosterId::AudioEngine => match self.process(event) {
                Dispatch::Done(event, status) => event.complete(status),
                Dispatch::Moved(_) => {}
            },
            PosterId::Worker => {
                let _ = self.worker_tx.send(event);
            }
            id => {
                let poster = self.posters.lock().unwrap().lookup(id);
                match poster {
                    Some(poster) => {
                        let status = poster.process_event(&event);
                        if status != EventStatus::QueuedHandling {
                            event.complete(status);
                        }
                    }
                    None => {
                        warn!("no poster registered for receiver {:?}", id);
                        event.complete(EventStatus::UnrecognizedReceiver);
                    }
                }
            }
        }
    }

    /// Dispatch every waiting event that has become due. Bounded by the list
    /// length at entry so a full outgoing queue cannot spin the cycle.
    fn drain_waiting_list(&mut self) {
        for _ in 0..self.waiting_list.len() {
            let due = match self.waiting_list.back() {
                Some(event) => self.event_timer.sample_offset_from_realtime(event.time()).0,
                None => false,
            };
            if !due {
                break;
            }
            if let Some(event) = self.waiting_list.pop_back() {
                self.deliver(event);
            }
        }
    }

    /// Drain the incoming real-time queue. Synchronisation markers are
    /// applied to the timer before any timestamp conversion from the same
    /// batch is finalized; the rest is routed in arrival order.
    fn drain_rt_queue(&mut self) {
        let mut batch = std::mem::take(&mut self.rt_batch);
        batch.clear();
        while let Some(rt_event) = self.in_rt_queue.pop() {
            batch.push(rt_event);
        }
        for rt_event in &batch {
            if let RtEvent::Synchronisation { timestamp, .. } = rt_event {
                self.event_timer.set_outgoing_time(*timestamp);
            }
        }
        for rt_event in batch.drain(..) {
            if matches!(rt_event, RtEvent::Synchronisation { .. }) {
                continue;
            }
            self.process_rt_event(rt_event);
        }
        self.rt_batch = batch;
    }

    fn process_rt_event(&mut self, rt_event: RtEvent) {
        let timestamp = self
            .event_timer
            .real_time_from_sample_offset(rt_event.sample_offset());
        let Some(mut event) = Event::from_rt_event(rt_event, timestamp) else {
            debug!("real-time event has no control-plane form: {:?}", rt_event);
            return;
        };
        if event.is_keyboard_notification() {
            self.publish_keyboard_notifications(&event);
        }
        if event.is_parameter_change_notification() {
            self.publish_parameter_notifications(&event);
        }
        if event.is_async() {
            event.set_receiver(PosterId::Worker);
            let _ = self.worker_tx.send(event);
        }
    }

    fn publish_keyboard_notifications(&self, event: &Event) {
        let listeners = self.keyboard_listeners.lock().unwrap();
        for listener in listeners.iter() {
            if let Some(poster) = listener.upgrade() {
                poster.process_event(event);
            }
        }
    }

    fn publish_parameter_notifications(&self, event: &Event) {
        let listeners = self.parameter_listeners.lock().unwrap();
        for listener in listeners.iter() {
            if let Some(poster) = listener.upgrade() {
                poster.process_event(event);
            }
        }
    }
}

fn dispatcher_loop(mut core: DispatcherCore, running: Arc<AtomicBool>) -> DispatcherCore {
    info!("event dispatcher running");
    while running.load(Ordering::Acquire) {
        let cycle_start = Instant::now();
        core.drain_waiting_list();
        while let Ok(event) = core.event_rx.try_recv() {
            core.deliver(event);
        }
        core.drain_rt_queue();
        // Sleep relative to the cycle start so the period does not drift.
        if let Some(remaining) = DISPATCHER_PERIOD.checked_sub(cycle_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
    info!("event dispatcher stopped");
    core
}

/// Dedicated execution context for event handling that may block or take
/// unbounded time. `process` never executes inline on the caller's thread.
pub struct Worker {
    running: Arc<AtomicBool>,
    queue_tx: Sender<Event>,
    core: Option<WorkerCore>,
    thread: Option<JoinHandle<WorkerCore>>,
}

struct WorkerCore {
    queue_rx: Receiver<Event>,
    engine: Box<dyn EngineController>,
    dispatcher_tx: Sender<Event>,
}

impl Worker {
    fn new(engine: Box<dyn EngineController>, dispatcher_tx: Sender<Event>) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            queue_tx,
            core: Some(WorkerCore {
                queue_rx,
                engine,
                dispatcher_tx,
            }),
            thread: None,
        }
    }

    fn queue_sender(&self) -> Sender<Event> {
        self.queue_tx.clone()
    }

    /// Enqueue for asynchronous handling. Always returns `QueuedHandling`;
    /// the event's completion callback fires from the worker thread.
    pub fn process(&self, event: Event) -> EventStatus {
        let _ = self.queue_tx.send(event);
        EventStatus::QueuedHandling
    }

    fn run(&mut self) {
        if self.thread.is_some() {
            return;
        }
        let Some(core) = self.core.take() else {
            return;
        };
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("patchbay-worker".to_string())
            .spawn(move || worker_loop(core, running))
            .expect("failed to spawn worker thread");
        self.thread = Some(handle);
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(core) => self.core = Some(core),
                Err(_) => error!("worker thread panicked"),
            }
        }
    }
}

fn worker_loop(mut core: WorkerCore, running: Arc<AtomicBool>) -> WorkerCore {
    info!("worker running");
    let mut last_timing_report = Instant::now();
    while running.load(Ordering::Acquire) {
        let cycle_start = Instant::now();
        while let Ok(event) = core.queue_rx.try_recv() {
            core.handle_event(event);
        }
        if last_timing_report.elapsed() >= TIMING_REPORT_INTERVAL {
            last_timing_report = Instant::now();
            core.engine.report_timings();
        }
        if let Some(remaining) = WORKER_PERIOD.checked_sub(cycle_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
    info!("worker stopped");
    core
}

impl WorkerCore {
    fn handle_event(&mut self, event: Event) {
        let (payload, completion_cb) = event.into_parts();
        let status = match payload {
            EventPayload::EngineCommand(command) => self.engine.execute_command(command),
            EventPayload::AsyncWork {
                processor_id,
                work_id,
                callback,
            } => {
                let status = callback(processor_id, work_id);
                // The requesting processor learns the outcome through the
                // dispatcher, never inline from this thread.
                let _ = self.dispatcher_tx.send(Event::async_work_completion(
                    processor_id,
                    work_id,
                    status,
                ));
                status
            }
            other => {
                warn!("worker cannot handle event payload: {:?}", other);
                EventStatus::UnrecognizedEvent
            }
        };
        if let Some(cb) = completion_cb {
            cb(status);
        }
    }
}

/// The central coordinator. See the module documentation for the thread
/// model; all methods here are for non-real-time callers only.
pub struct EventDispatcher {
    running: Arc<AtomicBool>,
    event_tx: Sender<Event>,
    posters: Arc<Mutex<PosterRegistry>>,
    keyboard_listeners: ListenerList,
    parameter_listeners: ListenerList,
    worker: Worker,
    core: Option<DispatcherCore>,
    thread: Option<JoinHandle<DispatcherCore>>,
}

impl EventDispatcher {
    pub fn new(
        engine: Box<dyn EngineController>,
        sample_rate: f32,
        block_size: usize,
        in_rt_queue: RtEventConsumer,
        out_rt_queue: RtEventProducer,
    ) -> Self {
        let (event_tx, event_rx) = unbounded();
        let worker = Worker::new(engine, event_tx.clone());
        let posters = Arc::new(Mutex::new(PosterRegistry::new()));
        let keyboard_listeners: ListenerList = Arc::new(Mutex::new(Vec::new()));
        let parameter_listeners: ListenerList = Arc::new(Mutex::new(Vec::new()));
        let core = DispatcherCore {
            event_rx,
            in_rt_queue,
            out_rt_queue,
            waiting_list: VecDeque::new(),
            event_timer: EventTimer::new(sample_rate, block_size),
            rt_batch: Vec::with_capacity(crate::rt_fifo::DEFAULT_FIFO_CAPACITY),
            worker_tx: worker.queue_sender(),
            posters: posters.clone(),
            keyboard_listeners: keyboard_listeners.clone(),
            parameter_listeners: parameter_listeners.clone(),
        };
        Self {
            running: Arc::new(AtomicBool::new(false)),
            event_tx,
            posters,
            keyboard_listeners,
            parameter_listeners,
            worker,
            core: Some(core),
            thread: None,
        }
    }

    /// Non-blocking enqueue into the inbound queue; the caller relinquishes
    /// ownership. Never invoked from the real-time thread.
    pub fn post_event(&self, event: Event) {
        if self.event_tx.send(event).is_err() {
            error!("inbound event queue is gone, dropping event");
        }
    }

    /// Cloneable posting handle for control frontends.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.event_tx.clone(),
        }
    }

    /// Register a poster under its id. The audio-engine and worker slots are
    /// owned by the dispatcher itself and always report `AlreadySubscribed`.
    pub fn register_poster(&self, poster: &Arc<dyn EventPoster>) -> Result<(), DispatcherError> {
        if matches!(
            poster.poster_id(),
            PosterId::AudioEngine | PosterId::Worker
        ) {
            return Err(DispatcherError::AlreadySubscribed);
        }
        self.posters.lock().unwrap().register(poster)
    }

    pub fn deregister_poster(&self, id: PosterId) -> Result<(), DispatcherError> {
        if matches!(id, PosterId::AudioEngine | PosterId::Worker) {
            return Err(DispatcherError::UnknownPoster);
        }
        self.posters.lock().unwrap().deregister(id)
    }

    pub fn subscribe_to_keyboard_events(
        &self,
        poster: &Arc<dyn EventPoster>,
    ) -> Result<(), DispatcherError> {
        subscribe(&self.keyboard_listeners, poster)
    }

    pub fn unsubscribe_from_keyboard_events(
        &self,
        poster: &Arc<dyn EventPoster>,
    ) -> Result<(), DispatcherError> {
        unsubscribe(&self.keyboard_listeners, poster)
    }

    pub fn subscribe_to_parameter_change_notifications(
        &self,
        poster: &Arc<dyn EventPoster>,
    ) -> Result<(), DispatcherError> {
        subscribe(&self.parameter_listeners, poster)
    }

    pub fn unsubscribe_from_parameter_change_notifications(
        &self,
        poster: &Arc<dyn EventPoster>,
    ) -> Result<(), DispatcherError> {
        unsubscribe(&self.parameter_listeners, poster)
    }

    /// Apply the dispatch policy to one event and return its status, firing
    /// the completion callback on terminal statuses. While the loop is
    /// running the event is enqueued instead and handled there.
    pub fn process(&mut self, event: Event) -> EventStatus {
        match self.core.as_mut() {
            Some(core) => match core.process(event) {
                Dispatch::Done(event, status) => {
                    event.complete(status);
                    status
                }
                Dispatch::Moved(status) => status,
            },
            None => {
                self.post_event(event);
                EventStatus::QueuedHandling
            }
        }
    }

    /// Start the dispatch loop and the worker on their own threads.
    pub fn run(&mut self) {
        if self.thread.is_some() {
            return;
        }
        let Some(core) = self.core.take() else {
            return;
        };
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("patchbay-dispatcher".to_string())
            .spawn(move || dispatcher_loop(core, running))
            .expect("failed to spawn dispatcher thread");
        self.thread = Some(handle);
        self.worker.run();
    }

    /// Flag both loops to exit at their next iteration boundary and block
    /// until they have. Events still queued are dropped without firing their
    /// completion callbacks.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.worker.stop();
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(core) => self.core = Some(core),
                Err(_) => error!("dispatcher thread panicked"),
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BypassEngine, EngineCommand};
    use crate::rt_fifo::rt_event_fifo;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const SAMPLE_RATE: f32 = 48_000.0;
    const BLOCK_SIZE: usize = 64;

    struct CountingPoster {
        id: PosterId,
        received: AtomicUsize,
    }

    impl CountingPoster {
        fn new(id: PosterId) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.received.load(Ordering::SeqCst)
        }
    }

    impl EventPoster for CountingPoster {
        fn process_event(&self, _event: &Event) -> EventStatus {
            self.received.fetch_add(1, Ordering::SeqCst);
            EventStatus::HandledOk
        }

        fn poster_id(&self) -> PosterId {
            self.id
        }
    }

    struct Harness {
        dispatcher: EventDispatcher,
        rt_in: RtEventProducer,
        rt_out: RtEventConsumer,
    }

    fn harness_with_capacity(capacity: usize) -> Harness {
        let (in_producer, in_consumer) = rt_event_fifo(capacity);
        let (out_producer, out_consumer) = rt_event_fifo(capacity);
        let dispatcher = EventDispatcher::new(
            Box::new(BypassEngine::new()),
            SAMPLE_RATE,
            BLOCK_SIZE,
            in_consumer,
            out_producer,
        );
        Harness {
            dispatcher,
            rt_in: in_producer,
            rt_out: out_consumer,
        }
    }

    fn harness() -> Harness {
        harness_with_capacity(64)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_due_parameter_event_is_pushed_immediately() {
        let mut h = harness();
        let status = h
            .dispatcher
            .process(Event::parameter_change(3, 7, 0.5, Time::immediate()));
        assert_eq!(status, EventStatus::HandledOk);

        match h.rt_out.pop() {
            Some(RtEvent::ParameterChange {
                processor_id,
                parameter_id,
                value,
                sample_offset,
            }) => {
                assert_eq!(processor_id, 3);
                assert_eq!(parameter_id, 7);
                assert!((value - 0.5).abs() < f32::EPSILON);
                assert_eq!(sample_offset, 0);
            }
            other => panic!("expected a parameter change on the queue, got {:?}", other),
        }
    }

    #[test]
    fn test_future_event_is_queued_not_pushed() {
        let mut h = harness();
        let status = h.dispatcher.process(Event::parameter_change(
            1,
            1,
            1.0,
            Time::now() + Duration::from_secs(10),
        ));
        assert_eq!(status, EventStatus::QueuedHandling);
        assert!(h.rt_out.pop().is_none());
    }

    #[test]
    fn test_unrecognized_payload_status() {
        let mut h = harness();
        // A keyboard notification posted from outside maps to no policy arm.
        let status = h.dispatcher.process(Event::keyboard_notification(
            0,
            0,
            crate::event::KeyboardAction::Modulation { value: 0.1 },
            Time::immediate(),
        ));
        assert_eq!(status, EventStatus::UnrecognizedEvent);
    }

    #[test]
    fn test_register_poster_twice_keeps_first() {
        let h = harness();
        let first = CountingPoster::new(PosterId::Controller);
        let second = CountingPoster::new(PosterId::Controller);
        let first_poster: Arc<dyn EventPoster> = first.clone();
        let second_poster: Arc<dyn EventPoster> = second.clone();

        assert!(h.dispatcher.register_poster(&first_poster).is_ok());
        assert_eq!(
            h.dispatcher.register_poster(&second_poster),
            Err(DispatcherError::AlreadySubscribed)
        );

        let mut h = h;
        h.dispatcher.run();
        h.dispatcher.post_event(
            Event::parameter_change_notification(0, 0, 0.0, Time::immediate())
                .with_receiver(PosterId::Controller),
        );
        assert!(wait_until(Duration::from_secs(1), || first.count() == 1));
        assert_eq!(second.count(), 0);
        h.dispatcher.stop();
    }

    #[test]
    fn test_reserved_poster_ids_reject_registration() {
        let h = harness();
        let poster = CountingPoster::new(PosterId::Worker);
        let poster: Arc<dyn EventPoster> = poster;
        assert_eq!(
            h.dispatcher.register_poster(&poster),
            Err(DispatcherError::AlreadySubscribed)
        );
    }

    #[test]
    fn test_deregister_unknown_poster() {
        let h = harness();
        assert_eq!(
            h.dispatcher.deregister_poster(PosterId::OscFrontend),
            Err(DispatcherError::UnknownPoster)
        );

        let poster = CountingPoster::new(PosterId::OscFrontend);
        let poster: Arc<dyn EventPoster> = poster;
        h.dispatcher.register_poster(&poster).unwrap();
        assert!(h.dispatcher.deregister_poster(PosterId::OscFrontend).is_ok());
        assert_eq!(
            h.dispatcher.deregister_poster(PosterId::OscFrontend),
            Err(DispatcherError::UnknownPoster)
        );
    }

    #[test]
    fn test_duplicate_subscription_delivers_once() {
        let mut h = harness();
        let listener = CountingPoster::new(PosterId::Controller);
        let poster: Arc<dyn EventPoster> = listener.clone();

        assert!(h
            .dispatcher
            .subscribe_to_parameter_change_notifications(&poster)
            .is_ok());
        assert_eq!(
            h.dispatcher.subscribe_to_parameter_change_notifications(&poster),
            Err(DispatcherError::AlreadySubscribed)
        );

        let status = h.dispatcher.process(Event::parameter_change_notification(
            2,
            4,
            0.7,
            Time::immediate(),
        ));
        assert_eq!(status, EventStatus::HandledOk);
        assert_eq!(listener.count(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_listener() {
        let h = harness();
        let listener = CountingPoster::new(PosterId::Controller);
        let poster: Arc<dyn EventPoster> = listener;
        assert_eq!(
            h.dispatcher.unsubscribe_from_keyboard_events(&poster),
            Err(DispatcherError::UnknownPoster)
        );
    }

    #[test]
    fn test_full_outgoing_queue_falls_back_to_waiting_list() {
        let mut h = harness_with_capacity(1);
        let first = h
            .dispatcher
            .process(Event::parameter_change(0, 0, 0.1, Time::immediate()));
        assert_eq!(first, EventStatus::HandledOk);
        let second = h
            .dispatcher
            .process(Event::parameter_change(0, 1, 0.2, Time::immediate()));
        assert_eq!(second, EventStatus::QueuedHandling);

        // Make room, then let the loop retry from the waiting list.
        assert!(matches!(
            h.rt_out.pop(),
            Some(RtEvent::ParameterChange { parameter_id: 0, .. })
        ));
        h.dispatcher.run();
        let mut retried = None;
        assert!(wait_until(Duration::from_secs(1), || {
            retried = h.rt_out.pop();
            retried.is_some()
        }));
        assert!(matches!(
            retried,
            Some(RtEvent::ParameterChange { parameter_id: 1, .. })
        ));
        h.dispatcher.stop();
    }

    #[test]
    fn test_waiting_list_drains_in_target_time_order() {
        let mut h = harness();
        let base = Time::now();
        let t1 = base + Duration::from_millis(100);
        let t2 = base + Duration::from_millis(200);
        let t3 = base + Duration::from_millis(300);

        // Arbitrary submission order.
        for (time, parameter_id) in [(t2, 2), (t3, 3), (t1, 1)] {
            let status = h
                .dispatcher
                .process(Event::parameter_change(0, parameter_id, 0.0, time));
            assert_eq!(status, EventStatus::QueuedHandling);
        }

        h.dispatcher.run();
        // Advance the simulated clock past t3 in one jump.
        h.rt_in
            .push(RtEvent::Synchronisation {
                sample_offset: 0,
                timestamp: base + Duration::from_millis(400),
            })
            .unwrap();

        let mut order = Vec::new();
        assert!(wait_until(Duration::from_secs(1), || {
            while let Some(RtEvent::ParameterChange { parameter_id, .. }) = h.rt_out.pop() {
                order.push(parameter_id);
            }
            order.len() == 3
        }));
        assert_eq!(order, vec![1, 2, 3]);
        h.dispatcher.stop();
    }

    #[test]
    fn test_async_event_reaches_worker_and_completes() {
        let engine = BypassEngine::new();
        let executed = engine.executed_commands();
        let (_, in_consumer) = rt_event_fifo(8);
        let (out_producer, _out_consumer) = rt_event_fifo(8);
        let mut dispatcher = EventDispatcher::new(
            Box::new(engine),
            SAMPLE_RATE,
            BLOCK_SIZE,
            in_consumer,
            out_producer,
        );

        let (status_tx, status_rx) = mpsc::channel();
        let event = Event::engine_command(EngineCommand::AddChain {
            name: "main".to_string(),
            channels: 2,
        })
        .with_completion(move |status| {
            let _ = status_tx.send(status);
        });

        let status = dispatcher.process(event);
        assert_eq!(status, EventStatus::QueuedHandling);

        dispatcher.run();
        let completion = status_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(completion, EventStatus::HandledOk);
        assert_eq!(executed.lock().unwrap().len(), 1);
        dispatcher.stop();
    }

    #[test]
    fn test_incoming_keyboard_event_reaches_subscribers() {
        let mut h = harness();
        let listener = CountingPoster::new(PosterId::Controller);
        let poster: Arc<dyn EventPoster> = listener.clone();
        h.dispatcher.subscribe_to_keyboard_events(&poster).unwrap();

        h.dispatcher.run();
        h.rt_in
            .push(RtEvent::NoteOn {
                processor_id: 4,
                sample_offset: 12,
                channel: 0,
                note: 64,
                velocity: 0.9,
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(1), || listener.count() == 1));
        h.dispatcher.stop();
    }

    #[test]
    fn test_sync_marker_reanchors_timer() {
        let mut h = harness();
        let future = Time::now() + Duration::from_secs(5);
        let status = h
            .dispatcher
            .process(Event::parameter_change(9, 9, 0.9, future));
        assert_eq!(status, EventStatus::QueuedHandling);

        h.dispatcher.run();
        h.rt_in
            .push(RtEvent::Synchronisation {
                sample_offset: 0,
                timestamp: future + Duration::from_millis(1),
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(1), || {
            matches!(h.rt_out.pop(), Some(RtEvent::ParameterChange { .. }))
        }));
        h.dispatcher.stop();
    }

    #[test]
    fn test_stop_joins_and_is_restartable() {
        let mut h = harness();
        h.dispatcher.run();
        h.dispatcher.stop();

        // The core is back, so the direct path works again.
        let status = h
            .dispatcher
            .process(Event::parameter_change(0, 0, 0.0, Time::immediate()));
        assert_eq!(status, EventStatus::HandledOk);

        h.dispatcher.run();
        h.dispatcher.stop();
    }
}
