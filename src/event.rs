//! Non-real-time events, posters and status codes
//!
//! An [`Event`] is the heap-friendly message that flows through the control
//! plane: parameter and keyboard intents headed for the audio graph, plugin
//! lifecycle commands headed for the worker, and notifications coming back
//! out of the real-time thread. Events are single-owner values; a function
//! that accepts an `Event` by value owns it, and a dispatch step that returns
//! [`EventStatus::QueuedHandling`] has moved that ownership onward.

use std::fmt;

use crate::engine::EngineCommand;
use crate::rt_event::{AsyncWorkCallback, RtEvent, RtStringPtr};
use crate::time::Time;

/// Processor and parameter identifiers inside the audio graph.
pub type ObjectId = u32;

/// Identifier correlating an asynchronous work request with its completion.
pub type WorkId = u32;

/// How an event was (or was not) handled. Returned from dispatch steps and
/// passed to completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Terminally handled.
    HandledOk,
    /// Ownership has moved to another subsystem; results are not available
    /// synchronously and the completion callback will fire later, if at all.
    QueuedHandling,
    /// The receiver id had no registered poster.
    UnrecognizedReceiver,
    /// The payload is not supported by the component it reached.
    UnrecognizedEvent,
    /// The handling action itself failed.
    Error,
}

/// Registration and subscription misuse, reported synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherError {
    AlreadySubscribed,
    UnknownPoster,
}

impl fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherError::AlreadySubscribed => write!(f, "poster is already subscribed"),
            DispatcherError::UnknownPoster => write!(f, "poster is not registered"),
        }
    }
}

impl std::error::Error for DispatcherError {}

/// The closed id space of well-known event receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosterId {
    /// The dispatcher's own receiver path: timer conversion, real-time
    /// delivery and notification broadcast.
    AudioEngine = 0,
    MidiDispatcher = 1,
    OscFrontend = 2,
    /// The worker thread for long-running handling.
    Worker = 3,
    Controller = 4,
}

/// Number of slots in the poster registry.
pub const MAX_POSTERS: usize = 5;

impl PosterId {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A component capable of receiving dispatched events.
///
/// Delivery borrows the event; a poster that needs to act on it later takes
/// its own copy of the payload data. Returning `QueuedHandling` tells the
/// dispatcher not to fire the event's completion callback.
pub trait EventPoster: Send + Sync {
    fn process_event(&self, event: &Event) -> EventStatus;
    fn poster_id(&self) -> PosterId;
}

/// Keyboard intents and notifications, one variant per gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyboardAction {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8, velocity: f32 },
    NoteAftertouch { note: u8, pressure: f32 },
    PitchBend { value: f32 },
    Aftertouch { value: f32 },
    Modulation { value: f32 },
    WrappedMidi { data: [u8; 4] },
}

/// What an event means. The tag is decided once at construction and every
/// dispatch decision keys on it.
#[derive(Debug)]
pub enum EventPayload {
    /// Intent: set a parameter on a processor.
    ParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    },
    /// Intent: set a string-valued property on a processor.
    StringParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: String,
    },
    /// Intent: keyboard gesture for a processor.
    Keyboard {
        processor_id: ObjectId,
        channel: u8,
        action: KeyboardAction,
    },
    /// Plugin lifecycle command, executed by the worker.
    EngineCommand(EngineCommand),
    /// Asynchronous work requested by a processor, executed by the worker.
    AsyncWork {
        processor_id: ObjectId,
        work_id: WorkId,
        callback: AsyncWorkCallback,
    },
    /// Outcome of an [`EventPayload::AsyncWork`] request, delivered back to
    /// the requesting processor as a real-time notification.
    AsyncWorkCompletion {
        processor_id: ObjectId,
        work_id: WorkId,
        status: EventStatus,
    },
    /// Notification: a parameter changed, typically by automation.
    ParameterChangeNotification {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    },
    /// Notification: a keyboard gesture was observed in the graph.
    KeyboardNotification {
        processor_id: ObjectId,
        channel: u8,
        action: KeyboardAction,
    },
    /// Timestamp marker re-anchoring the event timer.
    Synchronisation { timestamp: Time },
}

/// Fired exactly once by whichever component terminally consumes the event.
pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send>;

/// A control-plane message: payload plus target time, receiver id and an
/// optional completion callback.
pub struct Event {
    time: Time,
    receiver: PosterId,
    completion_cb: Option<CompletionCallback>,
    payload: EventPayload,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("time", &self.time)
            .field("receiver", &self.receiver)
            .field("has_completion_cb", &self.completion_cb.is_some())
            .field("payload", &self.payload)
            .finish()
    }
}

impl Event {
    pub fn new(payload: EventPayload, time: Time) -> Self {
        Self {
            time,
            receiver: PosterId::AudioEngine,
            completion_cb: None,
            payload,
        }
    }

    pub fn parameter_change(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::ParameterChange {
                processor_id,
                parameter_id,
                value,
            },
            time,
        )
    }

    pub fn string_parameter_change(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: impl Into<String>,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::StringParameterChange {
                processor_id,
                parameter_id,
                value: value.into(),
            },
            time,
        )
    }

    pub fn keyboard(
        processor_id: ObjectId,
        channel: u8,
        action: KeyboardAction,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::Keyboard {
                processor_id,
                channel,
                action,
            },
            time,
        )
    }

    pub fn note_on(processor_id: ObjectId, channel: u8, note: u8, velocity: f32, time: Time) -> Self {
        Self::keyboard(processor_id, channel, KeyboardAction::NoteOn { note, velocity }, time)
    }

    pub fn note_off(processor_id: ObjectId, channel: u8, note: u8, velocity: f32, time: Time) -> Self {
        Self::keyboard(processor_id, channel, KeyboardAction::NoteOff { note, velocity }, time)
    }

    pub fn engine_command(command: EngineCommand) -> Self {
        Self::new(EventPayload::EngineCommand(command), Time::immediate())
    }

    pub fn async_work(processor_id: ObjectId, work_id: WorkId, callback: AsyncWorkCallback) -> Self {
        Self::new(
            EventPayload::AsyncWork {
                processor_id,
                work_id,
                callback,
            },
            Time::immediate(),
        )
    }

    pub fn async_work_completion(
        processor_id: ObjectId,
        work_id: WorkId,
        status: EventStatus,
    ) -> Self {
        Self::new(
            EventPayload::AsyncWorkCompletion {
                processor_id,
                work_id,
                status,
            },
            Time::immediate(),
        )
    }

    pub fn parameter_change_notification(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::ParameterChangeNotification {
                processor_id,
                parameter_id,
                value,
            },
            time,
        )
    }

    pub fn keyboard_notification(
        processor_id: ObjectId,
        channel: u8,
        action: KeyboardAction,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::KeyboardNotification {
                processor_id,
                channel,
                action,
            },
            time,
        )
    }

    pub fn synchronisation(timestamp: Time) -> Self {
        Self::new(EventPayload::Synchronisation { timestamp }, timestamp)
    }

    /// Attach a completion callback, fired with the terminal status.
    pub fn with_completion(mut self, cb: impl FnOnce(EventStatus) + Send + 'static) -> Self {
        self.completion_cb = Some(Box::new(cb));
        self
    }

    pub fn with_receiver(mut self, receiver: PosterId) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn receiver(&self) -> PosterId {
        self.receiver
    }

    pub fn set_receiver(&mut self, receiver: PosterId) {
        self.receiver = receiver;
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// True for events whose handling may block or take unbounded time.
    /// These are unconditionally routed to the worker.
    pub fn is_async(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::EngineCommand(_) | EventPayload::AsyncWork { .. }
        )
    }

    /// True for events with a fixed-size real-time counterpart.
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::ParameterChange { .. }
                | EventPayload::StringParameterChange { .. }
                | EventPayload::Keyboard { .. }
                | EventPayload::AsyncWorkCompletion { .. }
                | EventPayload::Synchronisation { .. }
        )
    }

    pub fn is_parameter_change_notification(&self) -> bool {
        matches!(self.payload, EventPayload::ParameterChangeNotification { .. })
    }

    pub fn is_keyboard_notification(&self) -> bool {
        matches!(self.payload, EventPayload::KeyboardNotification { .. })
    }

    /// Convert to the real-time representation, scheduled `sample_offset`
    /// samples into the upcoming block. Returns `None` for payloads with no
    /// real-time counterpart. String payloads are copied onto the heap and
    /// leaked into the event; the receiving side reclaims them.
    pub fn to_rt_event(&self, sample_offset: usize) -> Option<RtEvent> {
        match &self.payload {
            EventPayload::ParameterChange {
                processor_id,
                parameter_id,
                value,
            } => Some(RtEvent::ParameterChange {
                processor_id: *processor_id,
                sample_offset,
                parameter_id: *parameter_id,
                value: *value,
            }),
            EventPayload::StringParameterChange {
                processor_id,
                parameter_id,
                value,
            } => Some(RtEvent::StringParameterChange {
                processor_id: *processor_id,
                sample_offset,
                parameter_id: *parameter_id,
                value: RtStringPtr::new(value.clone().into_boxed_str()),
            }),
            EventPayload::Keyboard {
                processor_id,
                channel,
                action,
            } => Some(keyboard_to_rt(*processor_id, sample_offset, *channel, *action)),
            EventPayload::AsyncWorkCompletion {
                processor_id,
                work_id,
                status,
            } => Some(RtEvent::AsyncWorkNotification {
                processor_id: *processor_id,
                sample_offset,
                work_id: *work_id,
                status: *status,
            }),
            EventPayload::Synchronisation { timestamp } => Some(RtEvent::Synchronisation {
                sample_offset,
                timestamp: *timestamp,
            }),
            _ => None,
        }
    }

    /// Reconstitute a timestamped event from its real-time form. Keyboard and
    /// parameter events come back as notifications; synchronisation markers
    /// return `None` because they are consumed by the event timer instead.
    pub fn from_rt_event(rt_event: RtEvent, timestamp: Time) -> Option<Event> {
        match rt_event {
            RtEvent::NoteOn {
                processor_id,
                channel,
                note,
                velocity,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::NoteOn { note, velocity },
                timestamp,
            )),
            RtEvent::NoteOff {
                processor_id,
                channel,
                note,
                velocity,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::NoteOff { note, velocity },
                timestamp,
            )),
            RtEvent::NoteAftertouch {
                processor_id,
                channel,
                note,
                pressure,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::NoteAftertouch { note, pressure },
                timestamp,
            )),
            RtEvent::PitchBend {
                processor_id,
                channel,
                value,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::PitchBend { value },
                timestamp,
            )),
            RtEvent::Aftertouch {
                processor_id,
                channel,
                value,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::Aftertouch { value },
                timestamp,
            )),
            RtEvent::Modulation {
                processor_id,
                channel,
                value,
                ..
            } => Some(Self::keyboard_notification(
                processor_id,
                channel,
                KeyboardAction::Modulation { value },
                timestamp,
            )),
            RtEvent::WrappedMidi {
                processor_id, data, ..
            } => Some(Self::keyboard_notification(
                processor_id,
                0,
                KeyboardAction::WrappedMidi { data },
                timestamp,
            )),
            RtEvent::ParameterChange {
                processor_id,
                parameter_id,
                value,
                ..
            } => Some(Self::parameter_change_notification(
                processor_id,
                parameter_id,
                value,
                timestamp,
            )),
            RtEvent::StringParameterChange {
                processor_id,
                parameter_id,
                value,
                ..
            } => {
                // SAFETY: this side popped the event from the fifo and is the
                // unique receiver of the pointer.
                let value = unsafe { value.take() };
                Some(Self::string_parameter_change(
                    processor_id,
                    parameter_id,
                    String::from(value),
                    timestamp,
                ))
            }
            RtEvent::AsyncWork {
                processor_id,
                work_id,
                callback,
                ..
            } => Some(Self::async_work(processor_id, work_id, callback)),
            RtEvent::AsyncWorkNotification { .. } | RtEvent::Synchronisation { .. } => None,
        }
    }

    /// Fire the completion callback, if any, and consume the event.
    pub fn complete(mut self, status: EventStatus) {
        if let Some(cb) = self.completion_cb.take() {
            cb(status);
        }
    }

    /// Split into payload and completion callback, for executors that need
    /// to consume the payload before reporting the status.
    pub fn into_parts(self) -> (EventPayload, Option<CompletionCallback>) {
        (self.payload, self.completion_cb)
    }
}

fn keyboard_to_rt(
    processor_id: ObjectId,
    sample_offset: usize,
    channel: u8,
    action: KeyboardAction,
) -> RtEvent {
    match action {
        KeyboardAction::NoteOn { note, velocity } => RtEvent::NoteOn {
            processor_id,
            sample_offset,
            channel,
            note,
            velocity,
        },
        KeyboardAction::NoteOff { note, velocity } => RtEvent::NoteOff {
            processor_id,
            sample_offset,
            channel,
            note,
            velocity,
        },
        KeyboardAction::NoteAftertouch { note, pressure } => RtEvent::NoteAftertouch {
            processor_id,
            sample_offset,
            channel,
            note,
            pressure,
        },
        KeyboardAction::PitchBend { value } => RtEvent::PitchBend {
            processor_id,
            sample_offset,
            channel,
            value,
        },
        KeyboardAction::Aftertouch { value } => RtEvent::Aftertouch {
            processor_id,
            sample_offset,
            channel,
            value,
        },
        KeyboardAction::Modulation { value } => RtEvent::Modulation {
            processor_id,
            sample_offset,
            channel,
            value,
        },
        KeyboardAction::WrappedMidi { data } => RtEvent::WrappedMidi {
            processor_id,
            sample_offset,
            data,
        },
    }
}
