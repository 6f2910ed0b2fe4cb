//! # Patchbay - Real-time Audio Plugin Host Bridge
//!
//! Patchbay hosts audio-processing plugins and routes audio through
//! processing chains. This crate is the core of that host: the event dispatch
//! bridge that lets non-real-time producers (control surfaces, scripts,
//! network frontends) safely influence the real-time audio graph, and lets
//! the graph notify the rest of the system, without the audio thread ever
//! blocking, allocating unpredictably, or taking a contested lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Control plane: frontends, scripts, worker follow-ups        │
//! │  post_event(Event)                                           │
//! └──────────────────────────────────────────────────────────────┘
//!                 │ unbounded inbound queue
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  EventDispatcher loop (periodic)                             │
//! │  waiting list ── EventTimer ── poster registry / subscribers │
//! └──────────────────────────────────────────────────────────────┘
//!        │ outgoing RtEvent fifo        ▲ incoming RtEvent fifo
//!        ▼                              │
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Audio callback: pop, process block, push notifications      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Long-running handling (plugin loading, asynchronous plugin work) is
//! diverted to the worker thread so it can block without corrupting dispatch
//! timing.
//!
//! ## Quick start
//!
//! ```rust
//! use patchbay::{
//!     BypassEngine, Event, EventDispatcher, EventStatus, Time,
//!     rt_event_fifo, DEFAULT_FIFO_CAPACITY,
//! };
//!
//! let (in_producer, in_consumer) = rt_event_fifo(DEFAULT_FIFO_CAPACITY);
//! let (out_producer, mut out_consumer) = rt_event_fifo(DEFAULT_FIFO_CAPACITY);
//! let mut dispatcher = EventDispatcher::new(
//!     Box::new(BypassEngine::new()),
//!     48_000.0,
//!     64,
//!     in_consumer,
//!     out_producer,
//! );
//!
//! // A parameter change targeted at "now" goes straight to the audio side.
//! let status = dispatcher.process(Event::parameter_change(3, 7, 0.5, Time::immediate()));
//! assert_eq!(status, EventStatus::HandledOk);
//! assert!(out_consumer.pop().is_some());
//! # drop(in_producer);
//! ```

pub mod audio_frontend;
pub mod control_frontend;
pub mod engine;
pub mod event;
pub mod event_dispatcher;
pub mod event_timer;
pub mod rt_event;
pub mod rt_fifo;
pub mod time;

pub use audio_frontend::{GainProcessor, OfflineFrontend, RealtimeFrontend};
pub use control_frontend::ControlFrontend;
pub use engine::{BypassEngine, EngineCommand, EngineController, RtProcessor};
pub use event::{
    DispatcherError, Event, EventPayload, EventPoster, EventStatus, KeyboardAction, ObjectId,
    PosterId, WorkId, MAX_POSTERS,
};
pub use event_dispatcher::{EventDispatcher, EventSender, Worker};
pub use event_timer::EventTimer;
pub use rt_event::{AsyncWorkCallback, RtEvent, RtStringPtr};
pub use rt_fifo::{rt_event_fifo, RtEventConsumer, RtEventProducer, DEFAULT_FIFO_CAPACITY};
pub use time::Time;

/// Default block size used by the frontends, in samples per chunk.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;
