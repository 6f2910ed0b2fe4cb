//! Fixed-size events for the real-time thread
//!
//! An [`RtEvent`] is the compact counterpart of [`Event`](crate::event::Event):
//! a tagged union of primitive fields that is `Copy`, has a fixed size, and
//! can be constructed and consumed inside the audio callback. RtEvents travel
//! through the lock-free fifos in both directions and never own heap memory,
//! with one explicit exception: [`RtStringPtr`], a leaked string whose
//! lifetime is the receiver's responsibility.

use crate::event::{EventStatus, ObjectId, WorkId};
use crate::time::Time;

/// Callback executed by the worker thread on behalf of a processor that
/// requested asynchronous work from the real-time context. Plain function
/// pointer so the requesting event stays `Copy`.
pub type AsyncWorkCallback = fn(processor_id: ObjectId, work_id: WorkId) -> EventStatus;

/// Raw pointer hand-off for bulk string payloads.
///
/// Created by leaking a `Box<str>`; the receiving side reclaims it with
/// [`take`](RtStringPtr::take). Exactly one receiver must call `take` exactly
/// once, which holds on both fifo directions because the fifos are
/// single-consumer and popped events are consumed in place.
#[derive(Debug, Clone, Copy)]
pub struct RtStringPtr {
    ptr: *mut str,
}

// SAFETY: the pointer is uniquely owned from `new` until `take`; it is only
// ever dereferenced by the single thread that pops it from a fifo.
unsafe impl Send for RtStringPtr {}

impl RtStringPtr {
    pub fn new(value: Box<str>) -> Self {
        Self {
            ptr: Box::into_raw(value),
        }
    }

    /// Reclaim the leaked string.
    ///
    /// # Safety
    ///
    /// The caller must be the unique receiver of this pointer and must call
    /// this at most once across all copies of the containing event.
    pub unsafe fn take(self) -> Box<str> {
        // SAFETY: per the contract above, `ptr` still owns the allocation
        // made in `new` and nobody else will reclaim it.
        unsafe { Box::from_raw(self.ptr) }
    }
}

/// Real-time safe event representation.
///
/// `sample_offset` is the position within the upcoming audio block where the
/// event takes effect (outgoing direction), or the position within the block
/// just processed where it occurred (incoming direction).
#[derive(Debug, Clone, Copy)]
pub enum RtEvent {
    NoteOn {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteOff {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteAftertouch {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        note: u8,
        pressure: f32,
    },
    PitchBend {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        value: f32,
    },
    Aftertouch {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        value: f32,
    },
    Modulation {
        processor_id: ObjectId,
        sample_offset: usize,
        channel: u8,
        value: f32,
    },
    /// Raw MIDI bytes wrapped for a processor that decodes them itself.
    WrappedMidi {
        processor_id: ObjectId,
        sample_offset: usize,
        data: [u8; 4],
    },
    ParameterChange {
        processor_id: ObjectId,
        sample_offset: usize,
        parameter_id: ObjectId,
        value: f32,
    },
    StringParameterChange {
        processor_id: ObjectId,
        sample_offset: usize,
        parameter_id: ObjectId,
        value: RtStringPtr,
    },
    /// A processor asks for work to be done off the real-time thread.
    AsyncWork {
        processor_id: ObjectId,
        sample_offset: usize,
        work_id: WorkId,
        callback: AsyncWorkCallback,
    },
    /// Completion notice for a previous [`RtEvent::AsyncWork`] request.
    AsyncWorkNotification {
        processor_id: ObjectId,
        sample_offset: usize,
        work_id: WorkId,
        status: EventStatus,
    },
    /// Re-anchors the event timer's wall-clock/sample-count correlation.
    /// Carries the wall-clock time of the next block boundary.
    Synchronisation { sample_offset: usize, timestamp: Time },
}

impl RtEvent {
    /// Target (or originating) processor, if the event addresses one.
    pub fn processor_id(&self) -> Option<ObjectId> {
        match self {
            RtEvent::NoteOn { processor_id, .. }
            | RtEvent::NoteOff { processor_id, .. }
            | RtEvent::NoteAftertouch { processor_id, .. }
            | RtEvent::PitchBend { processor_id, .. }
            | RtEvent::Aftertouch { processor_id, .. }
            | RtEvent::Modulation { processor_id, .. }
            | RtEvent::WrappedMidi { processor_id, .. }
            | RtEvent::ParameterChange { processor_id, .. }
            | RtEvent::StringParameterChange { processor_id, .. }
            | RtEvent::AsyncWork { processor_id, .. }
            | RtEvent::AsyncWorkNotification { processor_id, .. } => Some(*processor_id),
            RtEvent::Synchronisation { .. } => None,
        }
    }

    pub fn sample_offset(&self) -> usize {
        match self {
            RtEvent::NoteOn { sample_offset, .. }
            | RtEvent::NoteOff { sample_offset, .. }
            | RtEvent::NoteAftertouch { sample_offset, .. }
            | RtEvent::PitchBend { sample_offset, .. }
            | RtEvent::Aftertouch { sample_offset, .. }
            | RtEvent::Modulation { sample_offset, .. }
            | RtEvent::WrappedMidi { sample_offset, .. }
            | RtEvent::ParameterChange { sample_offset, .. }
            | RtEvent::StringParameterChange { sample_offset, .. }
            | RtEvent::AsyncWork { sample_offset, .. }
            | RtEvent::AsyncWorkNotification { sample_offset, .. }
            | RtEvent::Synchronisation { sample_offset, .. } => *sample_offset,
        }
    }

    /// Release any heap payload of an event that never reached its receiver,
    /// for example when the outgoing fifo rejected the push.
    pub fn reclaim(self) {
        if let RtEvent::StringParameterChange { value, .. } = self {
            // SAFETY: the event was never handed to a consumer, so this side
            // still uniquely owns the pointer.
            drop(unsafe { value.take() });
        }
    }
}
