//! Lock-free fifos between the audio thread and the dispatcher
//!
//! Bounded single-producer single-consumer ring buffers carrying [`RtEvent`]s
//! in both directions. Push and pop are wait-free and never allocate after
//! construction, so both operations are safe inside the audio callback. The
//! two halves are separate capabilities: the dispatcher holds the producer of
//! the outgoing queue and the consumer of the incoming one, the audio
//! frontend holds the opposite halves.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::rt_event::RtEvent;

/// Default capacity of each direction's queue, in events.
pub const DEFAULT_FIFO_CAPACITY: usize = 512;

/// Create a connected producer/consumer pair with room for `capacity` events.
pub fn rt_event_fifo(capacity: usize) -> (RtEventProducer, RtEventConsumer) {
    let (producer, consumer) = HeapRb::<RtEvent>::new(capacity).split();
    (
        RtEventProducer { inner: producer },
        RtEventConsumer { inner: consumer },
    )
}

/// Writing half of an event fifo.
pub struct RtEventProducer {
    inner: HeapProd<RtEvent>,
}

impl RtEventProducer {
    /// Wait-free push. A full queue rejects the event and hands it back so
    /// the caller can retry later or reclaim its payload.
    pub fn push(&mut self, event: RtEvent) -> Result<(), RtEvent> {
        self.inner.try_push(event)
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

/// Reading half of an event fifo.
pub struct RtEventConsumer {
    inner: HeapCons<RtEvent>,
}

impl RtEventConsumer {
    /// Wait-free pop.
    pub fn pop(&mut self) -> Option<RtEvent> {
        self.inner.try_pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }
}
