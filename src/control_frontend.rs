//! Construction helpers for control-plane callers
//!
//! Protocol servers, scripting bridges and UI surfaces all talk to the host
//! the same way: build an [`Event`] and post it. `ControlFrontend` wraps an
//! [`EventSender`] with helpers for the common intents so frontends do not
//! assemble payloads by hand.

use tracing::debug;

use crate::engine::EngineCommand;
use crate::event::{Event, KeyboardAction, ObjectId};
use crate::event_dispatcher::EventSender;
use crate::time::Time;

pub struct ControlFrontend {
    sender: EventSender,
}

impl ControlFrontend {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    /// Post a raw event, for callers that build their own payloads.
    pub fn post_event(&self, event: Event) {
        self.sender.post(event);
    }

    pub fn send_parameter_change(&self, processor: ObjectId, parameter: ObjectId, value: f32) {
        self.send_parameter_change_at(processor, parameter, value, Time::immediate());
    }

    /// Schedule a parameter change for a specific future time.
    pub fn send_parameter_change_at(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        value: f32,
        time: Time,
    ) {
        debug!(
            "parameter change: processor {} parameter {} -> {}",
            processor, parameter, value
        );
        self.sender
            .post(Event::parameter_change(processor, parameter, value, time));
    }

    pub fn send_string_parameter_change(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        value: impl Into<String>,
    ) {
        self.sender.post(Event::string_parameter_change(
            processor,
            parameter,
            value,
            Time::immediate(),
        ));
    }

    pub fn send_note_on(&self, processor: ObjectId, channel: u8, note: u8, velocity: f32) {
        self.sender.post(Event::note_on(
            processor,
            channel,
            note,
            velocity,
            Time::immediate(),
        ));
    }

    pub fn send_note_off(&self, processor: ObjectId, channel: u8, note: u8, velocity: f32) {
        self.sender.post(Event::note_off(
            processor,
            channel,
            note,
            velocity,
            Time::immediate(),
        ));
    }

    pub fn send_keyboard_event(&self, processor: ObjectId, channel: u8, action: KeyboardAction) {
        self.sender
            .post(Event::keyboard(processor, channel, action, Time::immediate()));
    }

    /// Post a plugin lifecycle command for the worker to execute.
    pub fn send_engine_command(&self, command: EngineCommand) {
        debug!("engine command: {:?}", command);
        self.sender.post(Event::engine_command(command));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BypassEngine;
    use crate::event::PosterId;
    use crate::event_dispatcher::EventDispatcher;
    use crate::rt_event::RtEvent;
    use crate::rt_fifo::rt_event_fifo;
    use std::time::{Duration, Instant};

    #[test]
    fn test_helpers_reach_the_outgoing_queue() {
        let (_in_producer, in_consumer) = rt_event_fifo(16);
        let (out_producer, mut out_consumer) = rt_event_fifo(16);
        let mut dispatcher = EventDispatcher::new(
            Box::new(BypassEngine::new()),
            48_000.0,
            64,
            in_consumer,
            out_producer,
        );
        let frontend = ControlFrontend::new(dispatcher.event_sender());

        dispatcher.run();
        frontend.send_note_on(2, 0, 60, 0.75);
        frontend.send_parameter_change(2, 5, 0.25);

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut seen = Vec::new();
        while Instant::now() < deadline && seen.len() < 2 {
            if let Some(event) = out_consumer.pop() {
                seen.push(event);
            } else {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        dispatcher.stop();

        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[0],
            RtEvent::NoteOn {
                processor_id: 2,
                note: 60,
                ..
            }
        ));
        assert!(matches!(
            seen[1],
            RtEvent::ParameterChange {
                processor_id: 2,
                parameter_id: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_engine_command_is_asynchronous() {
        // Worker ownership is part of the event contract, not the helper,
        // but the helper must produce an async-flagged event.
        let event = Event::engine_command(EngineCommand::DeleteChain {
            name: "aux".to_string(),
        });
        assert!(event.is_async());
        assert_eq!(event.receiver(), PosterId::AudioEngine);
    }
}
