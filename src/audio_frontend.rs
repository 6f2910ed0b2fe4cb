//! Audio frontends: the real-time side of the bridge
//!
//! A frontend owns the audio-callback halves of the two event fifos and runs
//! the per-block protocol: announce the next block boundary with a
//! synchronisation marker, pop every due outgoing event into the processor,
//! render one chunk, then push whatever the processor wants to send upstream.
//! [`OfflineFrontend`] runs that pump from plain function calls for tests and
//! offline rendering; [`RealtimeFrontend`] runs it inside a cpal output
//! callback.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use crate::engine::RtProcessor;
use crate::event::ObjectId;
use crate::rt_event::RtEvent;
use crate::rt_fifo::{RtEventConsumer, RtEventProducer};
use crate::time::Time;

/// How often the frontend re-anchors the event timer, in blocks.
pub const SYNC_INTERVAL_BLOCKS: u64 = 8;

/// Largest callback block the realtime frontend renders in one pass.
const MAX_CALLBACK_FRAMES: usize = 4096;

/// Drives a processor block by block without a soundcard.
pub struct OfflineFrontend<P: RtProcessor> {
    processor: P,
    out_rt_queue: RtEventConsumer,
    in_rt_queue: RtEventProducer,
    sample_rate: f32,
    block_size: usize,
    blocks_processed: u64,
}

impl<P: RtProcessor> OfflineFrontend<P> {
    pub fn new(
        processor: P,
        out_rt_queue: RtEventConsumer,
        in_rt_queue: RtEventProducer,
        sample_rate: f32,
        block_size: usize,
    ) -> Self {
        Self {
            processor,
            out_rt_queue,
            in_rt_queue,
            sample_rate,
            block_size,
            blocks_processed: 0,
        }
    }

    /// Run the block protocol once, rendering into `output`.
    pub fn process_block(&mut self, output: &mut [f32]) {
        debug_assert_eq!(output.len(), self.block_size);
        if self.blocks_processed % SYNC_INTERVAL_BLOCKS == 0 {
            let block_duration =
                Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64);
            let marker = RtEvent::Synchronisation {
                sample_offset: 0,
                timestamp: Time::now() + block_duration,
            };
            if self.in_rt_queue.push(marker).is_err() {
                warn!("incoming event queue is full, skipping synchronisation marker");
            }
        }
        while let Some(rt_event) = self.out_rt_queue.pop() {
            self.processor.process_rt_event(rt_event);
        }
        self.processor.process_chunk(output);
        while let Some(rt_event) = self.processor.poll_rt_event() {
            if self.in_rt_queue.push(rt_event).is_err() {
                warn!("incoming event queue is full, dropping processor event");
                rt_event.reclaim();
            }
        }
        self.blocks_processed += 1;
    }

    /// Render `blocks` consecutive blocks, reusing one scratch buffer.
    pub fn run(&mut self, blocks: u64) {
        let mut buffer = vec![0.0f32; self.block_size];
        for _ in 0..blocks {
            self.process_block(&mut buffer);
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }
}

/// The same block pump inside a cpal output stream. Only the queue
/// operations and the processor run inside the callback.
pub struct RealtimeFrontend {
    _stream: cpal::Stream,
    sample_rate: u32,
}

impl RealtimeFrontend {
    pub fn start<P: RtProcessor + 'static>(
        processor: P,
        out_rt_queue: RtEventConsumer,
        in_rt_queue: RtEventProducer,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no audio output device found")?;
        info!("audio device: {}", device.name()?);
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32, P>(
                &device,
                &config.into(),
                processor,
                out_rt_queue,
                in_rt_queue,
                channels,
            ),
            cpal::SampleFormat::I16 => Self::build_stream::<i16, P>(
                &device,
                &config.into(),
                processor,
                out_rt_queue,
                in_rt_queue,
                channels,
            ),
            cpal::SampleFormat::U16 => Self::build_stream::<u16, P>(
                &device,
                &config.into(),
                processor,
                out_rt_queue,
                in_rt_queue,
                channels,
            ),
            _ => return Err("unsupported sample format".into()),
        }?;

        stream.play()?;
        info!("audio stream started at {} Hz", sample_rate);
        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn build_stream<T, P>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut processor: P,
        mut out_rt_queue: RtEventConsumer,
        mut in_rt_queue: RtEventProducer,
        channels: usize,
    ) -> Result<cpal::Stream, Box<dyn std::error::Error>>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
        P: RtProcessor + 'static,
    {
        let sample_rate = config.sample_rate.0 as f64;
        // Callback-resident scratch block, allocated once up front.
        let mut block = vec![0.0f32; MAX_CALLBACK_FRAMES];
        let mut blocks_processed: u64 = 0;

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                let output = &mut block[..frames.min(MAX_CALLBACK_FRAMES)];

                if blocks_processed % SYNC_INTERVAL_BLOCKS == 0 {
                    let block_duration = Duration::from_secs_f64(frames as f64 / sample_rate);
                    let _ = in_rt_queue.push(RtEvent::Synchronisation {
                        sample_offset: 0,
                        timestamp: Time::now() + block_duration,
                    });
                }
                while let Some(rt_event) = out_rt_queue.pop() {
                    processor.process_rt_event(rt_event);
                }
                processor.process_chunk(output);
                while let Some(rt_event) = processor.poll_rt_event() {
                    if in_rt_queue.push(rt_event).is_err() {
                        rt_event.reclaim();
                    }
                }
                blocks_processed += 1;

                let rendered = output.len();
                for (frame, value) in data.chunks_mut(channels).zip(output.iter()) {
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(*value);
                    }
                }
                for frame in data.chunks_mut(channels).skip(rendered) {
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(0.0);
                    }
                }
            },
            |err| warn!("audio stream error: {}", err),
            None,
        )?;
        Ok(stream)
    }
}

/// Minimal single-voice processor used by the demo binary and the tests: a
/// sine voice with one gain parameter and one string-valued label property.
/// Every applied gain change is reported back upstream as a parameter change
/// notification.
pub struct GainProcessor {
    processor_id: ObjectId,
    gain: f32,
    label: Box<str>,
    phase: f32,
    phase_increment: f32,
    a4_increment: f32,
    pending: Vec<RtEvent>,
}

/// Parameter id of the gain value.
pub const GAIN_PARAMETER_ID: ObjectId = 0;

/// Parameter id of the label property.
pub const LABEL_PARAMETER_ID: ObjectId = 1;

impl GainProcessor {
    pub fn new(processor_id: ObjectId, sample_rate: f32) -> Self {
        let a4_increment = 440.0 / sample_rate;
        Self {
            processor_id,
            gain: 1.0,
            label: "gain".into(),
            phase: 0.0,
            phase_increment: a4_increment,
            a4_increment,
            pending: Vec::with_capacity(16),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl RtProcessor for GainProcessor {
    fn process_rt_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::ParameterChange {
                processor_id,
                parameter_id,
                value,
                ..
            } if processor_id == self.processor_id && parameter_id == GAIN_PARAMETER_ID => {
                self.gain = value;
                if self.pending.len() < self.pending.capacity() {
                    self.pending.push(RtEvent::ParameterChange {
                        processor_id: self.processor_id,
                        sample_offset: 0,
                        parameter_id: GAIN_PARAMETER_ID,
                        value,
                    });
                }
            }
            RtEvent::StringParameterChange {
                processor_id,
                parameter_id,
                value,
                ..
            } if processor_id == self.processor_id && parameter_id == LABEL_PARAMETER_ID => {
                // SAFETY: the event was popped from the outgoing fifo and
                // this processor is its unique receiver.
                self.label = unsafe { value.take() };
            }
            RtEvent::NoteOn { note, .. } => {
                self.phase_increment = self.a4_increment * ((note as f32 - 69.0) / 12.0).exp2();
            }
            RtEvent::NoteOff { .. } => {
                self.phase = 0.0;
            }
            other => other.reclaim(),
        }
    }

    fn process_chunk(&mut self, output: &mut [f32]) {
        for sample in output.iter_mut() {
            *sample = (self.phase * std::f32::consts::TAU).sin() * self.gain;
            self.phase += self.phase_increment;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn poll_rt_event(&mut self) -> Option<RtEvent> {
        self.pending.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt_fifo::rt_event_fifo;

    #[test]
    fn test_offline_frontend_pumps_events_and_audio() {
        let (mut out_producer, out_consumer) = rt_event_fifo(16);
        let (in_producer, mut in_consumer) = rt_event_fifo(16);
        let processor = GainProcessor::new(1, 48_000.0);
        let mut frontend =
            OfflineFrontend::new(processor, out_consumer, in_producer, 48_000.0, 64);

        out_producer
            .push(RtEvent::ParameterChange {
                processor_id: 1,
                sample_offset: 0,
                parameter_id: GAIN_PARAMETER_ID,
                value: 0.5,
            })
            .unwrap();

        let mut buffer = vec![0.0f32; 64];
        frontend.process_block(&mut buffer);
        assert!((frontend.processor().gain() - 0.5).abs() < f32::EPSILON);

        // The first block announces the boundary, then reports the applied
        // gain change upstream.
        assert!(matches!(
            in_consumer.pop(),
            Some(RtEvent::Synchronisation { .. })
        ));
        assert!(matches!(
            in_consumer.pop(),
            Some(RtEvent::ParameterChange { value, .. }) if (value - 0.5).abs() < f32::EPSILON
        ));
    }

    #[test]
    fn test_sync_marker_interval() {
        let (_out_producer, out_consumer) = rt_event_fifo(16);
        let (in_producer, mut in_consumer) = rt_event_fifo(64);
        let processor = GainProcessor::new(1, 48_000.0);
        let mut frontend =
            OfflineFrontend::new(processor, out_consumer, in_producer, 48_000.0, 32);

        frontend.run(SYNC_INTERVAL_BLOCKS * 2);
        let mut markers = 0;
        while let Some(event) = in_consumer.pop() {
            if matches!(event, RtEvent::Synchronisation { .. }) {
                markers += 1;
            }
        }
        assert_eq!(markers, 2);
    }

    #[test]
    fn test_gain_processor_consumes_string_parameter() {
        let mut processor = GainProcessor::new(3, 48_000.0);
        processor.process_rt_event(RtEvent::StringParameterChange {
            processor_id: 3,
            sample_offset: 0,
            parameter_id: LABEL_PARAMETER_ID,
            value: crate::rt_event::RtStringPtr::new("wet mix".into()),
        });
        assert_eq!(processor.label(), "wet mix");
    }

    #[test]
    fn test_gain_processor_renders_scaled_audio() {
        let mut processor = GainProcessor::new(1, 48_000.0);
        processor.process_rt_event(RtEvent::ParameterChange {
            processor_id: 1,
            sample_offset: 0,
            parameter_id: GAIN_PARAMETER_ID,
            value: 0.0,
        });
        let mut buffer = vec![1.0f32; 64];
        processor.process_chunk(&mut buffer);
        assert!(buffer.iter().all(|sample| *sample == 0.0));
    }
}
