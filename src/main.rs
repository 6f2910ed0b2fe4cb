//! Patchbay CLI - run the host with a demo chain

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patchbay::{
    BypassEngine, ControlFrontend, EngineCommand, Event, EventDispatcher, EventPoster,
    EventStatus, GainProcessor, OfflineFrontend, PosterId, RealtimeFrontend, rt_event_fifo,
    DEFAULT_FIFO_CAPACITY,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(about = "Real-time audio plugin host", long_about = None)]
struct Cli {
    /// Sample rate in Hz (ignored with --realtime, the device decides)
    #[arg(short, long, default_value = "48000")]
    sample_rate: f32,

    /// Block size in samples
    #[arg(short, long, default_value = "64")]
    block_size: usize,

    /// Number of blocks to render in offline mode
    #[arg(long, default_value = "512")]
    blocks: u64,

    /// Play through the default audio device instead of rendering offline
    #[arg(long)]
    realtime: bool,
}

/// Logs every notification the dispatcher broadcasts.
struct NotificationLogger;

impl EventPoster for NotificationLogger {
    fn process_event(&self, event: &Event) -> EventStatus {
        info!("notification: {:?}", event.payload());
        EventStatus::HandledOk
    }

    fn poster_id(&self) -> PosterId {
        PosterId::Controller
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let (in_producer, in_consumer) = rt_event_fifo(DEFAULT_FIFO_CAPACITY);
    let (out_producer, out_consumer) = rt_event_fifo(DEFAULT_FIFO_CAPACITY);

    let mut dispatcher = EventDispatcher::new(
        Box::new(BypassEngine::new()),
        cli.sample_rate,
        cli.block_size,
        in_consumer,
        out_producer,
    );

    let logger: Arc<dyn EventPoster> = Arc::new(NotificationLogger);
    dispatcher.subscribe_to_parameter_change_notifications(&logger)?;
    dispatcher.subscribe_to_keyboard_events(&logger)?;

    let frontend = ControlFrontend::new(dispatcher.event_sender());
    dispatcher.run();

    frontend.send_engine_command(EngineCommand::AddChain {
        name: "main".to_string(),
        channels: 2,
    });
    frontend.send_note_on(1, 0, 69, 0.8);
    frontend.send_parameter_change(1, 0, 0.5);
    frontend.send_string_parameter_change(1, 1, "demo voice");

    let processor = GainProcessor::new(1, cli.sample_rate);
    if cli.realtime {
        let audio = RealtimeFrontend::start(processor, out_consumer, in_producer)?;
        info!("playing at {} Hz, ctrl-c to quit", audio.sample_rate());
        loop {
            std::thread::sleep(Duration::from_secs(1));
        }
    } else {
        let mut audio = OfflineFrontend::new(
            processor,
            out_consumer,
            in_producer,
            cli.sample_rate,
            cli.block_size,
        );
        // Pump in small batches so the dispatcher loop interleaves with the
        // block protocol the way a soundcard callback would.
        for _ in 0..cli.blocks {
            audio.run(1);
            std::thread::sleep(Duration::from_millis(1));
        }
        info!("rendered {} blocks", cli.blocks);
    }

    dispatcher.stop();
    Ok(())
}
