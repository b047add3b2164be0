use anyhow::{Context, Result, anyhow};
use clap::{Arg, Command};
use framepump::assets::{DEFAULT_FRAME_RATE, FRAME_HEIGHT, FRAME_WIDTH, MAX_FRAME_RATE};
use framepump::capture::{Pattern, PatternSource};
use framepump::config::{PumpConfig, app_name, app_version};
use framepump::pipeline::{PixelFormat, PumpEvent, VideoFormat};
use framepump::sender::{RawVideoSender, StreamEvent, StreamKind};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("fps")
                .short('f')
                .long("fps")
                .value_name("FPS")
                .help("Frame rate declared by the first frame sender.")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("pixel-format")
                .short('p')
                .long("pixel-format")
                .value_name("FORMAT")
                .help("One of rgba, bgrx, nv12, i420.")
                .default_value("nv12"),
        )
        .arg(
            Arg::new("kind")
                .short('k')
                .long("kind")
                .value_name("KIND")
                .help("Outgoing stream kind (screen/virtual).")
                .default_value("virtual"),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration-ms")
                .value_name("MILLIS")
                .help("How long to send, split in two halves at different rates.")
                .value_parser(clap::value_parser!(u64))
                .default_value("4000"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("JSON pump configuration.")
                .required(false),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => PumpConfig::load(path)?,
        None => PumpConfig::default(),
    };
    let fps = matches.get_one::<u32>("fps").copied().unwrap_or(DEFAULT_FRAME_RATE);
    let width = matches.get_one::<u32>("width").copied().unwrap_or(FRAME_WIDTH);
    let height = matches.get_one::<u32>("height").copied().unwrap_or(FRAME_HEIGHT);
    let duration = *matches.get_one::<u64>("duration").context("missing duration")?;
    let pixel_format: PixelFormat = matches
        .get_one::<String>("pixel-format")
        .context("missing pixel format")?
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let kind: StreamKind = matches
        .get_one::<String>("kind")
        .context("missing stream kind")?
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        ctrlc_cancel.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let format = VideoFormat::new(width, height, fps, pixel_format);
    let source = Arc::new(PatternSource::new(Pattern::MovingBar, vec![format]));

    let (events_tx, mut events_rx) = mpsc::channel(config.event_capacity);
    let events_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                PumpEvent::SendFailed { sequence, error } => {
                    debug!("Frame {} not sent: {}", sequence, error)
                }
                event => info!("Pump event: {:?}", event),
            }
        }
    });

    let (sender, mut frames) = RawVideoSender::with_events(source, kind, config, events_tx);
    let sender = Arc::new(sender);

    // stands in for the transport draining the outgoing stream
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        let mut bytes = 0u64;
        while let Some(frame) = frames.recv().await {
            received += 1;
            bytes += frame.size() as u64;
            debug!("Transport: {:?}", frame);
        }
        (received, bytes)
    });

    let (stream_tx, stream_rx) = mpsc::channel(8);
    let listener = sender.spawn_event_listener(stream_rx, cancel.clone());
    let stream = Arc::clone(sender.stream());

    stream_tx
        .send(StreamEvent::SenderChanged(Some(stream.frame_sender(format))))
        .await?;
    sender.start_sending().await?;
    info!("Sending {} as {}", format, kind);

    let half = Duration::from_millis(duration / 2);
    if !sleep_or_cancel(half, &cancel).await {
        let faster = format.with_fps(fps.saturating_mul(2).min(MAX_FRAME_RATE));
        info!("Host switched the frame sender to {}", faster);
        stream_tx
            .send(StreamEvent::SenderChanged(Some(stream.frame_sender(faster))))
            .await?;
        sleep_or_cancel(half, &cancel).await;
    }

    if let Err(e) = stream_tx.send(StreamEvent::SenderChanged(None)).await {
        warn!("Event listener already gone: {}", e);
    }
    drop(stream_tx);
    if let Err(e) = listener.await {
        warn!("Event listener failed: {}", e);
    }
    sender.stop_sending().await;

    let health = sender.pump().health();
    info!("{}", health.summary());

    // the frame queue closes once the last handle on the stream is gone
    drop(sender);
    drop(stream);

    match consumer.await {
        Ok((received, bytes)) => info!("Transport received {} frames, {} bytes", received, bytes),
        Err(e) => warn!("Transport task failed: {}", e),
    }
    if let Err(e) = events_task.await {
        warn!("Event task failed: {}", e);
    }

    Ok(())
}

/// Returns true when `cancel` fired before `duration` elapsed
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
