//! Broadcast session example.
//!
//! Publishes a raw PCM file to a local archive and to an in-process channel
//! at the same time. The channel stands in for a live consumer such as a
//! level meter or a streaming-server publisher.
//!
//! Run with: cargo run --example broadcast [input.raw]
//!
//! Without an argument a ten-second 440 Hz tone is generated first.

use std::sync::Arc;
use std::time::Duration;

use broadcast_audio::format::{f32_to_i16, i16_to_le_bytes};
use broadcast_audio::{
    event_callback, AudioChunk, AudioFormat, ChannelSink, ConcurrentConfig, ConcurrentConnector,
    ConnectorEvent, FileSink, FileSource, Session, SessionConfig,
};
use tokio::sync::mpsc;

/// Writes a mono 16-bit tone in `format` to `path`.
fn write_tone(path: &str, format: AudioFormat, seconds: u32) -> std::io::Result<()> {
    let frames = format.sample_rate * seconds;
    let samples: Vec<i16> = (0..frames)
        .map(|i| {
            let t = f64::from(i) / f64::from(format.sample_rate);
            f32_to_i16((t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.5)
        })
        .collect();
    std::fs::write(path, i16_to_le_bytes(&samples))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let format = AudioFormat::new(16_000, 16, 1);
    let input = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            write_tone("broadcast_tone.raw", format, 10)?;
            "broadcast_tone.raw".to_string()
        }
    };

    let (tx, mut rx) = mpsc::channel::<AudioChunk>(64);

    let config = ConcurrentConfig::for_format(format, Duration::from_secs(2), 3200);
    let mut connector = ConcurrentConnector::new(Arc::new(FileSource::new(&input)), config)
        .with_event_callback(event_callback(|event| match event {
            ConnectorEvent::SinkError { sink_name, error } => {
                eprintln!("Sink '{sink_name}' error: {error}");
            }
            ConnectorEvent::SinkDetached { sink_name, remaining } => {
                eprintln!("Sink '{sink_name}' dropped, {remaining} left");
            }
            ConnectorEvent::QueueOverflow { sink_name } => {
                eprintln!("Sink '{sink_name}' fell behind");
            }
            _ => {}
        }));
    connector.attach(Arc::new(FileSink::new("broadcast_archive.raw")));
    connector.attach(Arc::new(ChannelSink::with_name("meter", tx)));

    // Peak level per chunk, like a VU meter
    let meter = tokio::spawn(async move {
        let mut chunks = 0u64;
        while let Some(chunk) = rx.recv().await {
            chunks += 1;
            if chunks % 10 == 0 {
                let peak = chunk
                    .as_bytes()
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
                    .max()
                    .unwrap_or(0);
                println!("chunk {chunks}: peak {peak}");
            }
        }
        chunks
    });

    println!("Broadcasting {input}...");
    let session = Session::new(SessionConfig {
        chunk_size: 3200,
        ..SessionConfig::timed(format, Duration::ZERO)
    });
    let stats = session.run(&mut connector).await?;

    // Dropping the connector releases the channel sender
    drop(connector);
    let chunks = meter.await?;

    println!(
        "\nDone: {} bytes in {:.2}s, {} sinks left, {} chunks metered",
        stats.bytes_transferred,
        stats.elapsed.as_secs_f64(),
        stats.sinks_remaining,
        chunks
    );
    println!("Archive saved to broadcast_archive.raw");

    Ok(())
}
