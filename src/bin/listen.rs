//! Live microphone demo: capture, classify with the energy stub, print events
//! as JSON lines. Ctrl-C stops the session early.
//!
//! ```text
//! RUST_LOG=harken=debug cargo run --bin listen -- --raw
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use harken::{
    ClassifierHandle, EngineConfig, HarkenEngine, RecognitionEvent, SmootherConfig,
};
use harken::classify::stub::StubClassifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harken=info".parse().unwrap()),
        )
        .init();

    let raw = std::env::args().any(|a| a == "--raw");

    let labels = vec!["silence".to_string(), "sound".to_string()];
    let config = EngineConfig {
        sample_rate: 16_000,
        buffer_size: 2_048,
        audio_length: 16_000,
        num_of_inferences: 10,
        output_raw_scores: raw,
        labels: labels.clone(),
        smoothing: SmootherConfig::default(),
        ..EngineConfig::default()
    };

    let engine = Arc::new(HarkenEngine::new(
        config,
        ClassifierHandle::new(StubClassifier::new(labels.len())),
    ));
    engine.warm_up()?;

    let mut events = engine.subscribe_events();
    engine.start()?;
    info!("listening — press Ctrl-C to stop");

    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.stop();
            }
        });
    }

    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if event == RecognitionEvent::EndOfStream {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "event subscriber lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let snap = engine.diagnostics();
    info!(
        windows = snap.windows_emitted,
        skipped = snap.windows_skipped,
        inferences = snap.inference_calls,
        detections = snap.detections_fired,
        "session finished"
    );
    Ok(())
}
