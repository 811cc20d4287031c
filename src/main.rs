use log::{debug, error, info, warn};
use serde_json::Value;
use service::config::{Config, PayloadFormat, ReconnectSetting};
use service::logging::Logger;
use sse::{
    EventSource, RawTransport, RawTransportConfig, ReconnectPolicy, SseConfig, Transport, Worker,
    WorkerTransport,
};
use std::fmt;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
    }

    info!(
        "Following SSE stream [{}] as {} payloads...",
        config.url(),
        config.transform
    );

    let raw = RawTransport::with_config(RawTransportConfig {
        credential_headers: config.credential_headers(),
        ..Default::default()
    });

    let (transport, worker_thread): (Arc<dyn Transport>, _) = if config.use_worker {
        match Worker::spawn_dedicated(raw) {
            Ok((port, thread)) => (Arc::new(WorkerTransport::new(port)), Some(thread)),
            Err(e) => {
                error!("Failed to start SSE worker: {e}");
                std::process::exit(1);
            }
        }
    } else {
        (Arc::new(raw), None)
    };

    let base = source_config(&config);
    let result = match config.transform {
        PayloadFormat::Text => follow(base, transport).await,
        PayloadFormat::Json => {
            follow(base.with_transform(Value::Null, transform::json), transport).await
        }
        PayloadFormat::Ndjson => {
            follow(base.with_transform(Vec::new(), transform::ndjson), transport).await
        }
        PayloadFormat::Lines => {
            follow(base.with_transform(Vec::new(), transform::lines), transport).await
        }
        PayloadFormat::Number => {
            follow(base.with_transform(0.0, transform::number), transport).await
        }
    };

    if let Some(thread) = worker_thread {
        if thread.join().is_err() {
            warn!("SSE worker thread panicked");
        }
    }

    if let Err(e) = result {
        error!("Failed to open SSE stream: {e}");
        std::process::exit(1);
    }
}

fn source_config(config: &Config) -> SseConfig<String> {
    let mut sse_config = SseConfig::new(config.url())
        .with_credentials(config.with_credentials)
        .reconnect(reconnect_policy(config.reconnect()));

    for name in &config.events {
        let event_name = name.clone();
        sse_config = sse_config.on_event(name.clone(), move |event| {
            debug!("Received '{}' event ({} bytes)", event_name, event.data.len());
        });
    }

    sse_config
}

fn reconnect_policy(setting: ReconnectSetting) -> ReconnectPolicy {
    match setting {
        ReconnectSetting::Disabled => ReconnectPolicy::Disabled,
        ReconnectSetting::Unbounded { delay } if delay == sse::config::DEFAULT_RECONNECT_DELAY => {
            ReconnectPolicy::Default
        }
        // Large enough to never run out.
        ReconnectSetting::Unbounded { delay } => ReconnectPolicy::Explicit {
            retries: u32::MAX,
            delay,
        },
        ReconnectSetting::Limited { retries, delay } => {
            ReconnectPolicy::Explicit { retries, delay }
        }
    }
}

/// Log every change of the source until Ctrl-C.
async fn follow<T>(
    sse_config: SseConfig<T>,
    transport: Arc<dyn Transport>,
) -> Result<(), sse::Error>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    let source = EventSource::with_transport(sse_config, transport)?;

    let mut data = source.subscribe_data();
    let mut ready_state = source.subscribe_ready_state();
    let mut error = source.subscribe_error();

    loop {
        tokio::select! {
            Ok(()) = data.changed() => {
                info!("data: {:?}", *data.borrow_and_update());
            }
            Ok(()) = ready_state.changed() => {
                let state = *ready_state.borrow_and_update();
                info!("ready state: {state}");
            }
            Ok(()) = error.changed() => {
                if let Some(event) = &*error.borrow_and_update() {
                    warn!("{event}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    source.close();
    Ok(())
}
