//! Demo binary: runs the person service against in-memory collaborators
//! with the full telemetry pipeline attached, until interrupted.

use constellation_service::person::{
    CreatePersonInput, InMemoryJobQueue, InMemoryPersonStore, PersonService,
};
use constellation_service::{ServiceConfig, Telemetry, TelemetryStack};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env();
    let stack = TelemetryStack::init(&config)?;

    let (stop_sender, stop_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_sender.send(());
    })?;

    let service = PersonService::new(
        Arc::new(InMemoryPersonStore::default()),
        Arc::new(InMemoryJobQueue::default()),
        Telemetry::new(stack.tracer_provider.tracer("constellation")),
        &stack.meter_provider.meter("constellation"),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;

    log::info!("constellation service started, ctrl-c to stop");
    runtime.block_on(async {
        let mut tick = 0u64;
        loop {
            if stop_receiver.try_recv().is_ok() {
                break;
            }
            exercise(&service, tick).await;
            tick += 1;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    log::info!("shutting down");
    stack.shutdown()?;
    Ok(())
}

async fn exercise(service: &PersonService<InMemoryPersonStore, InMemoryJobQueue>, tick: u64) {
    let input = CreatePersonInput {
        name: format!("person-{tick}"),
        age: (tick % 90) as i32,
    };
    match service.create(input).await {
        Ok(person) => {
            let _ = service.find_one(person.id).await;
        }
        Err(err) => log::warn!("create failed: {err}"),
    }
    if tick % 5 == 0 {
        // Exercise the not-found path too.
        let _ = service.find_one(i64::MAX).await;
        let _ = service.find_all().await;
    }
}
