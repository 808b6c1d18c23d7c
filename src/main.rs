//! One exchange peer: a producer for this process's own region plus a
//! consumer for every other peer, looping forever.

use std::thread::sleep;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swapcell::config::{NUM_PROCESSES, SHM_NAME_PREFIX};
use swapcell::{Consumer, Message, Producer, SwapError};

/// One peer of the shared-memory latest-value exchange.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Index of this process, unique across the deployment.
    #[arg(value_parser = clap::value_parser!(u64).range(0..NUM_PROCESSES as u64))]
    index: u64,
}

fn main() -> Result<(), SwapError> {
    let args = Args::parse();
    let index = args.index as usize;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Own region first: every process must have created its region before
    // any peer blocks waiting to open it.
    let producer = Producer::attach(SHM_NAME_PREFIX, index)?;

    info!(index, "waiting for {count} peers", count = NUM_PROCESSES - 1);
    let mut consumers = Vec::with_capacity(NUM_PROCESSES - 1);
    for peer in (0..NUM_PROCESSES).filter(|&peer| peer != index) {
        consumers.push(Consumer::attach(SHM_NAME_PREFIX, index, peer)?);
    }
    info!(index, "ready");

    let mut rng = rand::thread_rng();
    let mut value = 0u64;
    loop {
        for consumer in &mut consumers {
            let peer = consumer.producer_index();
            if consumer.has_message() {
                consumer.lock()?;
                let message = consumer.message()?;
                info!(index, peer, value = message.val, "read");
                consumer.unlock()?;
            } else {
                info!(index, peer, "read: nothing published yet");
            }
        }

        value += 1;
        info!(index, value, "publish");
        producer.publish(Message { val: value })?;

        sleep(Duration::from_micros(rng.gen_range(1..=1_000_000)));
    }
}
