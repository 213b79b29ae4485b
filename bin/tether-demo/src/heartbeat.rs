use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tether_core::{
    pipeline::{DataProcessor, Sequence, StageOptions},
    runtime::{Task, TaskArgs},
};
use tether_error::{generic_error, GenericError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const REPORT_EVERY: u64 = 1000;

/// Root task of the demo: pushes a tick counter through an arithmetic pipeline.
pub struct Heartbeat {
    pipeline: Sequence<u64>,
    ticks: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Result<Self, GenericError> {
        Ok(Self {
            pipeline: Sequence::new("heartbeat-stages")?,
            ticks: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Task for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn init(&self, args: &TaskArgs) -> Result<(), GenericError> {
        let period = args.get::<Duration>(0).copied().unwrap_or(Duration::from_secs(1));

        self.pipeline
            .register(
                1,
                Arc::new(Scale { factor: 3 }),
                StageOptions::default().with_period(period),
                TaskArgs::new(),
            )
            .await?;
        self.pipeline
            .register(
                2,
                Arc::new(Offset { amount: 7 }),
                StageOptions::default()
                    .with_period(period)
                    .with_recovery(|value, error| {
                        debug!(value, %error, "Offset skipped.");
                        Ok(value)
                    }),
                TaskArgs::new(),
            )
            .await?;
        self.pipeline.init().await?;

        info!(stages = self.pipeline.stage_count(), "Heartbeat initialized.");
        Ok(())
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        let tick = self.ticks.fetch_add(1, Relaxed) + 1;
        let value = self.pipeline.process(tick)?;
        if tick % REPORT_EVERY == 0 {
            info!(tick, value, "Heartbeat.");
        }
        Ok(())
    }

    fn destroy(&self) {
        info!(ticks = self.ticks.load(Relaxed), "Heartbeat stopped.");
    }
}

struct Scale {
    factor: u64,
}

#[async_trait]
impl Task for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        Ok(())
    }
}

impl DataProcessor<u64> for Scale {
    fn process(&self, msg: &u64) -> Result<u64, GenericError> {
        msg.checked_mul(self.factor)
            .ok_or_else(|| generic_error!("{} * {} overflows", msg, self.factor))
    }
}

struct Offset {
    amount: u64,
}

#[async_trait]
impl Task for Offset {
    fn name(&self) -> &str {
        "offset"
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        Ok(())
    }
}

impl DataProcessor<u64> for Offset {
    fn msg_check(&self, msg: &u64) -> Result<(), GenericError> {
        if msg % 2 == 0 {
            return Err(generic_error!("{} is even", msg));
        }
        Ok(())
    }

    fn process(&self, msg: &u64) -> Result<u64, GenericError> {
        Ok(msg + self.amount)
    }
}
