//! Pushes log lines through a sequence of enrichment stages, then fans them out to per-destination encoders.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{
    pipeline::{DataProcessor, Parallel, Sequence, StageOptions},
    runtime::{Task, TaskArgs},
};
use tether_error::{generic_error, GenericError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
struct Line {
    text: String,
    tags: Vec<String>,
}

/// Drops lines that are empty after trimming.
struct Trim;

#[async_trait]
impl Task for Trim {
    fn name(&self) -> &str {
        "trim"
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        Ok(())
    }
}

impl DataProcessor<Line> for Trim {
    fn msg_check(&self, msg: &Line) -> Result<(), GenericError> {
        if msg.text.trim().is_empty() {
            return Err(generic_error!("empty line"));
        }
        Ok(())
    }

    fn process(&self, msg: &Line) -> Result<Line, GenericError> {
        Ok(Line {
            text: msg.text.trim().to_string(),
            tags: msg.tags.clone(),
        })
    }
}

/// Adds a static tag, taken from its init arguments.
#[derive(Default)]
struct Tag {
    tag: std::sync::OnceLock<String>,
}

#[async_trait]
impl Task for Tag {
    fn name(&self) -> &str {
        "tag"
    }

    async fn init(&self, args: &TaskArgs) -> Result<(), GenericError> {
        let tag = args
            .get::<String>(0)
            .ok_or_else(|| generic_error!("tag stage needs a tag"))?;
        let _ = self.tag.set(tag.clone());
        Ok(())
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        Ok(())
    }
}

impl DataProcessor<Line> for Tag {
    fn process(&self, msg: &Line) -> Result<Line, GenericError> {
        let mut line = msg.clone();
        line.tags.extend(self.tag.get().cloned());
        Ok(line)
    }
}

/// Renders a line for one destination.
struct Encode {
    destination: &'static str,
}

#[async_trait]
impl Task for Encode {
    fn name(&self) -> &str {
        self.destination
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        Ok(())
    }
}

impl DataProcessor<Line> for Encode {
    fn process(&self, msg: &Line) -> Result<Line, GenericError> {
        Ok(Line {
            text: format!("[{}] {} {}", self.destination, msg.text, msg.tags.join(",")),
            tags: Vec::new(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), GenericError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let enrich = Sequence::<Line>::new("enrich")?;
    enrich
        .register(
            1,
            Arc::new(Trim),
            StageOptions::default().with_recovery(|line: Line, error| {
                warn!(%error, "Replacing unusable line.");
                Ok(Line {
                    text: "<blank>".to_string(),
                    tags: line.tags,
                })
            }),
            TaskArgs::new(),
        )
        .await?;
    enrich
        .register(
            2,
            Arc::new(Tag::default()),
            StageOptions::default(),
            TaskArgs::new().with("env:demo".to_string()),
        )
        .await?;

    let encode = Parallel::<Line>::new("encode")?;
    for destination in ["console", "archive"] {
        encode
            .register(Arc::new(Encode { destination }), StageOptions::default(), TaskArgs::new())
            .await?;
    }

    enrich.init().await?;
    encode.init().await?;

    for text in ["  hello  ", "   ", "goodbye"] {
        let line = Line {
            text: text.to_string(),
            tags: Vec::new(),
        };
        for encoded in encode.process(enrich.process(line)?)? {
            info!(output = %encoded.text, "Encoded line.");
        }
    }

    encode.destroy().await;
    enrich.destroy().await;
    Ok(())
}
