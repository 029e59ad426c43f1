// Runs every source to completion and collects the aggregate batch. One
// source failing must never take the others down with it.

use futures::StreamExt;
use tracing::{error, info, warn};

use nightjar_common::Event;

use crate::source::EventSource;

/// Stats from one harvest pass.
#[derive(Debug, Default)]
pub struct HarvestStats {
    pub per_source: Vec<(String, u32)>,
    pub produced: u32,
    pub discarded_untitled: u32,
    pub failed_sources: u32,
}

impl std::fmt::Display for HarvestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Complete ===")?;
        for (name, count) in &self.per_source {
            writeln!(f, "  {name}: {count}")?;
        }
        writeln!(f, "Events harvested:   {}", self.produced)?;
        writeln!(f, "Untitled discarded: {}", self.discarded_untitled)?;
        writeln!(f, "Sources failed:     {}", self.failed_sources)?;
        Ok(())
    }
}

pub struct Harvester {
    sources: Vec<Box<dyn EventSource>>,
}

impl Harvester {
    pub fn new(sources: Vec<Box<dyn EventSource>>) -> Self {
        Self { sources }
    }

    /// Run all sources sequentially and return the aggregate batch.
    ///
    /// A source that fails mid-stream keeps the events it produced before
    /// failing: harvesting is at-least-once and reconciliation is
    /// idempotent, so partial output is strictly better than none.
    pub async fn harvest(&mut self) -> (Vec<Event>, HarvestStats) {
        let mut events = Vec::new();
        let mut stats = HarvestStats::default();

        for source in &mut self.sources {
            let name = source.name().to_string();
            let mut count = 0u32;
            let mut stream = source.produce();

            loop {
                match stream.next().await {
                    Some(Ok(event)) => {
                        if event.title.trim().is_empty() {
                            warn!(source = %name, url = %event.url, "discarding untitled event");
                            stats.discarded_untitled += 1;
                            continue;
                        }
                        count += 1;
                        events.push(event);
                    }
                    Some(Err(e)) => {
                        error!(source = %name, error = ?e, "source failed, keeping {count} events already harvested");
                        stats.failed_sources += 1;
                        break;
                    }
                    None => break,
                }
            }

            drop(stream);
            info!(source = %name, count, "source finished");
            stats.per_source.push((name, count));
            stats.produced += count;
        }

        (events, stats)
    }
}
