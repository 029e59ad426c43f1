use futures::stream::BoxStream;

use nightjar_common::Event;

/// Lazy stream of normalized events from one source.
pub type EventStream<'a> = BoxStream<'a, anyhow::Result<Event>>;

/// A source of events.
///
/// Adapters own their parsing and normalization. A single malformed record
/// must be logged and skipped inside the adapter, never raised; an `Err`
/// item on the stream is reserved for conditions that make the whole
/// source unusable and ends this adapter's run. Untitled records are
/// discarded by the harvest coordinator, not here.
pub trait EventSource: Send {
    fn name(&self) -> &str;

    fn produce(&mut self) -> EventStream<'_>;
}
