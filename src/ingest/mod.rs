//! Source ingestion: discovery, parsing, the per-source pipeline, batch
//! runs with persisted state, and the polling loop.

pub mod guard;
pub mod pipeline;
pub mod poller;
pub mod sources;
pub mod state;

pub use guard::RunGuard;
pub use pipeline::{IngestPipeline, RunSummary, SourceFailure};
pub use poller::{PollOutcome, Poller};
pub use sources::{discover, load_source, parse_source, ParsedSource, SourceInput};
pub use state::IngestionState;
