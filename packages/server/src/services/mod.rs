pub mod enrichment;
pub mod fetch;
pub mod inference;
pub mod ingest;

pub use enrichment::{EnrichmentFunnel, FunnelSettings, PublishError, ServeError};
pub use fetch::{FetchError, FetchedImage, HttpFetcher, SourceFetcher};
pub use inference::{Describer, HttpDescriber, InferenceError};
pub use ingest::{IngestCoordinator, IngestError, IngestOutcome, IngestPolicy};
