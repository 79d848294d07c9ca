pub mod defs;
pub mod labels;

pub use defs::{Digest, DigestFormat, Document, DocumentSource, EpisodeMetadata, ReductionStrategy, ResultSink};
pub use labels::identify_newsletter;
