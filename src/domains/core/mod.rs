pub mod destination;

pub use destination::{DestinationRef, DestinationStore, LocalDestinationStore, StagedArtifact};
