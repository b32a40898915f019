//! Listing discovery
//!
//! Drives a lazily-loaded listing forward and accumulates every item it
//! reveals until the listing stops growing.

mod progress;
mod runner;
mod types;

pub use progress::{ChannelProgress, TracingProgress};
pub use runner::DiscoveryLoop;
pub use types::{
    DiscoveredSet, DiscoveryOutcome, DiscoveryState, ItemIdentifier, ItemSummary,
    ListingSnapshot, ProgressEvent, Termination,
};
