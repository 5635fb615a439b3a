pub mod candidates;
pub mod cluster;
pub mod coordinator;
pub mod events;
pub mod normalizer;
pub mod reprocess;
pub mod resolution;
pub mod risk;
pub mod scorer;
pub mod union_find;

pub use cluster::ClusterEngine;
pub use coordinator::{DetectionCoordinator, GroupPager, SubmitOutcome};
pub use events::{ChannelSink, GroupEventSink, RecordingSink, TracingSink};
pub use resolution::ResolutionOutcome;
