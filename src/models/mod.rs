pub mod event;
pub mod group;
pub mod invoice;
pub mod job;
pub mod score;

pub use event::{AuditEntry, AuditOutcome, Disposition, GroupEvent};
pub use group::{
    DuplicateGroup, GroupFilter, GroupId, GroupPage, GroupStatus, GroupSummary, Resolution,
    RiskTier,
};
pub use invoice::{InvoiceRecord, NormalizedRecord, RecordId};
pub use job::{JobHandle, JobId, JobStatus};
pub use score::{FieldMatch, MatchField, PairScore};
