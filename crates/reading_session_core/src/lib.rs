pub mod domain;
pub mod policy;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use domain::{
    BookId, BookIdentity, CompletedSession, SessionId, SessionKey, SessionRecord, SyncKind,
    TimerHandle, UserId,
};
pub use policy::{Eligibility, IneligibleReason, PersistencePolicy, MAX_DECIMAL_PLACES};
pub use ports::{IdentityResolver, PortError, PortResult, SessionSink};
pub use registry::{RecordSnapshot, SessionRegistry};
pub use scheduler::{Expiry, ExpiryScheduler};
pub use tracker::{Completion, CompletionCause, DrainSummary, SessionTracker, SyncEvent, TrackerConfig};
