//! Component B: the popup dispatcher (`spec.md` §4.B).

pub mod actor;
pub mod allowlist;
pub mod surface;

pub use actor::{ConnectAdmission, DispatcherHandle, ResolveOutcome, SignAdmission};
pub use allowlist::AllowList;
pub use surface::{ApprovalSurface, LoggingApprovalSurface, LoggingTabChannel, OpenError, TabChannel};
