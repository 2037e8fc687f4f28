//! Report lifecycle: local-first persistence with a bounded cache,
//! best-effort remote sync, and the invite-code lock/unlock gate.
//!
//! The conversation side feeds this module through [`ReportBridge`],
//! which adapts `ChatEvents` callbacks onto the [`ReportManager`].

mod error;
mod manager;
mod remote;
mod store;
mod types;

pub use error::ReportError;
pub use manager::{InviteDialogFn, ReportBridge, ReportManager, ReportState};
pub use remote::{FnResult, HttpRemoteStore, RemoteStore, RemoteTracker};
pub use store::LocalReportStore;
pub use types::{
    generate_report_id, generate_report_title, locked_preview, Report, ReportDetail,
    ReportStatus, LOCKED_PREVIEW_CHARS,
};
