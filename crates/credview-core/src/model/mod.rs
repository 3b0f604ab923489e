// ── Domain model ──
//
// Targets, push notifications, per-row lifecycle and the problems the
// view reports. Everything here is plain data; no channels.

pub mod notification;
pub mod problem;
pub mod row;
pub mod target;

pub use notification::{CredentialsMessage, NotificationCategory, NotificationEvent};
pub use problem::Problem;
pub use row::{DeleteFailure, RowState};
pub use target::{ConnectUrl, Target};
