// =============================================================================
// Alerts Module
// =============================================================================
//
// Side effects for actionable signals: sound, notification and toast, plus
// rate-limited connection advisories.

pub mod dispatcher;
pub mod sinks;

pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use sinks::{FeedToaster, LogNotifier, Notifier, TerminalBell, Toast, WebhookNotifier};
