pub mod controller;
pub mod engine;
pub mod error;
pub mod http;
pub mod notify;
pub mod ports;
pub mod projection;
pub mod store;
pub mod toggle;
pub mod types;

pub use controller::ProgressController;
pub use engine::{StepUpdateEngine, ToggleOutcome, ToggleRejection};
pub use error::{CompleteStepError, ProgressError, ProjectionError, SourceError};
pub use http::HttpProgressClient;
pub use notify::{BroadcastNotifier, Notification, NotificationVariant, Notifier};
pub use ports::{ProgressSource, SnapshotStream, StepCompletionService};
pub use store::ProgressStore;
pub use types::{BadgeView, LessonView, ProgressState, StepButton, StepView};

#[cfg(test)]
#[path = "tests/fixtures.rs"]
pub(crate) mod test_fixtures;
