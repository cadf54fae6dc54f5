pub mod channel;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod interval;
pub mod metrics;
pub mod state;

pub use channel::ChannelAssignmentService;
pub use counter::SeqnoCounter;
pub use dispatch::{EventDispatcher, Notification, NotificationListener};
pub use interval::IntervalGuard;
pub use metrics::Metrics;
