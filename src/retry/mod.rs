pub mod clock;
pub mod coordinator;
pub mod dead_letter;
pub mod headers;
pub mod primary;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{RetryCoordinator, RetryOutcome, RetrySettings};
pub use dead_letter::DeadLetterAuditor;
pub use headers::RetryMetadata;
pub use primary::RetryingHandler;
pub use scheduler::{restart_if_running, RedeliveryScheduler};
