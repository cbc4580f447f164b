//! tideline-poll: the poll scheduler.
//!
//! Periodically re-derives the set of poll-triggered images and keeps a
//! registry watch registered for each. The scheduler:
//!
//! - Lists tracked images from a `TrackedImageSource`
//! - Resolves credentials per image, falling back to anonymous access
//! - Registers a watch per image with a `RegistryWatcher`
//! - Reports the number of polled images to a `MetricsSink`
//!
//! # Architecture
//!
//! ```text
//! PollScheduler (scan now, then every 55s)
//!   ├── TrackedImageSource (list images, filter trigger = poll)
//!   ├── CredentialResolver (per image, anonymous on failure)
//!   ├── RegistryWatcher    (idempotent registration, e.g. WatchRegistry)
//!   └── MetricsSink        (poll_trigger_tracked_images)
//! ```

pub mod error;
pub mod schedule;
pub mod scheduler;
pub mod watch_registry;

pub use error::{PollError, PollResult};
pub use schedule::Schedule;
pub use scheduler::{PollScheduler, ScanReport, ScanState};
pub use watch_registry::{WatchJob, WatchOutcome, WatchRegistry};
