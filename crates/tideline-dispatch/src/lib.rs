//! tideline-dispatch: the update dispatch pipeline.
//!
//! Accepts change notifications ("repository X has tag T") on a bounded
//! queue and upgrades the deployed releases that run an older tag of X.
//!
//! # Components
//!
//! - **`pipeline`**: Bounded queue, consumer loop, stop/drain shutdown
//! - **`matching`**: Selects releases a notification concerns
//! - **`executor`**: Pins the new tag and upgrades, one upgrade per release at a time
//! - **`memory`**: In-memory `ReleaseBackend`

pub mod error;
pub mod executor;
pub mod matching;
pub mod memory;
pub mod pipeline;

pub use error::{DispatchError, DispatchResult};
pub use executor::{ReleaseLocks, ReleaseUpdater, override_values};
pub use matching::{ReleaseMatch, impacted_releases, release_image, should_update};
pub use memory::{MemoryReleaseBackend, UpgradeCall};
pub use pipeline::{DispatchReport, Dispatcher, PipelineHandle, PipelineSignal, UpdatePipeline};
