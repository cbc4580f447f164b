//! tideline-core: shared types and collaborator boundaries.
//!
//! Holds the domain model used by the poll scheduler and the update
//! pipeline (tracked images, change notifications, releases), the image
//! reference parser, YAML values access, the external collaborator traits,
//! and `tideline.toml` parsing.

pub mod config;
pub mod image;
pub mod provider;
pub mod types;
pub mod values;

pub use config::TidelineConfig;
pub use image::{ImageParseError, ImageReference};
pub use provider::{
    ConfiguredImages, CredentialResolver, ProviderSet, RegistryWatcher, ReleaseBackend,
    StaticCredentials, TrackedImageSource,
};
pub use types::*;
pub use values::{Values, ValuesError};
