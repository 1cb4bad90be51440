//! # ccml-core — helpers for ML training experiments
//!
//! - **Identifiers**: run id, short id, pipeline and experiment name captured
//!   once into a [`RunContext`] and substituted into artifact paths.
//! - **Factory**: an [`ObjectRegistry`] of constructors and values that builds
//!   callbacks, losses and optimizers from `{"type": ..., "params": ...}` or
//!   `{"function": ...}` descriptors.
//! - **Training**: a thin compile-and-fit wrapper over a [`training::Trainable`] model.
//! - **Artifacts**: prediction tables and YAML sidecars, Vega-Lite charts, and
//!   git provenance.

pub mod callbacks;
pub mod charts;
pub mod config;
pub mod error;
pub mod factory;
pub mod identifiers;
pub mod losses;
pub mod optimizers;
pub mod paths;
pub mod predictions;
pub mod provenance;
pub mod training;

pub use config::{CcmlConfig, load_config};
pub use error::{CcmlError, ResolutionError, Result};
pub use factory::{ObjectDescriptor, ObjectRegistry, Resolved};
pub use identifiers::RunContext;
pub use paths::provision_path;

/// Register all `ccml.*` built-ins with the object registry.
///
/// Each module records this crate's source directory as its origin so its
/// git revision can be looked up.
pub fn register_builtins(registry: &mut ObjectRegistry, ctx: &RunContext) -> Result<()> {
    callbacks::register(registry, ctx)?;
    losses::register(registry)?;
    optimizers::register(registry)?;

    for module in ["ccml.callbacks", "ccml.losses", "ccml.metrics", "ccml.optimizers"] {
        registry.set_module_origin(module, env!("CARGO_MANIFEST_DIR"));
    }
    tracing::debug!(members = registry.len(), "Registered built-in objects");
    Ok(())
}
