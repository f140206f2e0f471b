//! Fleet Supervisor - Main Library
//!
//! This crate provides the main library for the fleet supervisor binary,
//! following Clean Architecture principles.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//! - **fleet_core**: Core business logic (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use fleet_supervisor::bin_common::{load_config_from_env, ConfigType};
//! use fleet_supervisor::fleet_core::Fleet;
//! ```

// Re-export the workspace library for convenience
pub use fleet_core;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables
    //!
    //! Provides shared functionality for the presentation layer (binaries)
    //! following Clean Architecture principles.

    pub mod cli;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
}
