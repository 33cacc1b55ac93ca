//! Radial astrophysical statistics over scattered N-body point clouds.
//!
//! Key components:
//! - **Root finder**: bracketed 1-D solving with the modified Illinois
//!   method (`rootfind`).
//! - **Virial solver**: locates the radius where mean enclosed density
//!   crosses a target overdensity (`virial`).
//! - **Binning engine**: one accumulation pass per point into a fixed bin
//!   table, then a single finalization pass (`profile`).
//! - **Distributed driver**: coordinator/worker sharding with an
//!   associative merge of partial tables (`distributed`).

pub mod cloud;
pub mod distributed;
pub mod error;
pub mod geometry;
pub mod profile;
pub mod rootfind;
pub mod traits;
pub mod virial;

pub use error::ProfileError;
