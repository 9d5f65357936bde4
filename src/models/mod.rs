//! Data Models
//!
//! Analysis runs, task proposals and configuration.

pub mod analysis_run;
pub mod proposal;
pub mod settings;

pub use analysis_run::*;
pub use proposal::*;
pub use settings::*;
