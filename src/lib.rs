//! SteriTrack: a workflow engine for a hospital central sterile supply
//! department.
//!
//! Instruments move through three physical areas (dirty, clean, sterile) as
//! work orders. Machine cycles, chemical/biological indicator gates and a
//! supervised release authority sit between contaminated intake and sterile
//! issue. Every state change is transactional and audited.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod ident;
pub mod machines;
pub mod models;
pub mod session;
pub mod sterilization;
pub mod workflow;

pub use config::SteriTrackConfig;
pub use db::Database;
pub use error::{EngineError, Result};
pub use machines::CycleTracker;
pub use session::{AuthError, Session, SessionManager};
pub use sterilization::{IndicatorEngine, ReleaseAuthority, SterilizationRecords};
pub use workflow::WorkOrderEngine;
