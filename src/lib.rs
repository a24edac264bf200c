//! # Trueno-AB: Embedded Experimentation Engine
//!
//! **Version**: 0.1.0
//!
//! Trueno-AB runs A/B, multivariate and bandit experiments inside a host
//! application: it decides which variation a visitor sees, records goal
//! conversions exactly once, reports conversion rates with two-proportion
//! significance, and periodically reweights bandit experiments.
//!
//! ## Guarantees
//!
//! - **Sticky**: a visitor's first assignment in an experiment is final
//! - **Deterministic**: bucketing is a pure function of the visitor id
//! - **Exactly-once**: one conversion per (experiment, variation, user, goal)
//! - **Atomic admin writes**: create, stop and reallocate leave no partial state
//!
//! ## Example Usage
//!
//! ```rust
//! use serde_json::json;
//! use trueno_ab::model::{ExperimentConfig, Goal, VariationConfig};
//! use trueno_ab::store::MemoryStore;
//! use trueno_ab::targeting::RequestContext;
//! use trueno_ab::ExperimentOrchestrator;
//!
//! let engine = ExperimentOrchestrator::builder(MemoryStore::new()).build()?;
//!
//! let id = engine.create_experiment(
//!     ExperimentConfig::builder("Signup button")
//!         .variation(VariationConfig::new("control", "Blue").traffic_percentage(50.0))
//!         .variation(VariationConfig::new("green", "Green").traffic_percentage(50.0))
//!         .goal(Goal::new("signup", "signup"))
//!         .build(),
//! )?;
//! engine.start_experiment(id)?;
//!
//! let served = engine.get_user_variation(id, "alice", &RequestContext::default())?;
//! assert!(served.is_some());
//!
//! assert_eq!(engine.track_conversion("alice", "signup", &json!({"value": 12.0}))?, 1);
//! assert_eq!(engine.get_experiment_results(id)?.total_visitors, 1);
//! # Ok::<(), trueno_ab::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod allocation;
pub mod bandit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod error;
pub mod model;
pub mod multivariate;
pub mod orchestrator;
pub mod stats;
pub mod store;
pub mod targeting;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use orchestrator::{ExperimentOrchestrator, ExperimentResults, WinnerHook};
pub use stats::{Significance, SignificanceResult};
pub use store::{ExperimentStore, MemoryStore};
