//! Migration driver
//!
//! Runs one migration as a strictly sequential state machine:
//!
//! | Phase        | Work                                                   | On failure          |
//! |--------------|--------------------------------------------------------|---------------------|
//! | `Extracting` | list and extract every source table                    | unreachable: fatal  |
//! | `Loading`    | reset the namespace, one bulk insert per table         | per table: continue |
//! | `Reading`    | read pipelines, register views and read them back      | per item: continue  |
//! | `Mutating`   | secret regeneration, inserts, bulk updates             | per item: continue  |
//! | `Deleting`   | cascading deletes (children first), then the sweep     | per item: continue  |
//! | `Done`       | release the source connection                          | always reached      |
//!
//! # Example
//!
//! ```rust,ignore
//! use docstore_migrate::migrate::{MigrationConfig, MigrationDriver, MigrationPlan};
//!
//! let plan = MigrationPlan::dvdrental(60)?;
//! let driver = MigrationDriver::new(MigrationConfig::new().with_namespace("dvdrental"), plan)?;
//! let report = driver.run(&mut source, &mut store);
//! report.print_summary();
//! ```

mod config;
pub mod dvdrental;
mod error;
mod executor;
mod plan;

pub use config::{DEFAULT_NAMESPACE, DEFAULT_SAMPLE_SIZE, MigrationConfig, Phase};
pub use dvdrental::DEFAULT_SHORT_FILM_MINUTES;
pub use error::{MigrateError, MigrateResult};
pub use executor::{MigrationDriver, MigrationReport, PhaseSummary, RunStatus};
pub use plan::{
    CascadeDelete, Dependent, MigrationPlan, Mutation, MutationKind, Owner, ReadQuery, ViewSpec,
};
