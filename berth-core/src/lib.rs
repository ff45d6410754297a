pub mod affinity;
pub mod allocator;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod error;
pub mod exclude_list;
pub mod inventory;
pub mod lifecycle;
pub mod manager;
pub mod plan;
pub mod planner;
pub mod profile;
pub mod query;
pub mod reservation;
pub mod types;

// Re-exports for the common entry points
pub use config::BerthConfig;
pub use error::{BerthError, BerthResult};
pub use exclude_list::ExcludeList;
pub use inventory::{InMemoryInventory, InventorySnapshot};
pub use manager::{DeploymentPlanningManager, DeploymentPlanningManagerBuilder, StorageSelection};
pub use plan::{DeployDestination, DeploymentPlan};
pub use profile::VirtualMachineProfile;
pub use query::PlannerDependencies;
