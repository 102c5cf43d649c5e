//! agentfleet-registry: fleets, their capacity gauge and their templates.
//!
//! ```text
//! FleetRegistry (RwLock, declaration order)
//!   └── Fleet
//!         ├── CapacityTracker   Mutex<{count, configuration_valid}>
//!         ├── Template[]        Mutex<{verified, status_details}>
//!         └── Arc<dyn ComputeProvider>
//! ```
//!
//! [`CapacityTracker::reserve`] is the single admission-control decision
//! point; [`Fleet::resolve_template`] picks the first eligible template in
//! declaration order.

pub mod capacity;
pub mod error;
pub mod fleet;
pub mod template;

pub use capacity::{CapacityTracker, number_of_agents};
pub use error::{RegistryError, RegistryResult};
pub use fleet::{Fleet, FleetRegistry};
pub use template::{Template, TemplateStatus};
