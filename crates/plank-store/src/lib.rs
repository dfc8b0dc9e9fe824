//! Plan documents and their on-disk store.

pub mod config;
pub mod fsutil;
pub mod models;
pub mod plan_file;
pub mod store;

pub use models::{Plan, PlanId, PlanStatus, Priority, Step, Task, TaskWork};
pub use plan_file::{PlanEdit, PlanFileError};
pub use store::{NewPlan, PlanSet, PlanStore, StoreError, StoredPlan};
