//! Background dispatch of image variant regeneration.
//!
//! When an owner's image changes, the host reports the write to a
//! [`Coordinator`], which marks the owner as processing and pushes one
//! [`JobDescriptor`] per committed transaction onto the online or the
//! non-online queue. When an owner is destroyed, the [`Reconciler`] pulls its
//! queued descriptors back out and drops the flag.

pub mod broker;
pub mod change;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod owner;
pub mod placeholder;
pub mod queue;
pub mod reconcile;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use broker::Broker;
pub use change::{detect, Change};
pub use config::{DispatchConfig, QueueKind};
pub use descriptor::{CropGeometry, JobDescriptor};
pub use dispatch::{Coordinator, DispatchTxn, Dispatched};
pub use error::{DispatchError, QueueError, ReconcileError, StoreError};
pub use owner::{CropFields, OwnerKey, OwnerSnapshot};
pub use memory::MemoryBroker;
pub use placeholder::Placeholder;
pub use queue::{ClaimedJob, QueueClient};
pub use reconcile::{Reconciled, Reconciler};
pub use store::FlagStore;
