//! VM lifecycle orchestration for XAPI-managed hypervisor pools
//!
//! Two operations sit on top of a hypervisor client:
//! - cascading deletion of a VM with its snapshot tree and unshared disks
//! - quiesced snapshots with fallback to plain snapshots and cleanup of
//!   snapshots left behind by failed quiesce attempts
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vm_lifecycle::{DeleteOptions, LifecycleConfig, VmLifecycleManager, XapiSession};
//!
//! let config = LifecycleConfig::load(None)?;
//! let session = Arc::new(XapiSession::new(&config.xapi)?);
//! session.login().await?;
//!
//! let manager = VmLifecycleManager::new(session, config);
//! let vm = manager.vm_by_uuid("2a7b...").await?;
//! let snapshot = manager.snapshot_vm(&vm, None).await?;
//! manager.delete_vm(&snapshot, DeleteOptions::default()).await?;
//! ```

pub mod client;
pub mod config;
pub mod deletion;
pub mod error;
pub mod jsonrpc;
pub mod logging;
pub mod manager;
pub mod outcome;
pub mod reclaim;
pub mod retry;
pub mod snapshot;
pub mod types;

pub use crate::client::XapiClient;
pub use crate::config::LifecycleConfig;
pub use crate::error::{LifecycleError, LifecycleResult};
pub use crate::jsonrpc::XapiSession;
pub use crate::manager::{DeleteOptions, VmLifecycleManager};
pub use crate::types::{OpaqueRef, VmRecord};
