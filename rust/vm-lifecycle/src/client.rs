//! Hypervisor client seam.
//!
//! The orchestration code only ever talks to the control plane through
//! [`XapiClient`]. [`crate::jsonrpc::XapiSession`] is the production
//! implementation; tests substitute an in-memory fake.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;

use crate::error::{LifecycleError, LifecycleResult};
use crate::types::{ObjectClass, OpaqueRef, XapiRecord};

/// XAPI error codes the orchestration branches on.
pub mod codes {
    pub const HANDLE_INVALID: &str = "HANDLE_INVALID";
    pub const VM_BAD_POWER_STATE: &str = "VM_BAD_POWER_STATE";
    pub const VM_SNAPSHOT_WITH_QUIESCE_FAILED: &str = "VM_SNAPSHOT_WITH_QUIESCE_FAILED";
    pub const VM_SNAPSHOT_WITH_QUIESCE_NOT_SUPPORTED: &str =
        "VM_SNAPSHOT_WITH_QUIESCE_NOT_SUPPORTED";
}

/// Access to the hypervisor control plane.
#[async_trait]
pub trait XapiClient: Send + Sync {
    /// Invoke a named remote operation such as `VM.destroy`.
    async fn call(&self, method: &str, args: Vec<Value>) -> LifecycleResult<Value>;

    /// Fetch the current field values of an object.
    async fn get_record(&self, class: ObjectClass, reference: &OpaqueRef) -> LifecycleResult<Value>;

    /// Resolve a UUID to the object's reference.
    async fn get_ref_by_uuid(&self, class: ObjectClass, uuid: &str) -> LifecycleResult<OpaqueRef>;
}

/// Fetch and decode a single record.
///
/// `HANDLE_INVALID` is reported as [`LifecycleError::RecordNotFound`] so a
/// vanished object can be told apart from other failures.
pub async fn fetch_record<R, C>(client: &C, reference: &OpaqueRef) -> LifecycleResult<R>
where
    R: XapiRecord,
    C: XapiClient + ?Sized,
{
    let value = client
        .get_record(R::CLASS, reference)
        .await
        .map_err(|err| {
            if err.is_handle_invalid() {
                LifecycleError::RecordNotFound {
                    class: R::CLASS,
                    reference: reference.clone(),
                }
            } else {
                err
            }
        })?;

    let mut record: R = serde_json::from_value(value).map_err(|err| {
        LifecycleError::InvalidRecord(format!("{} {reference}: {err}", R::CLASS))
    })?;
    record.set_reference(reference.clone());
    Ok(record)
}

/// Fetch several records concurrently; fails if any single fetch fails.
pub async fn fetch_records<R, C>(client: &C, references: &[OpaqueRef]) -> LifecycleResult<Vec<R>>
where
    R: XapiRecord,
    C: XapiClient + ?Sized,
{
    try_join_all(references.iter().map(|reference| fetch_record::<R, C>(client, reference))).await
}

/// Convert a call result that is expected to be an object reference.
pub fn expect_ref(method: &str, value: Value) -> LifecycleResult<OpaqueRef> {
    match value {
        Value::String(reference) => Ok(OpaqueRef::new(reference)),
        other => Err(LifecycleError::InvalidRecord(format!(
            "{method} returned {other} instead of a reference"
        ))),
    }
}
