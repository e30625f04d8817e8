//! VM lifecycle manager - entry point for deletion and snapshot operations

use std::sync::Arc;

use serde_json::Value;

use crate::client::{expect_ref, fetch_record, XapiClient};
use crate::config::LifecycleConfig;
use crate::error::LifecycleResult;
use crate::types::{ObjectClass, OpaqueRef, VmRecord, XapiRecord};

/// Options for [`VmLifecycleManager::delete_vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Destroy disks no other VM depends on
    pub delete_disks: bool,
    /// Ignore a `destroy` entry in the VM's blocked operations
    pub force: bool,
    /// Allow deleting a VM marked as a default template
    pub allow_deleting_default_template: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            delete_disks: true,
            force: false,
            allow_deleting_default_template: false,
        }
    }
}

/// Orchestrates cascading deletion and quiesced snapshots against a
/// hypervisor client.
///
/// Holds no mutable state: every decision is taken on records fetched
/// right before acting on them.
pub struct VmLifecycleManager<C: ?Sized> {
    client: Arc<C>,
    config: LifecycleConfig,
}

impl<C: ?Sized> std::fmt::Debug for VmLifecycleManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmLifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: XapiClient + ?Sized> VmLifecycleManager<C> {
    pub fn new(client: Arc<C>, config: LifecycleConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Resolve a VM by UUID and fetch its record.
    pub async fn vm_by_uuid(&self, uuid: &str) -> LifecycleResult<VmRecord> {
        let reference = self.client.get_ref_by_uuid(ObjectClass::Vm, uuid).await?;
        self.fetch(&reference).await
    }

    pub(crate) async fn fetch<R: XapiRecord>(&self, reference: &OpaqueRef) -> LifecycleResult<R> {
        fetch_record::<R, C>(&self.client, reference).await
    }

    pub(crate) async fn call(&self, method: &str, args: Vec<Value>) -> LifecycleResult<Value> {
        tracing::debug!(method = method, "XAPI call");
        self.client.call(method, args).await
    }

    pub(crate) async fn call_for_ref(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> LifecycleResult<OpaqueRef> {
        let value = self.call(method, args).await?;
        expect_ref(method, value)
    }
}
