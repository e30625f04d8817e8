//! Cascading VM deletion.
//!
//! A VM is destroyed together with its snapshot tree and the disks no other
//! VM still uses. Ordering matters:
//!
//! 1. the disk map is captured while the VM still lists its VBDs,
//! 2. the VM itself is destroyed,
//! 3. only then are snapshots and disks removed, best effort.
//!
//! A failed VM destroy therefore never leaves the VM behind without its
//! disks.

use std::collections::BTreeSet;

use futures::future::{join_all, try_join_all, BoxFuture};
use serde_json::json;
use tracing::{debug, info};

use crate::client::{fetch_records, XapiClient};
use crate::error::{LifecycleError, LifecycleResult};
use crate::logging::OpTimer;
use crate::manager::{DeleteOptions, VmLifecycleManager};
use crate::outcome::{best_effort, BestEffort};
use crate::types::{DiskMap, OpaqueRef, PowerState, VbdRecord, VdiRecord, VmRecord};

const DESTROY_OPERATION: &str = "destroy";

impl<C: XapiClient + ?Sized> VmLifecycleManager<C> {
    /// Delete a VM, its snapshots and, optionally, its unshared disks.
    ///
    /// The record passed in is only used for its reference; the VM is
    /// re-fetched before anything is checked or changed.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::PermissionDenied`] when `destroy` is blocked and
    ///   `force` is not set
    /// - [`LifecycleError::ProtectedTemplate`] for a default template without
    ///   the override
    /// - [`LifecycleError::RecordNotFound`] when the VM no longer exists
    /// - any error of the shutdown, unprotect or destroy calls
    ///
    /// Failures while removing snapshots or disks after the VM is gone are
    /// logged and ignored.
    pub async fn delete_vm(&self, vm: &VmRecord, options: DeleteOptions) -> LifecycleResult<()> {
        let timer = OpTimer::new("delete_vm", vm.reference.as_str());
        let result = self.delete_vm_by_ref(&vm.reference, options).await;
        timer.finish_with_result(result.as_ref());
        result
    }

    /// Disks attached to `vm` through its "Disk" VBDs, keyed by stable id.
    pub async fn vm_disks(&self, vm: &VmRecord) -> LifecycleResult<DiskMap> {
        let vbds: Vec<VbdRecord> = fetch_records(self.client(), &vm.vbds).await?;
        let vdi_refs: BTreeSet<&OpaqueRef> =
            vbds.iter().filter_map(VbdRecord::attached_disk).collect();

        let vdis = try_join_all(vdi_refs.into_iter().map(|vdi| self.fetch::<VdiRecord>(vdi))).await?;
        Ok(vdis
            .into_iter()
            .map(|vdi| (vdi.stable_id().to_string(), vdi))
            .collect())
    }

    async fn delete_vm_by_ref(
        &self,
        reference: &OpaqueRef,
        options: DeleteOptions,
    ) -> LifecycleResult<()> {
        let vm: VmRecord = self.fetch(reference).await?;

        if !options.force && vm.is_operation_blocked(DESTROY_OPERATION) {
            return Err(LifecycleError::PermissionDenied {
                reference: reference.clone(),
                operation: DESTROY_OPERATION.to_string(),
            });
        }
        if !options.allow_deleting_default_template && vm.is_default_template() {
            return Err(LifecycleError::ProtectedTemplate {
                reference: reference.clone(),
            });
        }

        // Disks of a suspended or running VM cannot be removed.
        if vm.power_state != PowerState::Halted {
            info!(vm = %reference, power_state = ?vm.power_state, "Hard shutdown before deletion");
            self.call("VM.hard_shutdown", vec![json!(reference)]).await?;
        }

        let disk_capture = async {
            if options.delete_disks {
                self.vm_disks(&vm).await
            } else {
                Ok(DiskMap::new())
            }
        };
        let ((), disks) = tokio::try_join!(self.clear_protection(reference), disk_capture)?;

        self.call("VM.destroy", vec![json!(reference)]).await?;
        info!(
            vm = %reference,
            snapshots = vm.snapshots.len(),
            disks = disks.len(),
            "VM destroyed"
        );

        let snapshots = join_all(vm.snapshots.iter().map(|snapshot| {
            best_effort("delete snapshot", self.delete_snapshot_tree(snapshot))
        }));
        let reclaims = join_all(disks.values().map(|vdi| {
            best_effort("reclaim disk", self.reclaim_disk(&vdi.reference, reference))
        }));
        let (snapshots, reclaims) = tokio::join!(snapshots, reclaims);

        let ignored = snapshots
            .iter()
            .chain(reclaims.iter())
            .filter(|outcome| !outcome.is_completed())
            .count();
        if ignored > 0 {
            debug!(vm = %reference, ignored = ignored, "Cascade finished with ignored failures");
        }
        snapshots.into_iter().chain(reclaims).for_each(BestEffort::discard);

        Ok(())
    }

    /// Lift every marker that would block or forbid destroying the VM.
    async fn clear_protection(&self, reference: &OpaqueRef) -> LifecycleResult<()> {
        tokio::try_join!(
            self.call(
                "VM.remove_from_blocked_operations",
                vec![json!(reference), json!(DESTROY_OPERATION)],
            ),
            self.call(
                "VM.remove_from_other_config",
                vec![json!(reference), json!("default_template")],
            ),
            self.call("VM.set_is_a_template", vec![json!(reference), json!(false)]),
        )?;
        Ok(())
    }

    /// Snapshots are VMs themselves and go through the same protocol.
    fn delete_snapshot_tree<'a>(
        &'a self,
        snapshot: &'a OpaqueRef,
    ) -> BoxFuture<'a, LifecycleResult<()>> {
        Box::pin(async move {
            debug!(snapshot = %snapshot, "Deleting snapshot");
            self.delete_vm_by_ref(snapshot, DeleteOptions::default()).await
        })
    }
}
