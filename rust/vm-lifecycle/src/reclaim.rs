//! Disk reclamation after a VM has been destroyed.
//!
//! The control domain may still hold a VBD on a disk for a moment after the
//! VM is gone, and other VMs may share it. A disk is destroyed only once
//! every VBD still attached to it belongs to the deleted VM; until then it
//! is polled.

use futures::future::try_join_all;
use serde_json::json;
use tracing::{debug, info};

use crate::client::XapiClient;
use crate::error::{LifecycleError, LifecycleResult};
use crate::manager::VmLifecycleManager;
use crate::types::{OpaqueRef, VbdRecord, VdiRecord};

impl<C: XapiClient + ?Sized> VmLifecycleManager<C> {
    /// Destroy `vdi` once no VM other than `owner` is attached to it.
    ///
    /// Waits `reclaim.poll_delay_secs` between checks. Without a
    /// `reclaim.max_attempts` ceiling this waits for as long as the disk
    /// stays shared.
    pub async fn reclaim_disk(&self, vdi: &OpaqueRef, owner: &OpaqueRef) -> LifecycleResult<()> {
        let settings = &self.config().reclaim;
        let mut attempt: u32 = 1;

        loop {
            match self.is_disk_reclaimable(vdi, owner).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(LifecycleError::RecordNotFound { .. }) => {
                    debug!(vdi = %vdi, "VDI already gone");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            if settings.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(LifecycleError::DiskInUse {
                    reference: vdi.clone(),
                    attempts: attempt,
                });
            }

            debug!(
                vdi = %vdi,
                attempt = attempt,
                delay_secs = settings.poll_delay_secs,
                "VDI still attached to another VM, checking again later"
            );
            tokio::time::sleep(settings.poll_delay()).await;
            attempt += 1;
        }

        self.call("VDI.destroy", vec![json!(vdi)]).await?;
        info!(vdi = %vdi, owner = %owner, "VDI destroyed");
        Ok(())
    }

    /// Whether every VBD currently attached to `vdi` belongs to `owner`.
    ///
    /// VBDs that vanish between the two fetches no longer count.
    pub async fn is_disk_reclaimable(
        &self,
        vdi: &OpaqueRef,
        owner: &OpaqueRef,
    ) -> LifecycleResult<bool> {
        let record: VdiRecord = self.fetch(vdi).await?;
        if record.vbds.is_empty() {
            return Ok(true);
        }

        let owners = try_join_all(record.vbds.iter().map(|vbd| self.vbd_owner(vbd))).await?;
        Ok(owners.iter().flatten().all(|vm| vm == owner))
    }

    async fn vbd_owner(&self, vbd: &OpaqueRef) -> LifecycleResult<Option<OpaqueRef>> {
        match self.fetch::<VbdRecord>(vbd).await {
            Ok(record) => Ok(Some(record.vm)),
            Err(LifecycleError::RecordNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
