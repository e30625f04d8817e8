//! Quiesced VM snapshots with fallback to plain snapshots.
//!
//! `VM.snapshot_with_quiesce` is retried while the guest fails to quiesce.
//! A failed attempt can leave a half-created snapshot behind, named
//! `Snapshot of <vm uuid> [...]`; it is removed when it can be identified
//! unambiguously. Once quiescing is exhausted or unsupported, a plain
//! `VM.snapshot` is taken instead.

use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::client::{codes, fetch_records, XapiClient};
use crate::error::{LifecycleError, LifecycleResult};
use crate::logging::OpTimer;
use crate::manager::{DeleteOptions, VmLifecycleManager};
use crate::outcome::best_effort;
use crate::retry::RetryPolicy;
use crate::types::{OpaqueRef, VmRecord};

/// Errors after which a plain snapshot is taken instead of failing.
pub fn is_plain_snapshot_fallback(error: &LifecycleError) -> bool {
    matches!(
        error.code(),
        Some(
            codes::VM_SNAPSHOT_WITH_QUIESCE_NOT_SUPPORTED
                | codes::VM_BAD_POWER_STATE
                | codes::VM_SNAPSHOT_WITH_QUIESCE_FAILED
        )
    )
}

impl<C: XapiClient + ?Sized> VmLifecycleManager<C> {
    /// Snapshot `vm`, quiescing the guest when possible.
    ///
    /// `name_label` defaults to the VM's own name. The returned record is
    /// fetched after the snapshot was converted from a template into a
    /// regular VM record.
    pub async fn snapshot_vm(
        &self,
        vm: &VmRecord,
        name_label: Option<&str>,
    ) -> LifecycleResult<VmRecord> {
        let timer = OpTimer::new("snapshot_vm", vm.reference.as_str());
        let name_label = name_label.unwrap_or(&vm.name_label);
        let result = self.snapshot_vm_inner(vm, name_label).await;
        timer.finish_with_result(result.as_ref());
        result
    }

    async fn snapshot_vm_inner(&self, vm: &VmRecord, name_label: &str) -> LifecycleResult<VmRecord> {
        let settings = &self.config().quiesce;

        let quiesced = if vm.has_tag(&settings.opt_out_tag) {
            debug!(vm = %vm.reference, tag = %settings.opt_out_tag, "Quiesce disabled by tag");
            None
        } else {
            match self.snapshot_with_quiesce(&vm.reference, name_label).await {
                Ok(reference) => Some(reference),
                Err(error) if is_plain_snapshot_fallback(&error) => {
                    warn!(
                        vm = %vm.reference,
                        error = %error,
                        "Quiesced snapshot unavailable, falling back to plain snapshot"
                    );
                    None
                }
                Err(error) => return Err(error),
            }
        };

        let (snapshot, is_quiesced) = match quiesced {
            Some(reference) => (reference, true),
            None => {
                let reference = self
                    .call_for_ref("VM.snapshot", vec![json!(vm.reference), json!(name_label)])
                    .await?;
                (reference, false)
            }
        };

        let tag = async {
            if is_quiesced {
                best_effort(
                    "tag quiesced snapshot",
                    self.call("VM.add_tags", vec![json!(snapshot), json!(settings.success_tag)]),
                )
                .await
                .discard();
            }
        };
        let untemplate = self.call("VM.set_is_a_template", vec![json!(snapshot), json!(false)]);
        let ((), untemplated) = tokio::join!(tag, untemplate);
        untemplated?;

        let record: VmRecord = self.fetch(&snapshot).await?;
        info!(
            vm = %vm.reference,
            snapshot = %snapshot,
            quiesced = is_quiesced,
            "Snapshot created"
        );
        Ok(record)
    }

    /// Run `VM.snapshot_with_quiesce` under the quiesce retry policy.
    async fn snapshot_with_quiesce(
        &self,
        vm: &OpaqueRef,
        name_label: &str,
    ) -> LifecycleResult<OpaqueRef> {
        let policy = RetryPolicy::quiesce(&self.config().quiesce);
        let mut known = self.fetch::<VmRecord>(vm).await?;
        let mut attempt: u32 = 1;

        loop {
            let error = match self
                .call_for_ref("VM.snapshot_with_quiesce", vec![json!(vm), json!(name_label)])
                .await
            {
                Ok(reference) => return Ok(reference),
                Err(error) => error,
            };
            if !policy.is_retryable(&error) {
                return Err(error);
            }

            known = self.discard_broken_snapshot(known).await;

            if !policy.should_retry(attempt, &error) {
                return Err(error);
            }
            warn!(
                vm = %vm,
                attempt = attempt,
                max_attempts = policy.max_attempts,
                delay_secs = policy.delay.as_secs(),
                "Quiesce failed, retrying"
            );
            tokio::time::sleep(policy.delay).await;
            attempt += 1;
        }
    }

    /// Remove the snapshot a failed quiesce left behind, if exactly one new
    /// snapshot matches the naming XAPI uses for it.
    ///
    /// Returns the refreshed VM record, or `previous` if it could not be
    /// refreshed.
    async fn discard_broken_snapshot(&self, previous: VmRecord) -> VmRecord {
        let known: HashSet<OpaqueRef> = previous.snapshots.iter().cloned().collect();
        let prefix = previous.snapshot_name_prefix();

        let current = match self.fetch::<VmRecord>(&previous.reference).await {
            Ok(current) => current,
            Err(error) => {
                warn!(vm = %previous.reference, error = %error, "Cannot refresh VM after failed quiesce");
                return previous;
            }
        };

        let new_refs: Vec<OpaqueRef> = current
            .snapshots
            .iter()
            .filter(|reference| !known.contains(*reference))
            .cloned()
            .collect();
        if new_refs.is_empty() {
            return current;
        }

        let created: Vec<VmRecord> = match fetch_records(self.client(), &new_refs).await {
            Ok(created) => created,
            Err(error) => {
                warn!(vm = %current.reference, error = %error, "Cannot inspect new snapshots");
                return current;
            }
        };
        let broken: Vec<&VmRecord> = created
            .iter()
            .filter(|snapshot| snapshot.name_label.starts_with(&prefix))
            .collect();

        match broken.as_slice() {
            [snapshot] => {
                info!(vm = %current.reference, snapshot = %snapshot.reference, "Deleting broken snapshot");
                best_effort(
                    "delete broken snapshot",
                    self.delete_vm(snapshot, DeleteOptions::default()),
                )
                .await
                .discard();
            }
            [] => {}
            several => {
                warn!(
                    vm = %current.reference,
                    candidates = several.len(),
                    "Several possible broken snapshots, leaving them in place"
                );
            }
        }

        current
    }
}
