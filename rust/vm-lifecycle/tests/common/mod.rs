//! In-memory stand-in for the XAPI control plane.
//!
//! Keeps VM/VBD/VDI records as JSON objects, applies the mutating calls the
//! lifecycle manager issues and records every one of them.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use vm_lifecycle::client::codes;
use vm_lifecycle::config::LifecycleConfig;
use vm_lifecycle::types::{ObjectClass, NULL_REF};
use vm_lifecycle::{LifecycleError, LifecycleResult, OpaqueRef, VmLifecycleManager, VmRecord, XapiClient};

/// A recorded mutating call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl RecordedCall {
    pub fn target(&self) -> &str {
        self.args.first().and_then(Value::as_str).unwrap_or_default()
    }
}

/// What the next `VM.snapshot_with_quiesce` does.
#[derive(Debug, Clone)]
pub enum QuiesceOutcome {
    Succeed,
    /// Fail with `code`, leaving `broken` half-created snapshots behind.
    Fail { code: &'static str, broken: usize },
}

#[derive(Debug, Default)]
struct FakeState {
    vms: HashMap<String, Value>,
    vbds: HashMap<String, Value>,
    vdis: HashMap<String, Value>,
    calls: Vec<RecordedCall>,
    failures: HashMap<String, VecDeque<&'static str>>,
    quiesce_script: VecDeque<QuiesceOutcome>,
    next_id: u64,
}

impl FakeState {
    fn next_ref(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("OpaqueRef:{kind}-{}", self.next_id)
    }

    fn table(&mut self, class: ObjectClass) -> &mut HashMap<String, Value> {
        match class {
            ObjectClass::Vm => &mut self.vms,
            ObjectClass::Vbd => &mut self.vbds,
            ObjectClass::Vdi => &mut self.vdis,
        }
    }

    fn vm_mut(&mut self, reference: &str) -> LifecycleResult<&mut Value> {
        self.vms
            .get_mut(reference)
            .ok_or_else(|| handle_invalid("VM", reference))
    }

    fn create_snapshot(&mut self, parent: &str, name_label: &str) -> LifecycleResult<String> {
        let reference = self.next_ref("snap");
        let uuid = format!("uuid-{}", self.next_id);
        self.vm_mut(parent)?["snapshots"]
            .as_array_mut()
            .expect("snapshots array")
            .push(json!(reference));
        self.vms.insert(
            reference.clone(),
            vm_value(&uuid, name_label, "Halted", true),
        );
        Ok(reference)
    }

    fn remove_vbd(&mut self, vbd: &str) {
        if let Some(record) = self.vbds.remove(vbd) {
            let vdi = record["VDI"].as_str().unwrap_or_default().to_string();
            if let Some(vdi) = self.vdis.get_mut(&vdi) {
                remove_from_list(&mut vdi["VBDs"], vbd);
            }
            let vm = record["VM"].as_str().unwrap_or_default().to_string();
            if let Some(vm) = self.vms.get_mut(&vm) {
                remove_from_list(&mut vm["VBDs"], vbd);
            }
        }
    }

    fn dispatch(&mut self, method: &str, args: &[Value]) -> LifecycleResult<Value> {
        let target = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

        match method {
            "VM.hard_shutdown" => {
                self.vm_mut(&target)?["power_state"] = json!("Halted");
                Ok(Value::Null)
            }
            "VM.set_is_a_template" => {
                self.vm_mut(&target)?["is_a_template"] = arg(1);
                Ok(Value::Null)
            }
            "VM.remove_from_blocked_operations" => {
                let key = arg(1).as_str().unwrap_or_default().to_string();
                if let Some(map) = self.vm_mut(&target)?["blocked_operations"].as_object_mut() {
                    map.remove(&key);
                }
                Ok(Value::Null)
            }
            "VM.remove_from_other_config" => {
                let key = arg(1).as_str().unwrap_or_default().to_string();
                if let Some(map) = self.vm_mut(&target)?["other_config"].as_object_mut() {
                    map.remove(&key);
                }
                Ok(Value::Null)
            }
            "VM.add_tags" => {
                let tag = arg(1);
                self.vm_mut(&target)?["tags"]
                    .as_array_mut()
                    .expect("tags array")
                    .push(tag);
                Ok(Value::Null)
            }
            "VM.destroy" => {
                let record = self
                    .vms
                    .remove(&target)
                    .ok_or_else(|| handle_invalid("VM", &target))?;
                for vbd in string_list(&record["VBDs"]) {
                    self.remove_vbd(&vbd);
                }
                for vm in self.vms.values_mut() {
                    remove_from_list(&mut vm["snapshots"], &target);
                }
                Ok(Value::Null)
            }
            "VDI.destroy" => {
                let vdi = self
                    .vdis
                    .get(&target)
                    .ok_or_else(|| handle_invalid("VDI", &target))?;
                if !string_list(&vdi["VBDs"]).is_empty() {
                    return Err(LifecycleError::api("VDI_IN_USE", [target]));
                }
                self.vdis.remove(&target);
                Ok(Value::Null)
            }
            "VM.snapshot" => {
                let name = arg(1).as_str().unwrap_or_default().to_string();
                Ok(json!(self.create_snapshot(&target, &name)?))
            }
            "VM.snapshot_with_quiesce" => {
                match self.quiesce_script.pop_front().unwrap_or(QuiesceOutcome::Succeed) {
                    QuiesceOutcome::Succeed => {
                        let name = arg(1).as_str().unwrap_or_default().to_string();
                        Ok(json!(self.create_snapshot(&target, &name)?))
                    }
                    QuiesceOutcome::Fail { code, broken } => {
                        let uuid = self.vm_mut(&target)?["uuid"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        for i in 0..broken {
                            let name = format!("Snapshot of {uuid} [2026-10-19T10:0{i}:00Z]");
                            self.create_snapshot(&target, &name)?;
                        }
                        Err(LifecycleError::api(code, [target]))
                    }
                }
            }
            other => Err(LifecycleError::api("MESSAGE_METHOD_UNKNOWN", [other])),
        }
    }
}

fn handle_invalid(class: &str, reference: &str) -> LifecycleError {
    LifecycleError::api(codes::HANDLE_INVALID, [class, reference])
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn remove_from_list(list: &mut Value, item: &str) {
    if let Some(items) = list.as_array_mut() {
        items.retain(|v| v.as_str() != Some(item));
    }
}

fn vm_value(uuid: &str, name_label: &str, power_state: &str, is_snapshot: bool) -> Value {
    json!({
        "uuid": uuid,
        "name_label": name_label,
        "power_state": power_state,
        "blocked_operations": {},
        "other_config": {},
        "tags": [],
        "VBDs": [],
        "snapshots": [],
        "is_a_template": is_snapshot,
        "is_a_snapshot": is_snapshot,
    })
}

/// Fake XAPI pool.
#[derive(Debug, Default)]
pub struct FakeXapi {
    state: Mutex<FakeState>,
}

impl FakeXapi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_vm(&self, name_label: &str, power_state: &str) -> OpaqueRef {
        let mut state = self.state.lock();
        let reference = state.next_ref("vm");
        let uuid = format!("uuid-{}", state.next_id);
        state
            .vms
            .insert(reference.clone(), vm_value(&uuid, name_label, power_state, false));
        OpaqueRef::new(reference)
    }

    /// Edit the raw record of a VM.
    pub fn update_vm(&self, vm: &OpaqueRef, edit: impl FnOnce(&mut Value)) {
        let mut state = self.state.lock();
        edit(state.vms.get_mut(vm.as_str()).expect("unknown VM"));
    }

    pub fn block_destroy(&self, vm: &OpaqueRef) {
        self.update_vm(vm, |record| {
            record["blocked_operations"]["destroy"] = json!("protected");
        });
    }

    pub fn mark_default_template(&self, vm: &OpaqueRef) {
        self.update_vm(vm, |record| {
            record["other_config"]["default_template"] = json!("true");
            record["is_a_template"] = json!(true);
        });
    }

    pub fn add_tag(&self, vm: &OpaqueRef, tag: &str) {
        self.update_vm(vm, |record| {
            record["tags"].as_array_mut().expect("tags array").push(json!(tag));
        });
    }

    /// Create a disk and attach it to `vm`. Returns `(vdi, vbd)`.
    pub fn add_disk(&self, vm: &OpaqueRef) -> (OpaqueRef, OpaqueRef) {
        let vdi = {
            let mut state = self.state.lock();
            let reference = state.next_ref("vdi");
            let uuid = format!("uuid-{}", state.next_id);
            state.vdis.insert(
                reference.clone(),
                json!({ "uuid": uuid, "name_label": "disk", "VBDs": [] }),
            );
            OpaqueRef::new(reference)
        };
        let vbd = self.attach(vm, &vdi, "Disk");
        (vdi, vbd)
    }

    /// Attach an existing disk to `vm`, returning the new VBD.
    pub fn attach(&self, vm: &OpaqueRef, vdi: &OpaqueRef, kind: &str) -> OpaqueRef {
        let mut state = self.state.lock();
        let reference = state.next_ref("vbd");
        let uuid = format!("uuid-{}", state.next_id);
        state.vbds.insert(
            reference.clone(),
            json!({ "uuid": uuid, "type": kind, "VM": vm.as_str(), "VDI": vdi.as_str() }),
        );
        state.vms.get_mut(vm.as_str()).expect("unknown VM")["VBDs"]
            .as_array_mut()
            .expect("VBDs array")
            .push(json!(reference));
        if let Some(record) = state.vdis.get_mut(vdi.as_str()) {
            record["VBDs"]
                .as_array_mut()
                .expect("VBDs array")
                .push(json!(reference));
        }
        OpaqueRef::new(reference)
    }

    /// An empty CD drive.
    pub fn add_cd_drive(&self, vm: &OpaqueRef) -> OpaqueRef {
        self.attach(vm, &OpaqueRef::new(NULL_REF), "CD")
    }

    pub fn add_snapshot(&self, vm: &OpaqueRef, name_label: &str) -> OpaqueRef {
        let mut state = self.state.lock();
        OpaqueRef::new(
            state
                .create_snapshot(vm.as_str(), name_label)
                .expect("unknown VM"),
        )
    }

    pub fn detach(&self, vbd: &OpaqueRef) {
        self.state.lock().remove_vbd(vbd.as_str());
    }

    /// Make the next call to `method` fail with `code`.
    pub fn fail_next(&self, method: &str, code: &'static str) {
        self.state
            .lock()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(code);
    }

    pub fn script_quiesce(&self, outcomes: impl IntoIterator<Item = QuiesceOutcome>) {
        self.state.lock().quiesce_script.extend(outcomes);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|c| c.method.clone()).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Position of the first call to `method`.
    pub fn position(&self, method: &str) -> Option<usize> {
        self.state.lock().calls.iter().position(|c| c.method == method)
    }

    pub fn has_vm(&self, vm: &OpaqueRef) -> bool {
        self.state.lock().vms.contains_key(vm.as_str())
    }

    pub fn has_vdi(&self, vdi: &OpaqueRef) -> bool {
        self.state.lock().vdis.contains_key(vdi.as_str())
    }

    pub fn snapshots_of(&self, vm: &OpaqueRef) -> Vec<String> {
        let state = self.state.lock();
        string_list(&state.vms[vm.as_str()]["snapshots"])
    }

    /// Typed record as the manager would see it.
    pub fn vm(&self, vm: &OpaqueRef) -> VmRecord {
        let value = self.state.lock().vms[vm.as_str()].clone();
        let mut record: VmRecord = serde_json::from_value(value).expect("valid VM record");
        record.reference = vm.clone();
        record
    }
}

#[async_trait]
impl XapiClient for FakeXapi {
    async fn call(&self, method: &str, args: Vec<Value>) -> LifecycleResult<Value> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method: method.to_string(),
            args: args.clone(),
        });
        if let Some(code) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            let target = args.first().and_then(Value::as_str).unwrap_or_default();
            return Err(LifecycleError::api(code, [target]));
        }
        state.dispatch(method, &args)
    }

    async fn get_record(&self, class: ObjectClass, reference: &OpaqueRef) -> LifecycleResult<Value> {
        let mut state = self.state.lock();
        state
            .table(class)
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| handle_invalid(class.as_str(), reference.as_str()))
    }

    async fn get_ref_by_uuid(&self, class: ObjectClass, uuid: &str) -> LifecycleResult<OpaqueRef> {
        let mut state = self.state.lock();
        state
            .table(class)
            .iter()
            .find(|(_, record)| record["uuid"] == uuid)
            .map(|(reference, _)| OpaqueRef::new(reference.clone()))
            .ok_or_else(|| LifecycleError::api("UUID_INVALID", [class.as_str(), uuid]))
    }
}

pub fn manager(fake: &Arc<FakeXapi>) -> VmLifecycleManager<FakeXapi> {
    VmLifecycleManager::new(Arc::clone(fake), LifecycleConfig::default())
}

pub fn manager_with(fake: &Arc<FakeXapi>, config: LifecycleConfig) -> VmLifecycleManager<FakeXapi> {
    VmLifecycleManager::new(Arc::clone(fake), config)
}
