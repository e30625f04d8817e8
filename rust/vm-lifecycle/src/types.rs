//! Records of the remote object model.
//!
//! Records are read-only snapshots of server-side state. They are never built
//! locally outside of tests; every mutation goes through an XAPI call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reference XAPI uses for "no object".
pub const NULL_REF: &str = "OpaqueRef:NULL";

const OPAQUE_REF_PREFIX: &str = "OpaqueRef:";

/// Session-scoped identifier of a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueRef(String);

impl OpaqueRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn null() -> Self {
        Self(NULL_REF.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A reference is usable only if it is non-null and shaped like
    /// `OpaqueRef:<lowercase alphanumerics and dashes>`.
    pub fn is_valid(&self) -> bool {
        if self.0 == NULL_REF {
            return false;
        }
        match self.0.strip_prefix(OPAQUE_REF_PREFIX) {
            Some(id) => {
                !id.is_empty()
                    && id
                        .chars()
                        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == '-')
            }
            None => false,
        }
    }
}

impl Default for OpaqueRef {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// XAPI classes this crate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Vm,
    Vbd,
    Vdi,
}

impl ObjectClass {
    /// Class name as used in XAPI method names (`VM.get_record`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectClass::Vm => "VM",
            ObjectClass::Vbd => "VBD",
            ObjectClass::Vdi => "VDI",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed record fetched from the control plane.
pub trait XapiRecord: DeserializeOwned + Send {
    const CLASS: ObjectClass;

    /// Stamp the record with the reference it was fetched by.
    fn set_reference(&mut self, reference: OpaqueRef);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Halted,
    Running,
    Suspended,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    #[serde(skip)]
    pub reference: OpaqueRef,
    pub uuid: String,
    #[serde(default)]
    pub name_label: String,
    pub power_state: PowerState,
    /// Operation name to reason; presence of a key blocks the operation
    #[serde(default)]
    pub blocked_operations: HashMap<String, String>,
    #[serde(default)]
    pub other_config: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "VBDs", default)]
    pub vbds: Vec<OpaqueRef>,
    #[serde(default)]
    pub snapshots: Vec<OpaqueRef>,
    #[serde(default)]
    pub is_a_template: bool,
    #[serde(default)]
    pub is_a_snapshot: bool,
}

impl VmRecord {
    pub fn is_operation_blocked(&self, operation: &str) -> bool {
        self.blocked_operations.contains_key(operation)
    }

    pub fn is_default_template(&self) -> bool {
        self.other_config
            .get("default_template")
            .is_some_and(|value| value == "true")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Name prefix XAPI gives snapshots it creates on its own behalf.
    pub fn snapshot_name_prefix(&self) -> String {
        format!("Snapshot of {} [", self.uuid)
    }
}

impl XapiRecord for VmRecord {
    const CLASS: ObjectClass = ObjectClass::Vm;

    fn set_reference(&mut self, reference: OpaqueRef) {
        self.reference = reference;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VbdType {
    Disk,
    #[serde(rename = "CD")]
    Cd,
    Floppy,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VbdRecord {
    #[serde(skip)]
    pub reference: OpaqueRef,
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: VbdType,
    #[serde(rename = "VM")]
    pub vm: OpaqueRef,
    #[serde(rename = "VDI", default)]
    pub vdi: OpaqueRef,
}

impl VbdRecord {
    /// The VDI this VBD attaches, if it is a disk with a usable reference.
    pub fn attached_disk(&self) -> Option<&OpaqueRef> {
        (self.kind == VbdType::Disk && self.vdi.is_valid()).then_some(&self.vdi)
    }
}

impl XapiRecord for VbdRecord {
    const CLASS: ObjectClass = ObjectClass::Vbd;

    fn set_reference(&mut self, reference: OpaqueRef) {
        self.reference = reference;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdiRecord {
    #[serde(skip)]
    pub reference: OpaqueRef,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name_label: String,
    /// Every VBD attached to this disk, across all VMs
    #[serde(rename = "VBDs", default)]
    pub vbds: Vec<OpaqueRef>,
}

impl VdiRecord {
    /// Stable identity of the disk: its UUID, or its reference when the
    /// record carries none.
    pub fn stable_id(&self) -> &str {
        if self.uuid.is_empty() {
            self.reference.as_str()
        } else {
            &self.uuid
        }
    }
}

impl XapiRecord for VdiRecord {
    const CLASS: ObjectClass = ObjectClass::Vdi;

    fn set_reference(&mut self, reference: OpaqueRef) {
        self.reference = reference;
    }
}

/// Disks of a VM keyed by stable id, captured while the VM still exists.
pub type DiskMap = BTreeMap<String, VdiRecord>;
