//! The typed meta tree that accompanies a packaged BPF object.
//!
//! The meta document names the object's maps, programs and data-section
//! variables, describes how events should be decoded, and carries the poll
//! tuning knobs. Unknown keys are ignored; optional fields fall back to the
//! documented defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

fn default_perf_buffer_pages() -> u64 {
    64
}
fn default_perf_buffer_time_ms() -> u64 {
    10
}
fn default_poll_timeout_ms() -> i32 {
    100
}
fn default_true() -> bool {
    true
}
fn default_unit() -> String {
    "(unit)".to_string()
}
fn default_tc_ifindex() -> i32 {
    1
}
fn default_tc_attach_point() -> String {
    "BPF_TC_INGRESS".to_string()
}
fn default_tc_one() -> u32 {
    1
}

/// Top-level meta document for one packaged object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub bpf_skel: SkeletonMeta,
    /// Struct descriptions for exported events; at most one is used.
    #[serde(default)]
    pub export_types: Vec<ExportStructMeta>,
    /// Per-CPU pages for the perf buffer consumer.
    #[serde(default = "default_perf_buffer_pages")]
    pub perf_buffer_pages: u64,
    #[serde(default = "default_perf_buffer_time_ms")]
    pub perf_buffer_time_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: i32,
    /// Print the column header once before plain-text events.
    #[serde(default = "default_true")]
    pub print_header: bool,
    /// Verbose diagnostics from the loader while running.
    #[serde(default)]
    pub debug_verbose: bool,
}

impl ObjectMeta {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::MalformedMeta(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedMeta(e.to_string()))
    }
}

/// Skeleton description: everything open-from-memory needs to rebuild the
/// object skeleton, in object order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonMeta {
    pub obj_name: String,
    pub maps: Vec<MapMeta>,
    pub progs: Vec<ProgMeta>,
    pub data_sections: Vec<DataSectionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<DocMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMeta {
    pub name: String,
    /// Logical slot of the map: `rodata`, `bss`, or a plain map ident.
    pub ident: String,
    #[serde(default)]
    pub mmaped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleMeta>,
}

/// Sampling config for an associative map snapshotted on an interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    #[serde(alias = "interval")]
    pub interval_ms: u64,
    /// One of `log2_hist`, `linear_hist`, or empty for plain key-value.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Axis label for histogram output.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Drain the map after each snapshot.
    #[serde(default = "default_true")]
    pub clear_map: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgMeta {
    pub name: String,
    /// Free-form attach hook tag; `tc` selects the traffic-control
    /// specialization after generic attach.
    pub attach: String,
    /// Whether attaching produces a link object to hold.
    pub link: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tchook: Option<TcHookMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcopts: Option<TcOptsMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcHookMeta {
    #[serde(default = "default_tc_ifindex")]
    pub ifindex: i32,
    #[serde(default = "default_tc_attach_point")]
    pub attach_point: String,
}

impl Default for TcHookMeta {
    fn default() -> Self {
        Self {
            ifindex: default_tc_ifindex(),
            attach_point: default_tc_attach_point(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcOptsMeta {
    #[serde(default = "default_tc_one")]
    pub handle: u32,
    #[serde(default = "default_tc_one")]
    pub priority: u32,
}

impl Default for TcOptsMeta {
    fn default() -> Self {
        Self {
            handle: default_tc_one(),
            priority: default_tc_one(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSectionMeta {
    pub name: String,
    pub variables: Vec<VariableMeta>,
}

/// One global variable in a data section, with its command-line binding and
/// the current initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    pub name: String,
    /// Printable C type, e.g. `unsigned long long` or `char[16]`.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub size: usize,
    /// Byte offset inside the section.
    #[serde(default)]
    pub offset: usize,
    /// Type id into the object's debug-type table.
    #[serde(default)]
    pub type_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "CmdArgMeta::is_empty")]
    pub cmdarg: CmdArgMeta,
    /// Current initial value; replaced in place by the argument binder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmdArgMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl CmdArgMeta {
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.long.is_none() && self.short.is_none() && self.help.is_none()
    }
}

/// A struct description used to label exported events, layered over what the
/// object's own type table says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportStructMeta {
    pub name: String,
    pub members: Vec<ExportMemberMeta>,
    pub size: u32,
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMemberMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Optional documentation block feeding usage strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_META: &str = r#"{
        "bpf_skel": {
            "obj_name": "runqlat",
            "maps": [
                {"name": "runqlat_bpf_rodata", "ident": "rodata", "mmaped": true},
                {"name": "hists", "ident": "hists",
                 "sample": {"interval": 1000, "type": "log2_hist", "unit": "usec"}}
            ],
            "progs": [
                {"name": "handle_wakeup", "attach": "tp_btf/sched_wakeup", "link": true}
            ],
            "data_sections": [
                {"name": ".rodata", "variables": [
                    {"name": "targ_ms", "type": "bool", "size": 1, "offset": 0,
                     "type_id": 7, "cmdarg": {"short": "m", "help": "millisecond histogram"}}
                ]}
            ],
            "doc": {"version": "0.3.0", "brief": "Summarize run queue latency"}
        },
        "export_types": [
            {"name": "hist", "size": 112, "type_id": 12,
             "members": [{"name": "slots", "type": "unsigned int[27]"}]}
        ],
        "poll_timeout_ms": 200
    }"#;

    #[test]
    fn parse_full_meta() {
        let meta = ObjectMeta::from_json_str(FULL_META).unwrap();
        assert_eq!(meta.bpf_skel.obj_name, "runqlat");
        assert_eq!(meta.bpf_skel.maps.len(), 2);
        let sample = meta.bpf_skel.maps[1].sample.as_ref().unwrap();
        assert_eq!(sample.interval_ms, 1000);
        assert_eq!(sample.kind, "log2_hist");
        assert_eq!(sample.unit, "usec");
        assert!(sample.clear_map);
        assert_eq!(meta.poll_timeout_ms, 200);
        // untouched knobs keep their defaults
        assert_eq!(meta.perf_buffer_pages, 64);
        assert_eq!(meta.perf_buffer_time_ms, 10);
        assert!(meta.print_header);
        assert!(!meta.debug_verbose);
        let var = &meta.bpf_skel.data_sections[0].variables[0];
        assert_eq!(var.cmdarg.short.as_deref(), Some("m"));
        assert!(var.value.is_none());
    }

    #[test]
    fn round_trip_preserves_fields() {
        let meta = ObjectMeta::from_json_str(FULL_META).unwrap();
        let text = meta.to_json_string().unwrap();
        let again = ObjectMeta::from_json_str(&text).unwrap();
        assert_eq!(meta, again);
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = ObjectMeta::from_json_str(r#"{"bpf_skel": {"obj_name": "x"}}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("maps"), "unexpected message: {msg}");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let meta = ObjectMeta::from_json_str(
            r#"{"bpf_skel": {"obj_name": "x", "maps": [], "progs": [],
                "data_sections": [], "something_new": 1}, "future_knob": true}"#,
        )
        .unwrap();
        assert_eq!(meta.bpf_skel.obj_name, "x");
    }
}
