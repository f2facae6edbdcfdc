//! Type-directed event exporter.
//!
//! The exporter intersects the meta's export struct description with the
//! object's debug-type table into a checked layout vector, then renders each
//! opaque event or key/value sample as a plain-text row, a JSON object or a
//! raw byte passthrough.

pub mod hist;

use std::fmt::Write as _;

use chrono::Local;
use log::warn;

use crate::btf::{dump, member_bits, TypeId, TypeTable};
use crate::error::{Error, Result};
use crate::meta::{ExportStructMeta, SampleMeta};

/// Output rendering mode, stable across the C ABI (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    PlainText,
    Json,
    Raw,
}

impl ExportFormat {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::PlainText),
            1 => Some(Self::Json),
            2 => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Sink owning one rendered record (or the raw bytes in raw mode).
pub type EventSink = Box<dyn FnMut(&[u8]) + Send>;

/// One exported struct member with its layout checked against the object.
#[derive(Debug, Clone)]
pub struct CheckedMember {
    pub name: String,
    /// Printable type used for bespoke rendering decisions.
    pub type_str: String,
    pub type_id: TypeId,
    pub bit_offset: u32,
    pub bit_size: u32,
    pub size: usize,
    /// Column position inside the plain-text header.
    pub output_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleRender {
    KeyValue,
    Log2Hist,
    LinearHist,
}

struct SampleSetup {
    render: SampleRender,
    unit: String,
}

/// Per-skeleton exporter; borrows the loaded object's type table.
pub struct EventExporter<'btf> {
    format: ExportFormat,
    table: &'btf TypeTable,
    sink: Option<EventSink>,
    buffer: String,
    value_members: Vec<CheckedMember>,
    key_members: Vec<CheckedMember>,
    sample: Option<SampleSetup>,
}

impl std::fmt::Debug for EventExporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventExporter")
            .field("format", &self.format)
            .field("sink", &self.sink.as_ref().map(|_| "<fn>"))
            .field("buffer", &self.buffer)
            .field("value_members", &self.value_members)
            .field("key_members", &self.key_members)
            .finish_non_exhaustive()
    }
}

impl<'btf> EventExporter<'btf> {
    /// Event-path setup for ring-buffer and perf-array packages.
    pub fn for_events(
        format: ExportFormat,
        export_types: &[ExportStructMeta],
        table: &'btf TypeTable,
        print_header: bool,
        sink: Option<EventSink>,
    ) -> Result<Self> {
        if export_types.is_empty() {
            return Err(Error::NoMatchingMembers);
        }
        if export_types.len() > 1 {
            warn!("multiple export types are not supported; using the first struct");
        }
        let value_members = check_event_members(table, &export_types[0])?;
        let mut exporter = Self {
            format,
            table,
            sink,
            buffer: String::new(),
            value_members,
            key_members: Vec::new(),
            sample: None,
        };
        if format == ExportFormat::PlainText && print_header {
            exporter.emit_header();
        }
        Ok(exporter)
    }

    /// Sample-path setup for interval-snapshotted maps.
    pub fn for_sample(
        format: ExportFormat,
        key_type_id: TypeId,
        value_type_id: TypeId,
        sample: &SampleMeta,
        export_types: &[ExportStructMeta],
        table: &'btf TypeTable,
        print_header: bool,
        sink: Option<EventSink>,
    ) -> Result<Self> {
        if export_types.len() > 1 {
            warn!("multiple export types are not supported; using the first struct");
        }
        let value_meta = if export_types.len() == 1 {
            Some(&export_types[0])
        } else {
            None
        };
        let key_members = check_sample_members(table, key_type_id, None)?;
        let value_members = check_sample_members(table, value_type_id, value_meta)?;
        let render = match sample.kind.as_str() {
            "log2_hist" => SampleRender::Log2Hist,
            "linear_hist" => SampleRender::LinearHist,
            "" => SampleRender::KeyValue,
            other => {
                warn!("unknown sample map type `{other}`, printing key-value");
                SampleRender::KeyValue
            }
        };
        let mut exporter = Self {
            format,
            table,
            sink,
            buffer: String::new(),
            value_members,
            key_members,
            sample: Some(SampleSetup {
                render,
                unit: sample.unit.clone(),
            }),
        };
        if format == ExportFormat::PlainText
            && render == SampleRender::KeyValue
            && print_header
        {
            exporter.emit_header();
        }
        Ok(exporter)
    }

    /// Column layout snapshot, exposed for tests and diagnostics.
    pub fn value_members(&self) -> &[CheckedMember] {
        &self.value_members
    }

    /// Handle one event delivered by a ring or perf buffer.
    pub fn handle_event(&mut self, data: &[u8]) -> Result<()> {
        match self.format {
            ExportFormat::Raw => {
                if let Some(sink) = &mut self.sink {
                    sink(data);
                }
            }
            ExportFormat::Json => {
                self.buffer.clear();
                write_members_json(&mut self.buffer, self.table, &self.value_members, data)?;
                self.emit_record();
            }
            ExportFormat::PlainText => {
                self.buffer.clear();
                let now = Local::now().format("%H:%M:%S").to_string();
                let _ = write!(self.buffer, "{now:<8} ");
                write_members_text(&mut self.buffer, self.table, &self.value_members, data)?;
                self.emit_record();
            }
        }
        Ok(())
    }

    /// Handle one key/value pair observed during a sample interval.
    pub fn handle_sample(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.format {
            ExportFormat::Raw => {
                if let Some(sink) = &mut self.sink {
                    sink(value);
                }
            }
            ExportFormat::Json => {
                self.buffer.clear();
                self.buffer.push_str("{\"key\":");
                write_members_json(&mut self.buffer, self.table, &self.key_members, key)?;
                self.buffer.push_str(",\"value\":");
                write_members_json(&mut self.buffer, self.table, &self.value_members, value)?;
                self.buffer.push('}');
                self.emit_record();
            }
            ExportFormat::PlainText => {
                let render = self
                    .sample
                    .as_ref()
                    .map(|s| s.render)
                    .unwrap_or(SampleRender::KeyValue);
                match render {
                    SampleRender::KeyValue => self.render_sample_row(key, value)?,
                    SampleRender::Log2Hist | SampleRender::LinearHist => {
                        self.render_sample_hist(key, value, render)?
                    }
                }
            }
        }
        Ok(())
    }

    fn render_sample_row(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.buffer.clear();
        let now = Local::now().format("%H:%M:%S").to_string();
        let _ = write!(self.buffer, "{now:<8} ");
        write_members_text(&mut self.buffer, self.table, &self.key_members, key)?;
        write_members_text(&mut self.buffer, self.table, &self.value_members, value)?;
        self.emit_record();
        Ok(())
    }

    fn render_sample_hist(&mut self, key: &[u8], value: &[u8], render: SampleRender) -> Result<()> {
        self.buffer.clear();
        self.buffer.push_str("key = ");
        write_members_text(&mut self.buffer, self.table, &self.key_members, key)?;
        self.buffer.push('\n');

        let mut slots: Option<(usize, usize)> = None;
        for member in &self.value_members {
            let offset = (member.bit_offset / 8) as usize;
            if member.name == "slots" {
                slots = Some((offset, member.size / 4));
                continue;
            }
            let _ = write!(self.buffer, "{} = ", member.name);
            write_member_value(&mut self.buffer, self.table, member, value, false)?;
            self.buffer.push('\n');
        }
        let Some((offset, count)) = slots else {
            return Err(Error::PollFatal(
                "histogram value struct has no `slots` member".to_string(),
            ));
        };
        let mut vals = Vec::with_capacity(count);
        for i in 0..count {
            let at = offset + i * 4;
            let bytes = value.get(at..at + 4).ok_or_else(|| {
                Error::PollFatal(format!("sample value buffer too short for slot {i}"))
            })?;
            vals.push(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }
        let unit = self
            .sample
            .as_ref()
            .map(|s| s.unit.clone())
            .unwrap_or_else(|| "(unit)".to_string());
        match render {
            SampleRender::LinearHist => {
                hist::render_linear_hist(&mut self.buffer, &vals, 0, 1, &unit)
            }
            _ => hist::render_log2_hist(&mut self.buffer, &vals, &unit),
        }
        self.emit_record();
        Ok(())
    }

    /// Build and emit the plain-text header, assigning column offsets.
    fn emit_header(&mut self) {
        self.buffer.clear();
        self.buffer.push_str("TIME     ");
        let mut header = std::mem::take(&mut self.buffer);
        for member in self
            .key_members
            .iter_mut()
            .chain(self.value_members.iter_mut())
        {
            member.output_offset = header.len();
            let label = member.name.to_uppercase();
            header.push_str(&label);
            for _ in label.len()..6 {
                header.push(' ');
            }
            header.push_str("  ");
        }
        self.buffer = header;
        self.emit_record();
    }

    fn emit_record(&mut self) {
        if let Some(sink) = &mut self.sink {
            sink(self.buffer.as_bytes());
        } else {
            println!("{}", self.buffer);
        }
    }
}

/// Intersect the meta struct description with the object struct, in meta
/// member order.
fn check_event_members(
    table: &TypeTable,
    struct_meta: &ExportStructMeta,
) -> Result<Vec<CheckedMember>> {
    let resolved = table.skip_mods_and_typedefs(struct_meta.type_id)?;
    if !table.is_struct(resolved) {
        warn!(
            "export type id {} is not a struct in the object",
            struct_meta.type_id
        );
        return Err(Error::NoMatchingMembers);
    }
    if table.name_by_id(resolved) != struct_meta.name {
        warn!(
            "export struct name {} does not match object type {}",
            struct_meta.name,
            table.name_by_id(resolved)
        );
    }
    let (kflag, members) = table.struct_members(resolved)?;
    let mut checked = Vec::new();
    for meta_member in &struct_meta.members {
        let Some(member) = members
            .iter()
            .find(|m| m.name.as_deref() == Some(meta_member.name.as_str()))
        else {
            warn!(
                "export member {} not present in object struct {}",
                meta_member.name, struct_meta.name
            );
            continue;
        };
        let (bit_offset, bit_size) = member_bits(kflag, member.offset);
        if bit_size != 0 || bit_offset % 8 != 0 {
            return Err(Error::Unsupported(format!(
                "bitfield member {} cannot be exported",
                meta_member.name
            )));
        }
        checked.push(CheckedMember {
            name: meta_member.name.clone(),
            type_str: meta_member.ty.clone(),
            type_id: member.type_id,
            bit_offset,
            bit_size,
            size: table.resolve_size(member.type_id)?,
            output_offset: 0,
        });
    }
    if checked.is_empty() {
        return Err(Error::NoMatchingMembers);
    }
    Ok(checked)
}

/// Derive checked members for a sample key or value type purely from the
/// object, re-labeling from meta where the printable types agree.
fn check_sample_members(
    table: &TypeTable,
    type_id: TypeId,
    meta: Option<&ExportStructMeta>,
) -> Result<Vec<CheckedMember>> {
    let resolved = table.skip_mods_and_typedefs(type_id)?;
    let mut meta = meta;
    if let Some(m) = meta {
        if m.name != table.name_by_id(resolved) {
            warn!(
                "export type name {} does not match object type {}",
                m.name,
                table.name_by_id(resolved)
            );
            meta = None;
        }
    }
    if !table.is_struct(resolved) {
        // single scalar or array: one pseudo-member covering the whole value
        return Ok(vec![CheckedMember {
            name: table.name_by_id(resolved).to_string(),
            type_str: table.emit_decl(resolved)?,
            type_id: resolved,
            bit_offset: 0,
            bit_size: 0,
            size: table.resolve_size(resolved)?,
            output_offset: 0,
        }]);
    }
    let (kflag, members) = table.struct_members(resolved)?;
    if let Some(m) = meta {
        if m.members.len() != members.len() {
            warn!(
                "export type {} has {} members, object struct has {}",
                m.name,
                m.members.len(),
                members.len()
            );
            meta = None;
        }
    }
    let mut checked = Vec::new();
    for (i, member) in members.iter().enumerate() {
        let (bit_offset, bit_size) = member_bits(kflag, member.offset);
        if bit_size != 0 || bit_offset % 8 != 0 {
            return Err(Error::Unsupported(format!(
                "bitfield member {} cannot be exported",
                member.name.as_deref().unwrap_or("(anon)")
            )));
        }
        let derived_name = member.name.clone().unwrap_or_else(|| "(anon)".to_string());
        let derived_ty = table.emit_decl(member.type_id)?;
        let (name, type_str) = match meta.map(|m| &m.members[i]) {
            // meta re-labels a member only when its printable type matches
            Some(mm) if mm.ty == derived_ty => (mm.name.clone(), mm.ty.clone()),
            _ => (derived_name, derived_ty),
        };
        checked.push(CheckedMember {
            name,
            type_str,
            type_id: member.type_id,
            bit_offset,
            bit_size,
            size: table.resolve_size(member.type_id)?,
            output_offset: 0,
        });
    }
    Ok(checked)
}

fn write_members_text(
    out: &mut String,
    table: &TypeTable,
    members: &[CheckedMember],
    data: &[u8],
) -> Result<()> {
    for member in members {
        if member.output_offset > out.len() {
            for _ in out.len()..member.output_offset {
                out.push(' ');
            }
        } else {
            out.push(' ');
        }
        write_member_value(out, table, member, data, false)?;
    }
    Ok(())
}

fn write_members_json(
    out: &mut String,
    table: &TypeTable,
    members: &[CheckedMember],
    data: &[u8],
) -> Result<()> {
    out.push('{');
    for (i, member) in members.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", serde_json::Value::String(member.name.clone()));
        write_member_value(out, table, member, data, true)?;
    }
    out.push('}');
    Ok(())
}

/// Print one member. `char[N]` renders as a length-bounded C string, `bool`
/// as `true`/`false`; everything else defers to the generic type printer and
/// degrades to `<unknown>` on printer errors.
fn write_member_value(
    out: &mut String,
    table: &TypeTable,
    member: &CheckedMember,
    data: &[u8],
    json: bool,
) -> Result<()> {
    let offset = (member.bit_offset / 8) as usize;
    let bytes = data.get(offset..offset + member.size).ok_or_else(|| {
        Error::PollFatal(format!(
            "event buffer too short: member {} needs {} bytes at {}, have {}",
            member.name,
            member.size,
            offset,
            data.len()
        ))
    })?;

    if member.type_str.starts_with("char[") {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..end]);
        if json {
            let _ = write!(out, "{}", serde_json::Value::String(text.into_owned()));
        } else {
            out.push_str(&text);
        }
        return Ok(());
    }
    if member.type_str.starts_with("bool") {
        out.push_str(if bytes[0] != 0 { "true" } else { "false" });
        return Ok(());
    }
    match dump::format_value(table, member.type_id, bytes) {
        Ok(text) => out.push_str(&text),
        Err(_) => out.push_str("<unknown>"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::btf::BtfMember;
    use crate::meta::ExportMemberMeta;

    use super::*;

    fn event_table() -> (TypeTable, TypeId) {
        let mut t = TypeTable::new();
        let int = t.add_int("int", 32, true);
        let ch = t.add_char();
        let comm = t.add_array(ch, 16);
        let event = t.add_struct(
            "event",
            24,
            vec![
                BtfMember {
                    name: Some("pid".into()),
                    type_id: int,
                    offset: 0,
                },
                BtfMember {
                    name: Some("ppid".into()),
                    type_id: int,
                    offset: 32,
                },
                BtfMember {
                    name: Some("comm".into()),
                    type_id: comm,
                    offset: 64,
                },
            ],
        );
        (t, event)
    }

    fn event_meta(type_id: TypeId) -> ExportStructMeta {
        ExportStructMeta {
            name: "event".into(),
            size: 24,
            type_id,
            members: vec![
                ExportMemberMeta {
                    name: "pid".into(),
                    ty: "int".into(),
                },
                ExportMemberMeta {
                    name: "ppid".into(),
                    ty: "int".into(),
                },
                ExportMemberMeta {
                    name: "comm".into(),
                    ty: "char[16]".into(),
                },
            ],
        }
    }

    fn capture() -> (EventSink, Arc<Mutex<Vec<String>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink_records = Arc::clone(&records);
        let sink: EventSink = Box::new(move |bytes: &[u8]| {
            sink_records
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
        });
        (sink, records)
    }

    fn sample_event_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&7i32.to_ne_bytes());
        data.extend_from_slice(&1i32.to_ne_bytes());
        let mut comm = [0u8; 16];
        comm[..4].copy_from_slice(b"init");
        data.extend_from_slice(&comm);
        data
    }

    #[test]
    fn checked_members_match_meta_and_object() {
        let (table, event) = event_table();
        let meta = event_meta(event);
        let exporter = EventExporter::for_events(
            ExportFormat::PlainText,
            &[meta],
            &table,
            false,
            None,
        )
        .unwrap();
        let members = exporter.value_members();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.bit_offset % 8 == 0));
        assert_eq!(members[2].size, 16);
    }

    #[test]
    fn header_and_row_layout() {
        let (table, event) = event_table();
        let (sink, records) = capture();
        let mut exporter = EventExporter::for_events(
            ExportFormat::PlainText,
            &[event_meta(event)],
            &table,
            true,
            Some(sink),
        )
        .unwrap();
        exporter.handle_event(&sample_event_bytes()).unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], "TIME     PID     PPID    COMM    ");
        let row = &records[1];
        assert_eq!(&row[8..], "  7      1       init");
        // the timestamp field is 8 chars
        assert_eq!(row.as_bytes()[2], b':');
    }

    #[test]
    fn json_events_have_value_members_only() {
        let (table, event) = event_table();
        let (sink, records) = capture();
        let mut exporter = EventExporter::for_events(
            ExportFormat::Json,
            &[event_meta(event)],
            &table,
            true,
            Some(sink),
        )
        .unwrap();
        exporter.handle_event(&sample_event_bytes()).unwrap();
        let records = records.lock().unwrap();
        // no header in json mode
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], r#"{"pid":7,"ppid":1,"comm":"init"}"#);
    }

    #[test]
    fn raw_mode_passes_bytes_through() {
        let (table, event) = event_table();
        let (sink, records) = capture();
        let mut exporter = EventExporter::for_events(
            ExportFormat::Raw,
            &[event_meta(event)],
            &table,
            true,
            Some(sink),
        )
        .unwrap();
        let data = sample_event_bytes();
        exporter.handle_event(&data).unwrap();
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_bytes(), &data[..]);
    }

    #[test]
    fn no_matching_members_is_an_error() {
        let (table, event) = event_table();
        let meta = ExportStructMeta {
            name: "event".into(),
            size: 24,
            type_id: event,
            members: vec![ExportMemberMeta {
                name: "no_such".into(),
                ty: "int".into(),
            }],
        };
        let err =
            EventExporter::for_events(ExportFormat::PlainText, &[meta], &table, false, None)
                .unwrap_err();
        assert!(matches!(err, Error::NoMatchingMembers));
    }

    #[test]
    fn empty_export_types_is_an_error() {
        let (table, _) = event_table();
        let err = EventExporter::for_events(ExportFormat::PlainText, &[], &table, false, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingMembers));
    }

    #[test]
    fn bitfields_are_rejected_at_setup() {
        let mut t = TypeTable::new();
        let int = t.add_int("int", 32, true);
        let bf = t.add(
            Some("flags"),
            crate::btf::TypeKind::Struct {
                size: 4,
                kflag: true,
                members: vec![BtfMember {
                    name: Some("busy".into()),
                    type_id: int,
                    offset: 3 << 24,
                }],
            },
        );
        let meta = ExportStructMeta {
            name: "flags".into(),
            size: 4,
            type_id: bf,
            members: vec![ExportMemberMeta {
                name: "busy".into(),
                ty: "int".into(),
            }],
        };
        let err = EventExporter::for_events(ExportFormat::PlainText, &[meta], &t, false, None)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    fn hist_table() -> (TypeTable, TypeId, TypeId) {
        let mut t = TypeTable::new();
        let u32t = t.add_int("unsigned int", 32, false);
        let slots = t.add_array(u32t, 27);
        let hist = t.add_struct(
            "hist",
            108,
            vec![BtfMember {
                name: Some("slots".into()),
                type_id: slots,
                offset: 0,
            }],
        );
        (t, u32t, hist)
    }

    #[test]
    fn log2_histogram_sample_renders_key_and_buckets() {
        let (table, key_id, value_id) = hist_table();
        let (sink, records) = capture();
        let sample = SampleMeta {
            interval_ms: 1000,
            kind: "log2_hist".into(),
            unit: "usec".into(),
            clear_map: true,
        };
        let mut exporter = EventExporter::for_sample(
            ExportFormat::PlainText,
            key_id,
            value_id,
            &sample,
            &[],
            &table,
            true,
            Some(sink),
        )
        .unwrap();

        let key = 4u32.to_ne_bytes().to_vec();
        let mut value = vec![0u8; 108];
        value[..4].copy_from_slice(&1u32.to_ne_bytes()); // bucket 0: 1
        value[8..12].copy_from_slice(&3u32.to_ne_bytes()); // bucket 2: 3
        exporter.handle_sample(&key, &value).unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let text = &records[0];
        assert!(text.starts_with("key =  4\n"));
        assert!(text.contains("usec                : count    distribution"));
        assert!(text.contains("0 -> 1"));
        assert!(text.contains("4 -> 7"));
        assert!(text.contains('*'));
    }

    #[test]
    fn histogram_without_slots_is_fatal() {
        let mut t = TypeTable::new();
        let u32t = t.add_int("unsigned int", 32, false);
        let value = t.add_struct(
            "counts",
            4,
            vec![BtfMember {
                name: Some("total".into()),
                type_id: u32t,
                offset: 0,
            }],
        );
        let sample = SampleMeta {
            interval_ms: 1000,
            kind: "log2_hist".into(),
            unit: "usec".into(),
            clear_map: true,
        };
        let mut exporter = EventExporter::for_sample(
            ExportFormat::PlainText,
            u32t,
            value,
            &sample,
            &[],
            &t,
            false,
            None,
        )
        .unwrap();
        let err = exporter
            .handle_sample(&4u32.to_ne_bytes(), &9u32.to_ne_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::PollFatal(_)));
    }

    #[test]
    fn sample_json_wraps_key_and_value() {
        let (table, key_id, _) = hist_table();
        let (sink, records) = capture();
        let sample = SampleMeta {
            interval_ms: 1000,
            kind: String::new(),
            unit: "(unit)".into(),
            clear_map: false,
        };
        let mut exporter = EventExporter::for_sample(
            ExportFormat::Json,
            key_id,
            key_id,
            &sample,
            &[],
            &table,
            false,
            Some(sink),
        )
        .unwrap();
        exporter
            .handle_sample(&2u32.to_ne_bytes(), &9u32.to_ne_bytes())
            .unwrap();
        let records = records.lock().unwrap();
        assert_eq!(
            records[0],
            r#"{"key":{"unsigned int":2},"value":{"unsigned int":9}}"#
        );
    }

    #[test]
    fn sample_value_members_relabel_from_meta_on_type_match() {
        let (table, _, hist) = hist_table();
        let meta = ExportStructMeta {
            name: "hist".into(),
            size: 108,
            type_id: hist,
            members: vec![ExportMemberMeta {
                name: "latency_slots".into(),
                ty: "unsigned int[27]".into(),
            }],
        };
        let members = check_sample_members(&table, hist, Some(&meta)).unwrap();
        assert_eq!(members[0].name, "latency_slots");
    }
}
