//! Polling supervisor: classifies the package's one export channel after
//! load and drives the matching loop until cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::export::{EventExporter, EventSink, ExportFormat};
use crate::loader::{LoadedObject, MapKind, PollStatus};
use crate::meta::ObjectMeta;

/// Sleep quantum for the no-export idle loop and pause checks.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// The one export channel a package drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportChannel {
    RingBuf(usize),
    PerfArray(usize),
    Sample(usize),
    NoExport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub channel: ExportChannel,
    /// More than one map matched; the last one won.
    pub multiple: bool,
}

/// Classify the export channel. First match wins the slot, later matches
/// overwrite it (and flag the diagnostic warning).
pub fn classify_export_maps(meta: &ObjectMeta, obj: &dyn LoadedObject) -> Classification {
    let mut channel = ExportChannel::NoExport;
    let mut multiple = false;
    for (i, map) in meta.bpf_skel.maps.iter().enumerate() {
        let selected = if map.sample.is_some() {
            Some(ExportChannel::Sample(i))
        } else if obj.map_kind(i) == MapKind::RingBuf && !meta.export_types.is_empty() {
            Some(ExportChannel::RingBuf(i))
        } else if obj.map_kind(i) == MapKind::PerfEventArray && !meta.export_types.is_empty() {
            Some(ExportChannel::PerfArray(i))
        } else {
            None
        };
        if let Some(selected) = selected {
            if channel != ExportChannel::NoExport {
                multiple = true;
            }
            channel = selected;
        }
    }
    Classification { channel, multiple }
}

/// Cooperative cancellation and pause flags shared with the facade.
pub struct PollControl<'a> {
    pub exiting: &'a AtomicBool,
    pub pause: &'a AtomicBool,
}

impl PollControl<'_> {
    fn should_exit(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    fn paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }
}

/// Classify and drive the export loop until cancellation. A cancelled poll
/// is success.
pub fn run_export_loop(
    meta: &ObjectMeta,
    obj: &dyn LoadedObject,
    format: ExportFormat,
    sink: Option<EventSink>,
    ctl: &PollControl<'_>,
) -> Result<()> {
    let classification = classify_export_maps(meta, obj);
    if classification.multiple {
        warn!("multiple export maps found");
    }
    if meta.debug_verbose {
        debug!("polling export channel {:?}", classification.channel);
    }
    match classification.channel {
        ExportChannel::RingBuf(i) => poll_ring_buffer(meta, obj, i, format, sink, ctl),
        ExportChannel::PerfArray(i) => poll_perf_array(meta, obj, i, format, sink, ctl),
        ExportChannel::Sample(i) => sample_map_loop(meta, obj, i, format, sink, ctl),
        ExportChannel::NoExport => idle_wait(ctl),
    }
}

fn poll_ring_buffer(
    meta: &ObjectMeta,
    obj: &dyn LoadedObject,
    map_index: usize,
    format: ExportFormat,
    sink: Option<EventSink>,
    ctl: &PollControl<'_>,
) -> Result<()> {
    let mut exporter = EventExporter::for_events(
        format,
        &meta.export_types,
        obj.type_table(),
        meta.print_header,
        sink,
    )?;
    let mut consumer = obj.ring_buffer(
        map_index,
        Box::new(move |data| {
            if let Err(err) = exporter.handle_event(data) {
                warn!("failed to export event: {err}");
            }
        }),
    )?;
    let timeout = meta.poll_timeout_ms;
    while !ctl.should_exit() {
        if ctl.paused() {
            thread::sleep(IDLE_WAIT);
            continue;
        }
        match consumer.poll(timeout)? {
            PollStatus::Interrupted => break,
            PollStatus::Normal => {}
        }
    }
    Ok(())
}

fn poll_perf_array(
    meta: &ObjectMeta,
    obj: &dyn LoadedObject,
    map_index: usize,
    format: ExportFormat,
    sink: Option<EventSink>,
    ctl: &PollControl<'_>,
) -> Result<()> {
    let mut exporter = EventExporter::for_events(
        format,
        &meta.export_types,
        obj.type_table(),
        meta.print_header,
        sink,
    )?;
    let mut consumer = obj.perf_buffer(
        map_index,
        meta.perf_buffer_pages as usize,
        Box::new(move |data| {
            if let Err(err) = exporter.handle_event(data) {
                warn!("failed to export event: {err}");
            }
        }),
        Box::new(|cpu, count| warn!("lost {count} events on CPU {cpu}")),
    )?;
    let timeout = meta.poll_timeout_ms;
    while !ctl.should_exit() {
        if ctl.paused() {
            thread::sleep(IDLE_WAIT);
            continue;
        }
        match consumer.poll(timeout)? {
            PollStatus::Interrupted => break,
            PollStatus::Normal => {}
        }
    }
    Ok(())
}

fn sample_map_loop(
    meta: &ObjectMeta,
    obj: &dyn LoadedObject,
    map_index: usize,
    format: ExportFormat,
    sink: Option<EventSink>,
    ctl: &PollControl<'_>,
) -> Result<()> {
    let map_meta = &meta.bpf_skel.maps[map_index];
    let Some(sample) = map_meta.sample.as_ref() else {
        return Err(Error::PollFatal(format!(
            "map {} classified as sample without a sample config",
            map_meta.name
        )));
    };
    let mut exporter = EventExporter::for_sample(
        format,
        obj.map_key_type_id(map_index),
        obj.map_value_type_id(map_index),
        sample,
        &meta.export_types,
        obj.type_table(),
        meta.print_header,
        sink,
    )?;
    let interval = Duration::from_millis(sample.interval_ms);
    while !ctl.should_exit() {
        thread::sleep(interval);
        if ctl.should_exit() {
            break;
        }
        if ctl.paused() {
            continue;
        }
        snapshot_sample_map(obj, map_index, &mut exporter)?;
        if sample.clear_map {
            drain_sample_map(obj, map_index)?;
        }
    }
    Ok(())
}

/// Read pass: walk keys from the sentinel forward and forward every entry
/// observed this interval to the exporter.
fn snapshot_sample_map(
    obj: &dyn LoadedObject,
    map_index: usize,
    exporter: &mut EventExporter<'_>,
) -> Result<()> {
    let mut cursor = obj.map_next_key(map_index, None)?;
    while let Some(key) = cursor {
        if let Some(value) = obj.map_lookup(map_index, &key)? {
            exporter.handle_sample(&key, &value)?;
        }
        cursor = obj.map_next_key(map_index, Some(&key))?;
    }
    Ok(())
}

/// Delete pass, separate from the read pass so entries arriving mid-scan are
/// not missed.
fn drain_sample_map(obj: &dyn LoadedObject, map_index: usize) -> Result<()> {
    let mut cursor = obj.map_next_key(map_index, None)?;
    while let Some(key) = cursor {
        obj.map_delete(map_index, &key)?;
        cursor = obj.map_next_key(map_index, Some(&key))?;
    }
    Ok(())
}

fn idle_wait(ctl: &PollControl<'_>) -> Result<()> {
    info!("package exports nothing; waiting for exit");
    while !ctl.should_exit() {
        thread::sleep(IDLE_WAIT);
    }
    Ok(())
}
