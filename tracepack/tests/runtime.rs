//! End-to-end scenarios over the in-memory backend: open, seed sections,
//! attach, poll and destroy, asserting on the exact exported text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracepack::btf::{BtfMember, TypeTable};
use tracepack::export::EventSink;
use tracepack::loader::MapKind;
use tracepack::sim::{SimBackend, SimConfig, SimMapConfig};
use tracepack::{BpfSkeleton, Error, ExportFormat, ProgramState};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
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

/// Type table matching a classic process-exec tracer: a ring-buffer event
/// struct `{pid, ppid, comm}`.
fn exec_table() -> TypeTable {
    let mut table = TypeTable::new();
    let int = table.add_int("int", 32, true); // 1
    let ch = table.add_char(); // 2
    let comm = table.add_array(ch, 16); // 3
    table.add_struct(
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
    ); // 4
    table
}

const EXEC_META: &str = r#"{
    "bpf_skel": {
        "obj_name": "bootstrap",
        "maps": [{"name": "rb", "ident": "rb"}],
        "progs": [{"name": "handle_exec", "attach": "tp/sched/sched_process_exec",
                   "link": true}],
        "data_sections": []
    },
    "export_types": [{"name": "event", "size": 24, "type_id": 4, "members": [
        {"name": "pid", "type": "int"},
        {"name": "ppid", "type": "int"},
        {"name": "comm", "type": "char[16]"}
    ]}]
}"#;

fn exec_event(pid: i32, ppid: i32, comm: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&pid.to_ne_bytes());
    data.extend_from_slice(&ppid.to_ne_bytes());
    let mut buf = [0u8; 16];
    buf[..comm.len()].copy_from_slice(comm.as_bytes());
    data.extend_from_slice(&buf);
    data
}

#[test]
fn ring_buffer_events_render_as_columns() {
    init_logging();
    let backend = SimBackend::new(SimConfig {
        table: exec_table(),
        maps: vec![SimMapConfig {
            kind: MapKind::RingBuf,
            ..Default::default()
        }],
        ..Default::default()
    });
    let state = backend.state();
    let skel = BpfSkeleton::open(EXEC_META, vec![], Box::new(backend)).unwrap();
    skel.load_and_attach().unwrap();
    state.push_event(0, exec_event(7, 1, "init"));

    let (sink, records) = capture();
    // the sim consumer reports an interrupted poll once drained, so the
    // loop exits cleanly on its own
    skel.wait_and_poll_to_handler(ExportFormat::PlainText, Some(sink))
        .unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], "TIME     PID     PPID    COMM    ");
    let row = &records[1];
    assert_eq!(row.as_bytes()[2], b':');
    assert_eq!(row.as_bytes()[5], b':');
    assert_eq!(&row[8..], "  7      1       init");
}

#[test]
fn perf_array_events_render_like_ring_buffer_events() {
    let backend = SimBackend::new(SimConfig {
        table: exec_table(),
        maps: vec![SimMapConfig {
            kind: MapKind::PerfEventArray,
            ..Default::default()
        }],
        ..Default::default()
    });
    let state = backend.state();
    let meta = EXEC_META.replace("\"rb\"", "\"events\"");
    let skel = BpfSkeleton::open(&meta, vec![], Box::new(backend)).unwrap();
    skel.load_and_attach().unwrap();
    state.push_event(0, exec_event(42, 7, "sshd"));

    let (sink, records) = capture();
    skel.wait_and_poll_to_handler(ExportFormat::Json, Some(sink))
        .unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0], r#"{"pid":42,"ppid":7,"comm":"sshd"}"#);
}

fn hist_backend() -> (SimBackend, String) {
    let mut table = TypeTable::new();
    let u32t = table.add_int("unsigned int", 32, false); // 1
    let slots = table.add_array(u32t, 27); // 2
    table.add_struct(
        "hist",
        108,
        vec![BtfMember {
            name: Some("slots".into()),
            type_id: slots,
            offset: 0,
        }],
    ); // 3
    let backend = SimBackend::new(SimConfig {
        table,
        maps: vec![SimMapConfig {
            kind: MapKind::Hash,
            key_type_id: 1,
            value_type_id: 3,
        }],
        ..Default::default()
    });
    let meta = r#"{
        "bpf_skel": {
            "obj_name": "runqlat",
            "maps": [{"name": "hists", "ident": "hists",
                      "sample": {"interval": 20, "type": "log2_hist",
                                 "unit": "usec", "clear_map": true}}],
            "progs": [],
            "data_sections": []
        }
    }"#
    .to_string();
    (backend, meta)
}

#[test]
fn sampled_histogram_renders_and_drains_the_map() {
    init_logging();
    let (backend, meta) = hist_backend();
    let state = backend.state();
    let skel = Arc::new(BpfSkeleton::open(&meta, vec![], Box::new(backend)).unwrap());
    skel.load_and_attach().unwrap();

    let mut value = vec![0u8; 108];
    value[..4].copy_from_slice(&2u32.to_ne_bytes()); // bucket 0
    value[8..12].copy_from_slice(&8u32.to_ne_bytes()); // bucket 2
    state.insert_entry(0, 1u32.to_ne_bytes().to_vec(), value);

    let (sink, records) = capture();
    let poller = {
        let skel = Arc::clone(&skel);
        thread::spawn(move || skel.wait_and_poll_to_handler(ExportFormat::PlainText, Some(sink)))
    };
    // a couple of sample intervals
    thread::sleep(Duration::from_millis(120));
    skel.destroy();
    poller.join().unwrap().unwrap();

    let records = records.lock().unwrap();
    assert!(!records.is_empty());
    let text = &records[0];
    assert!(text.starts_with("key =  1\n"), "got: {text:?}");
    assert!(text.contains("usec                : count    distribution"));
    assert!(text.contains("0 -> 1"));
    assert!(text.contains("4 -> 7"));
    assert!(text.contains('*'));
    // clear_map drained the entry after the read pass
    assert_eq!(state.entry_count(0), 0);
    // one observed key produces exactly one record per interval that saw it
    assert_eq!(records.len(), 1);
}

#[test]
fn destroy_during_poll_unblocks_and_stops() {
    let meta = r#"{"bpf_skel": {"obj_name": "quiet", "maps": [], "progs": [],
        "data_sections": []}}"#;
    let skel = Arc::new(
        BpfSkeleton::open(meta, vec![], Box::new(SimBackend::new(Default::default()))).unwrap(),
    );
    skel.load_and_attach().unwrap();

    let returned = Arc::new(AtomicBool::new(false));
    let poller = {
        let skel = Arc::clone(&skel);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let result = skel.wait_and_poll_to_handler(ExportFormat::PlainText, None);
            returned.store(true, Ordering::SeqCst);
            result
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst));

    let start = Instant::now();
    skel.destroy();
    // destroy serializes on the poll mutex, so the loop exits promptly
    poller.join().unwrap().unwrap();
    assert!(returned.load(Ordering::SeqCst));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(skel.state(), ProgramState::Stopped);
    assert_eq!(skel.get_fd("anything"), -1);
}

#[test]
fn missing_kernel_type_info_is_terminal() {
    std::env::remove_var(tracepack::BTF_PATH_ENV);
    let meta = r#"{"bpf_skel": {"obj_name": "x", "maps": [], "progs": [],
        "data_sections": []}}"#;
    let skel = BpfSkeleton::open(
        meta,
        vec![],
        Box::new(SimBackend::new(SimConfig {
            btf_available: false,
            ..Default::default()
        })),
    )
    .unwrap();
    let err = skel.load_and_attach().unwrap_err();
    assert!(matches!(err, Error::MissingKernelTypeInfo));
    assert!(err.to_string().contains("BTF_FILE_PATH"));
    assert_eq!(skel.state(), ProgramState::Invalid);
}

#[test]
fn btf_archive_path_overrides_the_missing_system_btf() {
    let meta = r#"{"bpf_skel": {"obj_name": "x", "maps": [], "progs": [],
        "data_sections": []}}"#;
    let skel = BpfSkeleton::open(
        meta,
        vec![],
        Box::new(SimBackend::new(SimConfig {
            btf_available: false,
            ..Default::default()
        })),
    )
    .unwrap()
    .with_btf_archive_path("/tmp/vmlinux-5.15");
    skel.load_and_attach().unwrap();
    assert_eq!(skel.state(), ProgramState::Running);
}

#[test]
fn argument_values_reach_the_data_section() {
    let meta_text = r#"{
        "bpf_skel": {
            "obj_name": "bootstrap",
            "maps": [{"name": "bootstrap_bpf_rodata", "ident": "rodata", "mmaped": true}],
            "progs": [],
            "data_sections": [{"name": ".rodata", "variables": [
                {"name": "min_duration_ns", "type": "unsigned long long",
                 "size": 8, "offset": 0, "type_id": 1,
                 "cmdarg": {"default": 0, "long": "min_duration_ns"}},
                {"name": "target_comm", "type": "char[12]", "size": 12,
                 "offset": 8, "type_id": 2}
            ]}]
        }
    }"#;
    let mut meta = tracepack::meta::ObjectMeta::from_json_str(meta_text).unwrap();
    let args: Vec<String> = ["bootstrap", "--min_duration_ns", "1000", "--target_comm", "nginx"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let outcome = tracepack::parse_args(&mut meta, &args).unwrap();
    assert_eq!(outcome, tracepack::ArgOutcome::Continue);

    let backend = SimBackend::new(SimConfig {
        sections: vec![("rodata".to_string(), 20)],
        ..Default::default()
    });
    let state = backend.state();
    let skel = BpfSkeleton::open(&meta.to_json_string().unwrap(), vec![], Box::new(backend))
        .unwrap();
    skel.load_and_attach().unwrap();

    let rodata = state.section_bytes("rodata").unwrap();
    assert_eq!(&rodata[..8], &1000u64.to_ne_bytes());
    assert_eq!(&rodata[8..13], b"nginx");
    assert_eq!(rodata[13], 0);
}

#[test]
fn get_fd_finds_maps_and_programs_by_name() {
    let backend = SimBackend::new(SimConfig {
        table: exec_table(),
        maps: vec![SimMapConfig {
            kind: MapKind::RingBuf,
            ..Default::default()
        }],
        ..Default::default()
    });
    let skel = BpfSkeleton::open(EXEC_META, vec![], Box::new(backend)).unwrap();
    assert_eq!(skel.get_fd("rb"), -1);
    skel.load_and_attach().unwrap();
    assert_eq!(skel.get_fd("rb"), 100);
    assert_eq!(skel.get_fd("handle_exec"), 200);
    assert_eq!(skel.get_fd("nope"), -1);
}

#[test]
fn pause_handle_suspends_sampling() {
    let (backend, meta) = hist_backend();
    let state = backend.state();
    let skel = Arc::new(BpfSkeleton::open(&meta, vec![], Box::new(backend)).unwrap());
    skel.load_and_attach().unwrap();
    let handle = tracepack::PollingHandle::new(Arc::clone(&skel)).unwrap();
    handle.set_pause(true);

    let mut value = vec![0u8; 108];
    value[..4].copy_from_slice(&1u32.to_ne_bytes());
    state.insert_entry(0, 5u32.to_ne_bytes().to_vec(), value);

    let (sink, records) = capture();
    let poller = {
        let skel = Arc::clone(&skel);
        thread::spawn(move || skel.wait_and_poll_to_handler(ExportFormat::PlainText, Some(sink)))
    };
    thread::sleep(Duration::from_millis(120));
    // paused: intervals elapsed but nothing was sampled or drained
    assert!(records.lock().unwrap().is_empty());
    assert_eq!(state.entry_count(0), 1);

    handle.set_pause(false);
    thread::sleep(Duration::from_millis(120));
    handle.terminate();
    poller.join().unwrap().unwrap();
    assert!(!records.lock().unwrap().is_empty());
    assert_eq!(state.entry_count(0), 0);
}
