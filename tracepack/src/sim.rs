//! In-memory skeleton backend.
//!
//! Implements the full [`crate::loader`] contract without touching a kernel:
//! sections are plain buffers, maps are ordered key/value stores, and ring
//! or perf consumers drain a queue of pre-pushed events. The test suite runs
//! entirely against this backend; embedding hosts can use it to exercise
//! packages on machines without BPF support.
//!
//! A drained event queue reports an interrupted poll, so event loops finish
//! deterministically once everything queued has been delivered.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::btf::TypeTable;
use crate::error::{Error, Result};
use crate::loader::{
    EventConsumer, LoadedObject, LostSink, MapKind, PollStatus, RecordSink, SkeletonBackend,
    SkeletonSpec, TcAttachSpec,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Static description of one simulated map.
#[derive(Debug, Clone, Default)]
pub struct SimMapConfig {
    pub kind: MapKind,
    pub key_type_id: u32,
    pub value_type_id: u32,
}

/// Configuration of the simulated object.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub table: TypeTable,
    /// Simulates the presence of system-wide kernel type info.
    pub btf_available: bool,
    pub fail_load: bool,
    pub fail_attach: bool,
    /// `(ident, size)` pairs of mmap-exposed sections.
    pub sections: Vec<(String, usize)>,
    pub maps: Vec<SimMapConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            table: TypeTable::new(),
            btf_available: true,
            fail_load: false,
            fail_attach: false,
            sections: Vec::new(),
            maps: Vec::new(),
        }
    }
}

struct SimMap {
    kind: MapKind,
    key_type_id: u32,
    value_type_id: u32,
    fd: i32,
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    queued: Mutex<VecDeque<Vec<u8>>>,
}

/// Shared observable state of the simulated kernel side. Tests keep a handle
/// to feed events and inspect what the runtime did.
pub struct SimState {
    table: TypeTable,
    btf_available: bool,
    fail_load: bool,
    fail_attach: bool,
    section_sizes: Vec<(String, usize)>,
    sections: Mutex<HashMap<String, Vec<u8>>>,
    maps: Vec<SimMap>,
    loaded: AtomicBool,
    attached: AtomicBool,
    tc_attachments: Mutex<Vec<(usize, TcAttachSpec)>>,
}

impl SimState {
    fn new(config: SimConfig) -> Self {
        let maps = config
            .maps
            .into_iter()
            .enumerate()
            .map(|(i, m)| SimMap {
                kind: m.kind,
                key_type_id: m.key_type_id,
                value_type_id: m.value_type_id,
                fd: 100 + i as i32,
                entries: Mutex::new(BTreeMap::new()),
                queued: Mutex::new(VecDeque::new()),
            })
            .collect();
        Self {
            table: config.table,
            btf_available: config.btf_available,
            fail_load: config.fail_load,
            fail_attach: config.fail_attach,
            section_sizes: config.sections,
            sections: Mutex::new(HashMap::new()),
            maps,
            loaded: AtomicBool::new(false),
            attached: AtomicBool::new(false),
            tc_attachments: Mutex::new(Vec::new()),
        }
    }

    /// Queue one event for delivery through a ring or perf consumer.
    pub fn push_event(&self, map_index: usize, data: Vec<u8>) {
        if let Some(map) = self.maps.get(map_index) {
            lock(&map.queued).push_back(data);
        }
    }

    /// Insert an entry into a simulated associative map.
    pub fn insert_entry(&self, map_index: usize, key: Vec<u8>, value: Vec<u8>) {
        if let Some(map) = self.maps.get(map_index) {
            lock(&map.entries).insert(key, value);
        }
    }

    pub fn entry_count(&self, map_index: usize) -> usize {
        self.maps
            .get(map_index)
            .map(|m| lock(&m.entries).len())
            .unwrap_or(0)
    }

    /// Section bytes as the kernel saw them at load time.
    pub fn section_bytes(&self, ident: &str) -> Option<Vec<u8>> {
        lock(&self.sections).get(ident).cloned()
    }

    pub fn was_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn was_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn tc_attachments(&self) -> Vec<(usize, TcAttachSpec)> {
        lock(&self.tc_attachments).clone()
    }
}

/// Backend producing objects that all share one [`SimState`].
pub struct SimBackend {
    state: Arc<SimState>,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(SimState::new(config)),
        }
    }

    /// Handle for feeding events and inspecting the simulated kernel side.
    pub fn state(&self) -> Arc<SimState> {
        Arc::clone(&self.state)
    }
}

impl SkeletonBackend for SimBackend {
    fn open(
        &self,
        _spec: &SkeletonSpec,
        _object: &[u8],
        btf_path: Option<&Path>,
    ) -> Result<Box<dyn LoadedObject>> {
        if btf_path.is_none() && !self.state.btf_available {
            return Err(Error::MissingKernelTypeInfo);
        }
        let sections = self
            .state
            .section_sizes
            .iter()
            .map(|(ident, size)| (ident.clone(), vec![0u8; *size]))
            .collect();
        Ok(Box::new(SimObject {
            state: Arc::clone(&self.state),
            sections,
            loaded: false,
        }))
    }
}

struct SimObject {
    state: Arc<SimState>,
    /// Section staging area, visible to the kernel side at load.
    sections: HashMap<String, Vec<u8>>,
    loaded: bool,
}

impl SimObject {
    fn map(&self, map_index: usize) -> Result<&SimMap> {
        self.state
            .maps
            .get(map_index)
            .ok_or_else(|| Error::Backend(format!("no simulated map at index {map_index}")))
    }
}

impl LoadedObject for SimObject {
    fn load(&mut self) -> Result<()> {
        if self.state.fail_load {
            return Err(Error::LoadFailed("simulated verifier rejection".to_string()));
        }
        let mut visible = lock(&self.state.sections);
        for (ident, bytes) in &self.sections {
            visible.insert(ident.clone(), bytes.clone());
        }
        self.loaded = true;
        self.state.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn attach(&mut self) -> Result<()> {
        if self.state.fail_attach {
            return Err(Error::AttachFailed("simulated attach rejection".to_string()));
        }
        self.state.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn attach_tc(&mut self, prog_index: usize, spec: &TcAttachSpec) -> Result<()> {
        let mut attachments = lock(&self.state.tc_attachments);
        // an existing identical hook is not an error
        if !attachments.iter().any(|(p, s)| *p == prog_index && s == spec) {
            attachments.push((prog_index, spec.clone()));
        }
        Ok(())
    }

    fn type_table(&self) -> &TypeTable {
        &self.state.table
    }

    fn mapped_section_mut(&mut self, ident: &str) -> Option<&mut [u8]> {
        self.sections.get_mut(ident).map(|v| v.as_mut_slice())
    }

    fn map_kind(&self, map_index: usize) -> MapKind {
        self.state
            .maps
            .get(map_index)
            .map(|m| m.kind)
            .unwrap_or(MapKind::Other)
    }

    fn map_fd(&self, map_index: usize) -> i32 {
        self.state.maps.get(map_index).map(|m| m.fd).unwrap_or(-1)
    }

    fn prog_fd(&self, prog_index: usize) -> i32 {
        if self.loaded {
            200 + prog_index as i32
        } else {
            -1
        }
    }

    fn map_key_type_id(&self, map_index: usize) -> u32 {
        self.state
            .maps
            .get(map_index)
            .map(|m| m.key_type_id)
            .unwrap_or(0)
    }

    fn map_value_type_id(&self, map_index: usize) -> u32 {
        self.state
            .maps
            .get(map_index)
            .map(|m| m.value_type_id)
            .unwrap_or(0)
    }

    fn map_next_key(&self, map_index: usize, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let entries = lock(&self.map(map_index)?.entries);
        let next = match prev {
            None => entries.keys().next().cloned(),
            Some(prev) => entries
                .range::<[u8], _>((Bound::Excluded(prev), Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone()),
        };
        Ok(next)
    }

    fn map_lookup(&self, map_index: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.map(map_index)?.entries).get(key).cloned())
    }

    fn map_delete(&self, map_index: usize, key: &[u8]) -> Result<()> {
        lock(&self.map(map_index)?.entries).remove(key);
        Ok(())
    }

    fn ring_buffer<'a>(
        &'a self,
        map_index: usize,
        sink: RecordSink<'a>,
    ) -> Result<Box<dyn EventConsumer + 'a>> {
        let map = self.map(map_index)?;
        Ok(Box::new(SimConsumer {
            queue: &map.queued,
            sink,
        }))
    }

    fn perf_buffer<'a>(
        &'a self,
        map_index: usize,
        _pages: usize,
        sink: RecordSink<'a>,
        _lost: LostSink<'a>,
    ) -> Result<Box<dyn EventConsumer + 'a>> {
        let map = self.map(map_index)?;
        Ok(Box::new(SimConsumer {
            queue: &map.queued,
            sink,
        }))
    }
}

struct SimConsumer<'a> {
    queue: &'a Mutex<VecDeque<Vec<u8>>>,
    sink: RecordSink<'a>,
}

impl EventConsumer for SimConsumer<'_> {
    fn poll(&mut self, _timeout_ms: i32) -> Result<PollStatus> {
        let batch: Vec<Vec<u8>> = lock(self.queue).drain(..).collect();
        if batch.is_empty() {
            return Ok(PollStatus::Interrupted);
        }
        for event in batch {
            (self.sink)(&event);
        }
        Ok(PollStatus::Normal)
    }
}
