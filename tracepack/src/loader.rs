//! The collaborator seam to the platform loader.
//!
//! The kernel-object loader, verifier and attacher live outside this crate;
//! everything the runtime consumes from them is captured by the
//! [`SkeletonBackend`] / [`LoadedObject`] trait pair: open-from-memory with
//! mmap section slots, load, attach, map fd/type lookups, BTF key/value type
//! ids, and the ring/perf consumer objects. [`crate::sim`] provides a
//! complete in-memory implementation.

use std::path::Path;
use std::sync::OnceLock;

use crate::btf::TypeTable;
use crate::error::{Error, Result};
use crate::meta::SkeletonMeta;

/// Skeleton description handed to open-from-memory: the meta tree reduced to
/// what the loader needs, in object order.
#[derive(Debug, Clone)]
pub struct SkeletonSpec {
    pub obj_name: String,
    pub maps: Vec<MapSpec>,
    pub progs: Vec<ProgSpec>,
}

#[derive(Debug, Clone)]
pub struct MapSpec {
    pub name: String,
    pub ident: String,
    pub mmaped: bool,
}

#[derive(Debug, Clone)]
pub struct ProgSpec {
    pub name: String,
    pub attach: String,
    pub link: bool,
}

impl SkeletonSpec {
    pub fn from_meta(meta: &SkeletonMeta) -> Self {
        Self {
            obj_name: meta.obj_name.clone(),
            maps: meta
                .maps
                .iter()
                .map(|m| MapSpec {
                    name: m.name.clone(),
                    ident: m.ident.clone(),
                    mmaped: m.mmaped,
                })
                .collect(),
            progs: meta
                .progs
                .iter()
                .map(|p| ProgSpec {
                    name: p.name.clone(),
                    attach: p.attach.clone(),
                    link: p.link,
                })
                .collect(),
        }
    }
}

/// Map classes the supervisor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapKind {
    RingBuf,
    PerfEventArray,
    Hash,
    Array,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcAttachPoint {
    Ingress,
    Egress,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcAttachSpec {
    pub ifindex: i32,
    pub attach_point: TcAttachPoint,
    pub handle: u32,
    pub priority: u32,
}

/// Outcome of one consumer poll round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Keep looping; zero or more records were delivered to the sink.
    Normal,
    /// The poll was interrupted by a signal; loops exit cleanly.
    Interrupted,
}

/// Sink receiving one raw record from a ring or perf buffer.
pub type RecordSink<'a> = Box<dyn FnMut(&[u8]) + Send + 'a>;
/// Sink receiving `(cpu, lost_count)` notifications from a perf buffer.
pub type LostSink<'a> = Box<dyn FnMut(u32, u64) + Send + 'a>;

/// A ring-buffer or perf-buffer consumer bound to one map.
pub trait EventConsumer {
    fn poll(&mut self, timeout_ms: i32) -> Result<PollStatus>;
}

/// An opened (and later loaded) object skeleton.
///
/// Data sections are writable between open and load; map operations are
/// valid after load. The object detaches and frees its kernel resources on
/// drop.
pub trait LoadedObject: Send + Sync {
    fn load(&mut self) -> Result<()>;
    fn attach(&mut self) -> Result<()>;
    /// Traffic-control specialization run after generic attach. Creating a
    /// hook that already exists must not be an error.
    fn attach_tc(&mut self, prog_index: usize, spec: &TcAttachSpec) -> Result<()>;

    /// The object's embedded debug-type table.
    fn type_table(&self) -> &TypeTable;

    /// Mutable view of a memory-mapped data section (`rodata`, `bss`, ...),
    /// if the object has one under that ident.
    fn mapped_section_mut(&mut self, ident: &str) -> Option<&mut [u8]>;

    fn map_kind(&self, map_index: usize) -> MapKind;
    fn map_fd(&self, map_index: usize) -> i32;
    fn prog_fd(&self, prog_index: usize) -> i32;
    fn map_key_type_id(&self, map_index: usize) -> u32;
    fn map_value_type_id(&self, map_index: usize) -> u32;

    /// Walk map keys: `prev == None` yields the first key, `Ok(None)` ends
    /// the walk. A deleted cursor key restarts from the nearest survivor.
    fn map_next_key(&self, map_index: usize, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>>;
    fn map_lookup(&self, map_index: usize, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn map_delete(&self, map_index: usize, key: &[u8]) -> Result<()>;

    fn ring_buffer<'a>(
        &'a self,
        map_index: usize,
        sink: RecordSink<'a>,
    ) -> Result<Box<dyn EventConsumer + 'a>>;
    fn perf_buffer<'a>(
        &'a self,
        map_index: usize,
        pages: usize,
        sink: RecordSink<'a>,
        lost: LostSink<'a>,
    ) -> Result<Box<dyn EventConsumer + 'a>>;
}

/// Factory for opened skeletons; the one interface a platform port has to
/// implement.
pub trait SkeletonBackend: Send + Sync {
    /// Open the object from memory. `btf_path` overrides the system type
    /// info source; with no override and no system BTF the backend reports
    /// [`Error::MissingKernelTypeInfo`].
    fn open(
        &self,
        spec: &SkeletonSpec,
        object: &[u8],
        btf_path: Option<&Path>,
    ) -> Result<Box<dyn LoadedObject>>;
}

type BackendFactory = Box<dyn Fn() -> Box<dyn SkeletonBackend> + Send + Sync>;

static BACKEND: OnceLock<BackendFactory> = OnceLock::new();

/// Install the process-wide platform loader used by entry points that take
/// no explicit backend (notably the C ABI). The first registration wins;
/// returns false if a backend was already installed.
pub fn register_backend(
    factory: impl Fn() -> Box<dyn SkeletonBackend> + Send + Sync + 'static,
) -> bool {
    BACKEND.set(Box::new(factory)).is_ok()
}

/// A fresh instance of the registered platform loader.
pub fn default_backend() -> Result<Box<dyn SkeletonBackend>> {
    match BACKEND.get() {
        Some(factory) => Ok(factory()),
        None => Err(Error::Backend("no platform loader registered".to_string())),
    }
}
