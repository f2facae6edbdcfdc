//! The skeleton facade: lifecycle state machine over one packaged object
//! and the outward poll/destroy contract.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::warn;

use crate::error::{Error, Result};
use crate::export::{EventSink, ExportFormat};
use crate::loader::{
    LoadedObject, SkeletonBackend, SkeletonSpec, TcAttachPoint, TcAttachSpec,
};
use crate::meta::ObjectMeta;
use crate::package::Package;
use crate::poll::{self, PollControl};
use crate::section;

/// Environment variable naming an external kernel type-info file.
pub const BTF_PATH_ENV: &str = "BTF_FILE_PATH";

/// Attach tag selecting the traffic-control specialization.
const TC_ATTACH_TAG: &str = "tc";

/// Lifecycle states of a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Init,
    Running,
    Stopped,
    Invalid,
}

impl ProgramState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::Stopped,
            _ => Self::Invalid,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Invalid => "invalid",
        }
    }
}

fn lock<'a>(mutex: &'a Mutex<()>) -> MutexGuard<'a, ()> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A skeleton built from one package, bound to a platform loader.
///
/// All methods take `&self`; internal serialization makes the facade
/// callable from any thread.
pub struct BpfSkeleton {
    meta: ObjectMeta,
    object: Vec<u8>,
    btf_archive_path: Option<PathBuf>,
    backend: Box<dyn SkeletonBackend>,
    state: AtomicU8,
    exiting: AtomicBool,
    pause: AtomicBool,
    /// Serializes the poll loop against destroy.
    poll_lock: Mutex<()>,
    loaded: RwLock<Option<Box<dyn LoadedObject>>>,
}

impl BpfSkeleton {
    /// Open from a full package envelope.
    pub fn open_from_package(pkg: &str, backend: Box<dyn SkeletonBackend>) -> Result<Self> {
        Ok(Self::from_package(Package::from_package_text(pkg)?, backend))
    }

    /// Open from meta text and object bytes already at hand.
    pub fn open(meta_json: &str, object: Vec<u8>, backend: Box<dyn SkeletonBackend>) -> Result<Self> {
        Ok(Self::from_package(Package::from_parts(meta_json, object)?, backend))
    }

    pub fn from_package(package: Package, backend: Box<dyn SkeletonBackend>) -> Self {
        Self {
            meta: package.meta,
            object: package.object,
            btf_archive_path: None,
            backend,
            state: AtomicU8::new(0),
            exiting: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            poll_lock: Mutex::new(()),
            loaded: RwLock::new(None),
        }
    }

    /// Use an explicit kernel type-info file, taking precedence over the
    /// `BTF_FILE_PATH` environment variable.
    pub fn with_btf_archive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.btf_archive_path = Some(path.into());
        self
    }

    pub fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.bpf_skel.obj_name
    }

    pub fn state(&self) -> ProgramState {
        ProgramState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ProgramState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Open the object skeleton, seed its data sections, then load and
    /// attach. Idempotent from RUNNING; any failure is terminal.
    pub fn load_and_attach(&self) -> Result<()> {
        match self.state() {
            ProgramState::Running => return Ok(()),
            ProgramState::Init => {}
            other => return Err(Error::InvalidState(other.name())),
        }
        // a panic escaping the loader must not leave the skeleton loadable
        match catch_unwind(AssertUnwindSafe(|| self.load_and_attach_inner())) {
            Ok(Ok(())) => {
                self.set_state(ProgramState::Running);
                Ok(())
            }
            Ok(Err(err)) => {
                self.set_state(ProgramState::Invalid);
                Err(err)
            }
            Err(_) => {
                self.set_state(ProgramState::Invalid);
                Err(Error::LoadFailed("panic while loading the object".to_string()))
            }
        }
    }

    fn load_and_attach_inner(&self) -> Result<()> {
        let btf_path = self
            .btf_archive_path
            .clone()
            .or_else(|| std::env::var_os(BTF_PATH_ENV).map(PathBuf::from));
        let spec = SkeletonSpec::from_meta(&self.meta.bpf_skel);
        let mut obj = self.backend.open(&spec, &self.object, btf_path.as_deref())?;
        section::patch_sections(&self.meta.bpf_skel, obj.as_mut())?;
        obj.load()?;
        obj.attach()?;
        self.attach_special_programs(obj.as_mut())?;
        let mut loaded = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *loaded = Some(obj);
        Ok(())
    }

    /// Post-attach specialization hook: programs tagged `tc` get a
    /// traffic-control hook created (tolerating pre-existing ones) and the
    /// program attached to it.
    fn attach_special_programs(&self, obj: &mut dyn LoadedObject) -> Result<()> {
        for (i, prog) in self.meta.bpf_skel.progs.iter().enumerate() {
            if prog.attach != TC_ATTACH_TAG {
                continue;
            }
            let hook = prog.tchook.clone().unwrap_or_default();
            let opts = prog.tcopts.clone().unwrap_or_default();
            let attach_point = match hook.attach_point.as_str() {
                "BPF_TC_INGRESS" => TcAttachPoint::Ingress,
                "BPF_TC_EGRESS" => TcAttachPoint::Egress,
                "BPF_TC_CUSTOM" => TcAttachPoint::Custom,
                other => {
                    return Err(Error::AttachFailed(format!(
                        "attach point {other} is not supported"
                    )))
                }
            };
            obj.attach_tc(
                i,
                &TcAttachSpec {
                    ifindex: hook.ifindex,
                    attach_point,
                    handle: opts.handle,
                    priority: opts.priority,
                },
            )?;
        }
        Ok(())
    }

    /// Block driving the export loop, routing every record through `sink`
    /// (or stdout when none is given). Returns when cancelled, on a fatal
    /// poll error, or after the idle wait of a no-export package is
    /// cancelled. A cancelled poll is success.
    pub fn wait_and_poll_to_handler(
        &self,
        format: ExportFormat,
        sink: Option<EventSink>,
    ) -> Result<()> {
        // the state check happens under the poll mutex so a concurrent
        // destroy either finishes first (and this call is rejected) or waits
        // for the loop to observe the exit flag
        let _poll_guard = lock(&self.poll_lock);
        if self.state() != ProgramState::Running {
            return Err(Error::InvalidState(self.state().name()));
        }
        let loaded = self
            .loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(obj) = loaded.as_ref() else {
            return Err(Error::InvalidState("not loaded"));
        };
        let ctl = PollControl {
            exiting: &self.exiting,
            pause: &self.pause,
        };
        poll::run_export_loop(&self.meta, obj.as_ref(), format, sink, &ctl)
    }

    /// Stop polling and release the loaded object. Returns only after an
    /// active poll loop has observed the exit flag and returned; idempotent.
    pub fn destroy(&self) {
        if self.state() != ProgramState::Running {
            return;
        }
        self.exiting.store(true, Ordering::SeqCst);
        let _poll_guard = lock(&self.poll_lock);
        let mut loaded = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loaded.take();
        self.set_state(ProgramState::Stopped);
    }

    /// File descriptor of the map or program with the given meta name, or -1.
    pub fn get_fd(&self, name: &str) -> i32 {
        let loaded = self
            .loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(obj) = loaded.as_ref() else {
            return -1;
        };
        for (i, map) in self.meta.bpf_skel.maps.iter().enumerate() {
            if map.name == name {
                return obj.map_fd(i);
            }
        }
        for (i, prog) in self.meta.bpf_skel.progs.iter().enumerate() {
            if prog.name == name {
                return obj.prog_fd(i);
            }
        }
        -1
    }

    fn set_pause(&self, paused: bool) {
        self.pause.store(paused, Ordering::SeqCst);
    }
}

impl Drop for BpfSkeleton {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// External pause/resume/terminate handle over a running skeleton.
pub struct PollingHandle {
    skel: Arc<BpfSkeleton>,
}

impl PollingHandle {
    /// Wrap a skeleton that is already RUNNING; any other state is an error.
    pub fn new(skel: Arc<BpfSkeleton>) -> Result<Self> {
        if skel.state() != ProgramState::Running {
            return Err(Error::InvalidState(skel.state().name()));
        }
        Ok(Self { skel })
    }

    /// Pause or resume the poll loop; a paused loop sleeps without polling.
    pub fn set_pause(&self, paused: bool) {
        self.skel.set_pause(paused);
    }

    pub fn terminate(&self) {
        self.skel.destroy();
    }
}

/// Multi-line runtime/host version string for `--version`-style output.
pub fn runtime_version_info() -> String {
    let kernel = std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|err| {
            warn!("unable to read kernel release: {err}");
            "unknown".to_string()
        });
    format!(
        "tracepack version: {}\nkernel release: {}\narch: {}\n",
        env!("CARGO_PKG_VERSION"),
        kernel,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use crate::sim::{SimBackend, SimConfig};

    use super::*;

    fn minimal_meta() -> String {
        r#"{"bpf_skel": {"obj_name": "noop", "maps": [], "progs": [],
            "data_sections": []}}"#
            .to_string()
    }

    fn sim_backend(config: SimConfig) -> Box<dyn SkeletonBackend> {
        Box::new(SimBackend::new(config))
    }

    #[test]
    fn open_starts_in_init() {
        let skel =
            BpfSkeleton::open(&minimal_meta(), vec![], sim_backend(Default::default())).unwrap();
        assert_eq!(skel.state(), ProgramState::Init);
    }

    #[test]
    fn load_and_attach_is_idempotent_from_running() {
        let skel =
            BpfSkeleton::open(&minimal_meta(), vec![], sim_backend(Default::default())).unwrap();
        skel.load_and_attach().unwrap();
        assert_eq!(skel.state(), ProgramState::Running);
        skel.load_and_attach().unwrap();
        assert_eq!(skel.state(), ProgramState::Running);
    }

    #[test]
    fn failed_load_leaves_invalid_and_rejects_calls() {
        let skel = BpfSkeleton::open(
            &minimal_meta(),
            vec![],
            sim_backend(SimConfig {
                fail_load: true,
                ..Default::default()
            }),
        )
        .unwrap();
        assert!(matches!(skel.load_and_attach(), Err(Error::LoadFailed(_))));
        assert_eq!(skel.state(), ProgramState::Invalid);
        assert!(matches!(
            skel.load_and_attach(),
            Err(Error::InvalidState("invalid"))
        ));
        assert!(matches!(
            skel.wait_and_poll_to_handler(ExportFormat::PlainText, None),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn destroy_from_init_is_a_no_op_and_idempotent() {
        let skel =
            BpfSkeleton::open(&minimal_meta(), vec![], sim_backend(Default::default())).unwrap();
        skel.destroy();
        assert_eq!(skel.state(), ProgramState::Init);
        skel.load_and_attach().unwrap();
        skel.destroy();
        assert_eq!(skel.state(), ProgramState::Stopped);
        skel.destroy();
        assert_eq!(skel.state(), ProgramState::Stopped);
    }

    #[test]
    fn handle_requires_running_state() {
        let skel = Arc::new(
            BpfSkeleton::open(&minimal_meta(), vec![], sim_backend(Default::default())).unwrap(),
        );
        assert!(matches!(
            PollingHandle::new(Arc::clone(&skel)),
            Err(Error::InvalidState("init"))
        ));
        skel.load_and_attach().unwrap();
        let handle = PollingHandle::new(Arc::clone(&skel)).unwrap();
        handle.set_pause(true);
        assert!(skel.pause.load(Ordering::SeqCst));
        handle.terminate();
        assert_eq!(skel.state(), ProgramState::Stopped);
    }

    #[test]
    fn tc_programs_attach_through_the_specialization_hook() {
        let meta = r#"{"bpf_skel": {"obj_name": "tc_demo", "maps": [],
            "progs": [{"name": "classify", "attach": "tc", "link": false,
                       "tchook": {"ifindex": 2, "attach_point": "BPF_TC_EGRESS"},
                       "tcopts": {"handle": 7, "priority": 3}}],
            "data_sections": []}}"#;
        let backend = SimBackend::new(Default::default());
        let state = backend.state();
        let skel = BpfSkeleton::open(meta, vec![], Box::new(backend)).unwrap();
        skel.load_and_attach().unwrap();
        let attachments = state.tc_attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].0, 0);
        assert_eq!(attachments[0].1.ifindex, 2);
        assert_eq!(attachments[0].1.attach_point, TcAttachPoint::Egress);
        assert_eq!(attachments[0].1.handle, 7);
        assert_eq!(attachments[0].1.priority, 3);
    }

    #[test]
    fn unknown_tc_attach_point_is_fatal() {
        let meta = r#"{"bpf_skel": {"obj_name": "tc_demo", "maps": [],
            "progs": [{"name": "classify", "attach": "tc", "link": false,
                       "tchook": {"attach_point": "BPF_TC_SIDEWAYS"}}],
            "data_sections": []}}"#;
        let skel = BpfSkeleton::open(meta, vec![], sim_backend(Default::default())).unwrap();
        assert!(matches!(skel.load_and_attach(), Err(Error::AttachFailed(_))));
        assert_eq!(skel.state(), ProgramState::Invalid);
    }

    #[test]
    fn version_info_names_the_crate() {
        let info = runtime_version_info();
        assert!(info.contains("tracepack version:"));
        assert!(info.lines().count() >= 3);
    }
}
