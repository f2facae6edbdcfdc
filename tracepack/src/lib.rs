//! tracepack: a userspace runtime for self-describing kernel tracing
//! packages.
//!
//! A package bundles a compiled BPF object, type/layout metadata derived
//! from the object's embedded BTF, and a schema describing command-line
//! arguments, tunable constants and event decoding. Given only the package,
//! this crate materializes arguments into the object's data sections, loads
//! and attaches the object through a pluggable [`loader::SkeletonBackend`],
//! and streams decoded events as plain-text tables, JSON objects or raw
//! bytes.
//!
//! ```no_run
//! use tracepack::{BpfSkeleton, ExportFormat};
//! use tracepack::sim::{SimBackend, SimConfig};
//!
//! # fn main() -> tracepack::Result<()> {
//! let package = std::fs::read_to_string("package.json").unwrap();
//! let backend = Box::new(SimBackend::new(SimConfig::default()));
//! let skel = BpfSkeleton::open_from_package(&package, backend)?;
//! skel.load_and_attach()?;
//! skel.wait_and_poll_to_handler(ExportFormat::PlainText, None)?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod btf;
pub mod error;
pub mod export;
pub mod loader;
pub mod meta;
pub mod package;
pub mod poll;
pub mod section;
pub mod sim;
pub mod skeleton;

pub use args::{parse_args, parse_args_to_json_config, ArgOutcome};
pub use error::{Error, Result};
pub use export::{EventSink, ExportFormat};
pub use package::Package;
pub use skeleton::{runtime_version_info, BpfSkeleton, PollingHandle, ProgramState, BTF_PATH_ENV};
