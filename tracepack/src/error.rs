use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of the runtime.
///
/// Every public entry point reports through this enum; the C ABI flattens it
/// into an integer status plus a thread-local message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Envelope shape, base64 or inflate failure on a package.
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    /// The meta document is missing a required field or has the wrong shape.
    #[error("malformed meta: {0}")]
    MalformedMeta(String),

    /// An argument token the schema does not know about.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// An argument value that does not coerce to the variable's type.
    #[error("cannot parse `{value}` as `{ty}` for variable `{name}`")]
    BadArgumentType {
        name: String,
        ty: String,
        value: String,
    },

    #[error(
        "kernel BTF is not available; provide a type info file via the \
         BTF_FILE_PATH environment variable"
    )]
    MissingKernelTypeInfo,

    #[error("failed to load bpf object: {0}")]
    LoadFailed(String),

    #[error("failed to attach bpf programs: {0}")]
    AttachFailed(String),

    /// The exporter could not correlate any meta member with the object's
    /// struct members.
    #[error("no export struct member matches the object's type info")]
    NoMatchingMembers,

    #[error("fatal poll error: {0}")]
    PollFatal(String),

    #[error("operation not allowed in program state {0}")]
    InvalidState(&'static str),

    /// Debug-type lookup or layout resolution failed.
    #[error("type info error: {0}")]
    TypeInfo(String),

    /// A meta/type combination the runtime knows about but cannot render,
    /// e.g. bitfield members.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A loader backend failure that is neither a load nor an attach error.
    #[error("loader backend error: {0}")]
    Backend(String),
}
