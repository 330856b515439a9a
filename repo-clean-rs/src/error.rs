use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::process::ExitStatus;

/// Top-level error type for repo-clean-rs operations.
///
/// Fatal stream conditions get their own variants so callers can surface a
/// single diagnostic line per failure kind; everything else funnels through
/// [`io::Error`].
#[derive(Debug)]
pub enum RewriteError {
    /// Wrapper around lower-level I/O failures (short write, unexpected EOF).
    Io(io::Error),
    /// A required stream field (mark, original-oid, data size) was missing
    /// or unparseable.
    StreamMalformed(String),
    /// The export stream used nested tags, which the rewrite grammar cannot
    /// represent.
    NestedTags,
    /// A file-change kind outside {M, D, R} appeared inside a commit.
    UnsupportedFileChange(String),
    /// fast-export or fast-import exited non-zero.
    ChildProcess {
        name: &'static str,
        status: ExitStatus,
    },
    /// Invalid option or configuration supplied by the caller.
    InvalidOptions(String),
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::Io(err) => write!(f, "{err}"),
            RewriteError::StreamMalformed(msg) => write!(f, "malformed export stream: {msg}"),
            RewriteError::NestedTags => f.write_str(
                "export stream contains nested tags; narrow the rewrite to a single branch and retry",
            ),
            RewriteError::UnsupportedFileChange(line) => {
                write!(f, "unsupported file-change in export stream: {line}")
            }
            RewriteError::ChildProcess { name, status } => {
                write!(f, "git {name} failed: {status}")
            }
            RewriteError::InvalidOptions(msg) => f.write_str(msg),
        }
    }
}

impl StdError for RewriteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RewriteError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RewriteError {
    fn from(err: io::Error) -> Self {
        RewriteError::Io(err)
    }
}

impl From<RewriteError> for io::Error {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl RewriteError {
    /// Convenience constructor for malformed-stream failures.
    pub fn malformed(msg: impl Into<String>) -> Self {
        RewriteError::StreamMalformed(msg.into())
    }

    /// Process exit code matching the failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            RewriteError::InvalidOptions(_) => 2,
            RewriteError::ChildProcess { status, .. } => status.code().unwrap_or(1),
            _ => 1,
        }
    }
}

/// Convenience result alias using [`RewriteError`].
pub type Result<T> = std::result::Result<T, RewriteError>;
