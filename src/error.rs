use std::{fmt, result};

/// Result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

/// Error taxonomy for the row write path.
///
/// Variants carry the `(file, line)` of the `err_at!` call-site that raised
/// them, along with a short message, so a caller can locate the failing
/// check without a backtrace.
#[derive(Clone, PartialEq)]
pub enum Error {
    /// Internal: leaf-only modify did not fit, caller must retry with a
    /// tree latch. Never surfaces past `btree::modify`.
    Overflow(String, u32, String),
    /// Internal: a delete/merge would leave a page under the fill
    /// threshold. Never surfaces past `btree::modify`.
    Underflow(String, u32, String),
    /// Internal: generic "retry pessimistic" signal. Never surfaces past
    /// `row::insert`/`row::update`.
    Fail(String, u32, String),
    /// Internal: secondary-unique insert deferred its uniqueness check to
    /// a post-insert rescan. Never surfaces past `row::insert`.
    StrongFail(String, u32, String),

    /// A lock request would have to wait; the query-graph thread suspends.
    LockWait(String, u32, String),
    /// A lock wait exceeded `innodb_lock_wait_timeout`.
    LockWaitTimeout(String, u32, String),
    /// Deadlock detected; this transaction was chosen as victim.
    Deadlock(String, u32, String),

    /// Unique index violation.
    DuplicateKey(String, u32, String),
    /// Unique index violation while inserting a row that references a
    /// foreign key.
    ForeignDuplicateKey(String, u32, String),
    /// A foreign key references a row that does not exist.
    NoReferencedRow(String, u32, String),
    /// A row cannot be deleted/updated because another table's foreign
    /// key still references it.
    RowIsReferenced(String, u32, String),

    /// A record would not fit any page, even freshly split.
    TooBigRecord(String, u32, String),
    /// The backing store is out of space (external collaborator signal).
    OutOfFileSpace(String, u32, String),
    /// On-disk or in-memory structure failed an invariant check.
    Corruption(String, u32, String),
    /// Lookup found no record.
    RecordNotFound(String, u32, String),

    /// Generic invalid input/argument.
    InvalidInput(String, u32, String),
    /// Internal-only: a type used where it cannot appear (conversion
    /// failure, width mismatch, etc).
    FailConvert(String, u32, String),
    /// A background worker thread (lock-wait-timeout watcher, purge)
    /// panicked or could not be joined.
    ThreadFail(String, u32, String),
    /// A channel send/recv between a query-graph thread and a worker
    /// thread failed.
    IPCFail(String, u32, String),
}

impl Error {
    /// True for the four error kinds that must never cross a statement
    /// boundary (see spec §7 propagation policy).
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Overflow(..) | Error::Underflow(..) | Error::Fail(..) | Error::StrongFail(..)
        )
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (kind, file, line, msg) = match self {
            Error::Overflow(file, line, msg) => ("Overflow", file, line, msg),
            Error::Underflow(file, line, msg) => ("Underflow", file, line, msg),
            Error::Fail(file, line, msg) => ("Fail", file, line, msg),
            Error::StrongFail(file, line, msg) => ("StrongFail", file, line, msg),
            Error::LockWait(file, line, msg) => ("LockWait", file, line, msg),
            Error::LockWaitTimeout(file, line, msg) => ("LockWaitTimeout", file, line, msg),
            Error::Deadlock(file, line, msg) => ("Deadlock", file, line, msg),
            Error::DuplicateKey(file, line, msg) => ("DuplicateKey", file, line, msg),
            Error::ForeignDuplicateKey(file, line, msg) => {
                ("ForeignDuplicateKey", file, line, msg)
            }
            Error::NoReferencedRow(file, line, msg) => ("NoReferencedRow", file, line, msg),
            Error::RowIsReferenced(file, line, msg) => ("RowIsReferenced", file, line, msg),
            Error::TooBigRecord(file, line, msg) => ("TooBigRecord", file, line, msg),
            Error::OutOfFileSpace(file, line, msg) => ("OutOfFileSpace", file, line, msg),
            Error::Corruption(file, line, msg) => ("Corruption", file, line, msg),
            Error::RecordNotFound(file, line, msg) => ("RecordNotFound", file, line, msg),
            Error::InvalidInput(file, line, msg) => ("InvalidInput", file, line, msg),
            Error::FailConvert(file, line, msg) => ("FailConvert", file, line, msg),
            Error::ThreadFail(file, line, msg) => ("ThreadFail", file, line, msg),
            Error::IPCFail(file, line, msg) => ("IPCFail", file, line, msg),
        };
        write!(f, "{}:{}:{} {}", kind, file, line, msg)
    }
}

impl std::error::Error for Error {}

/// Build or wrap an [`Error`], tagging it with the call-site's file/line.
///
/// `err_at!(Kind, result_expr)` converts the `Err` arm of a
/// `std::result::Result` into `Error::Kind`, passing `Ok` through
/// unchanged.
///
/// `err_at!(Kind, msg: "fmt", args...)` builds `Err(Error::Kind(..))`
/// directly, for sites with no underlying `Result` to convert.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let file_line = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(file_line, line!(), format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let file_line = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(file_line, line!(), err.to_string()))
            }
        }
    }};
}
