use std::{
    cmp::PartialEq,
    error::Error as StdError,
    fmt::{self, Display},
    io,
};

/// The top-level result type for dealing with spaces, indexes and
/// cursors.
pub type Result<T> = std::result::Result<T, Error>;

/// The class of failure an `Error` belongs to. Callers use this to
/// decide whether to retry, report to the end user, or abandon the
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced space, index or field does not exist.
    NotFound,
    /// Uniqueness violation, incompatible format change, or malformed
    /// DDL. Nothing was modified.
    Conflict,
    /// Stored or supplied data is malformed or out of bounds.
    Corruption,
    /// An allocation failed.
    ResourceExhausted,
    /// The affected space or cursor is poisoned and must be abandoned.
    Fatal,
    /// The API was driven in a way its contract forbids.
    Misuse,
    /// An access check or identifier check rejected the operation.
    Denied,
    /// The file system failed underneath the persistent engine.
    Io,
}

/// An Error type encapsulating the expected and unexpected failures
/// of the storage layer.
#[derive(Debug)]
pub enum Error {
    /// No space with this id exists.
    NoSuchSpace(u32),
    /// No space with this name exists.
    NoSuchSpaceName(String),
    /// The space has no index with this id.
    NoSuchIndex {
        /// The requested index id.
        index_id: u32,
        /// The name of the space that was searched.
        space: String,
    },
    /// The tuple has no field with this number.
    NoSuchField(u32),
    /// A unique lookup was requested on a non-unique index.
    MoreThanOneTuple,
    /// A unique index already holds a row with this key.
    DuplicateKey {
        /// The index that rejected the row.
        index: String,
        /// The space that owns the index.
        space: String,
    },
    /// An update tried to change a primary key field.
    PrimaryKeyModified {
        /// The space being updated.
        space: String,
    },
    /// An ALTER would be incompatible with the stored data.
    IncompatibleAlter {
        /// The space being altered.
        space: String,
        /// Why the change was refused.
        reason: String,
    },
    /// An index definition violates a structural rule or an engine limit.
    InvalidIndexDef {
        /// The index being defined.
        index: String,
        /// The space it belongs to.
        space: String,
        /// Why it was refused.
        reason: String,
    },
    /// A space with this id or name is already registered.
    SpaceExists(String),
    /// A DDL operation on the space is between prepare and commit.
    SpaceBusy {
        /// The space being changed.
        space: String,
    },
    /// A tuple is larger than the configured maximum.
    TupleTooLarge {
        /// Encoded size of the tuple.
        size: usize,
        /// The configured limit.
        max: usize,
    },
    /// A field does not match the type declared for it.
    FieldTypeMismatch {
        /// The offending field number.
        fieldno: u32,
        /// The declared type.
        expected: &'static str,
        /// What was found instead.
        found: &'static str,
    },
    /// Malformed encoded data or an out of bounds payload read.
    Corruption(String),
    /// An allocation of `size` bytes failed while building `what`.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// The object being allocated.
        what: &'static str,
    },
    /// A read was attempted on a cursor that is not positioned on a row.
    InvalidCursor,
    /// The system has been used in an unsupported way.
    Unsupported(String),
    /// The user lacks the access needed for the operation.
    AccessDenied {
        /// The denied access.
        access: &'static str,
        /// The object type (usually "space").
        object_type: &'static str,
        /// The object name.
        object: String,
        /// The requesting user id.
        user: u32,
    },
    /// An object name failed the identifier check.
    InvalidIdentifier(String),
    /// A non-recoverable condition. The affected space or cursor is
    /// poisoned.
    Fatal(String),
    /// An unexpected bug has happened. Please open an issue!
    ReportableBug(String),
    /// A read or write error has happened when interacting with the file
    /// system.
    Io(io::Error),
}

impl Error {
    /// The taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        use self::Error::*;

        match self {
            NoSuchSpace(_) | NoSuchSpaceName(_) | NoSuchIndex { .. }
            | NoSuchField(_) => ErrorKind::NotFound,
            MoreThanOneTuple
            | DuplicateKey { .. }
            | PrimaryKeyModified { .. }
            | IncompatibleAlter { .. }
            | InvalidIndexDef { .. }
            | SpaceExists(_)
            | SpaceBusy { .. }
            | TupleTooLarge { .. }
            | FieldTypeMismatch { .. } => ErrorKind::Conflict,
            Corruption(_) => ErrorKind::Corruption,
            OutOfMemory { .. } => ErrorKind::ResourceExhausted,
            Fatal(_) | ReportableBug(_) => ErrorKind::Fatal,
            InvalidCursor | Unsupported(_) => ErrorKind::Misuse,
            AccessDenied { .. } | InvalidIdentifier(_) => ErrorKind::Denied,
            Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corruption<S: Into<String>>(what: S) -> Error {
        Error::Corruption(what.into())
    }

    pub(crate) fn unsupported<S: Into<String>>(what: S) -> Error {
        Error::Unsupported(what.into())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        use self::Error::*;

        match self {
            Io(ioe) => Io(io::Error::new(ioe.kind(), format!("{:?}", ioe))),
            NoSuchSpace(id) => NoSuchSpace(*id),
            NoSuchSpaceName(name) => NoSuchSpaceName(name.clone()),
            NoSuchIndex { index_id, space } => {
                NoSuchIndex { index_id: *index_id, space: space.clone() }
            }
            NoSuchField(fieldno) => NoSuchField(*fieldno),
            MoreThanOneTuple => MoreThanOneTuple,
            DuplicateKey { index, space } => {
                DuplicateKey { index: index.clone(), space: space.clone() }
            }
            PrimaryKeyModified { space } => {
                PrimaryKeyModified { space: space.clone() }
            }
            IncompatibleAlter { space, reason } => IncompatibleAlter {
                space: space.clone(),
                reason: reason.clone(),
            },
            InvalidIndexDef { index, space, reason } => InvalidIndexDef {
                index: index.clone(),
                space: space.clone(),
                reason: reason.clone(),
            },
            SpaceExists(name) => SpaceExists(name.clone()),
            SpaceBusy { space } => SpaceBusy { space: space.clone() },
            TupleTooLarge { size, max } => {
                TupleTooLarge { size: *size, max: *max }
            }
            FieldTypeMismatch { fieldno, expected, found } => {
                FieldTypeMismatch {
                    fieldno: *fieldno,
                    expected: *expected,
                    found: *found,
                }
            }
            Corruption(what) => Corruption(what.clone()),
            OutOfMemory { size, what } => {
                OutOfMemory { size: *size, what: *what }
            }
            InvalidCursor => InvalidCursor,
            Unsupported(why) => Unsupported(why.clone()),
            AccessDenied { access, object_type, object, user } => {
                AccessDenied {
                    access: *access,
                    object_type: *object_type,
                    object: object.clone(),
                    user: *user,
                }
            }
            InvalidIdentifier(name) => InvalidIdentifier(name.clone()),
            Fatal(why) => Fatal(why.clone()),
            ReportableBug(what) => ReportableBug(what.clone()),
        }
    }
}

impl Eq for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use self::Error::*;

        match (self, other) {
            (NoSuchSpace(l), NoSuchSpace(r)) => l == r,
            (NoSuchSpaceName(l), NoSuchSpaceName(r)) => l == r,
            (
                NoSuchIndex { index_id: li, space: ls },
                NoSuchIndex { index_id: ri, space: rs },
            ) => li == ri && ls == rs,
            (NoSuchField(l), NoSuchField(r)) => l == r,
            (MoreThanOneTuple, MoreThanOneTuple) => true,
            (
                DuplicateKey { index: li, space: ls },
                DuplicateKey { index: ri, space: rs },
            ) => li == ri && ls == rs,
            (PrimaryKeyModified { space: l }, PrimaryKeyModified { space: r }) => {
                l == r
            }
            (
                IncompatibleAlter { space: ls, reason: lr },
                IncompatibleAlter { space: rs, reason: rr },
            ) => ls == rs && lr == rr,
            (
                InvalidIndexDef { index: li, space: ls, reason: lr },
                InvalidIndexDef { index: ri, space: rs, reason: rr },
            ) => li == ri && ls == rs && lr == rr,
            (SpaceExists(l), SpaceExists(r)) => l == r,
            (SpaceBusy { space: l }, SpaceBusy { space: r }) => l == r,
            (
                TupleTooLarge { size: ls, max: lm },
                TupleTooLarge { size: rs, max: rm },
            ) => ls == rs && lm == rm,
            (
                FieldTypeMismatch { fieldno: lf, expected: le, found: lo },
                FieldTypeMismatch { fieldno: rf, expected: re, found: ro },
            ) => lf == rf && le == re && lo == ro,
            (Corruption(l), Corruption(r)) => l == r,
            (
                OutOfMemory { size: ls, what: lw },
                OutOfMemory { size: rs, what: rw },
            ) => ls == rs && lw == rw,
            (InvalidCursor, InvalidCursor) => true,
            (Unsupported(l), Unsupported(r)) => l == r,
            (
                AccessDenied { access: la, object: lo, user: lu, .. },
                AccessDenied { access: ra, object: ro, user: ru, .. },
            ) => la == ra && lo == ro && lu == ru,
            (InvalidIdentifier(l), InvalidIdentifier(r)) => l == r,
            (Fatal(l), Fatal(r)) => l == r,
            (ReportableBug(l), ReportableBug(r)) => l == r,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Corruption(format!("failed to decode journal record: {}", e))
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match *self {
            NoSuchSpace(id) => write!(f, "Space '{}' does not exist", id),
            NoSuchSpaceName(ref name) => {
                write!(f, "Space '{}' does not exist", name)
            }
            NoSuchIndex { index_id, ref space } => {
                write!(f, "No index #{} is defined in space '{}'", index_id, space)
            }
            NoSuchField(fieldno) => {
                write!(f, "Field {} was not found in the tuple", fieldno)
            }
            MoreThanOneTuple => {
                write!(f, "Get() doesn't support partial keys and non-unique indexes")
            }
            DuplicateKey { ref index, ref space } => write!(
                f,
                "Duplicate key exists in unique index '{}' in space '{}'",
                index, space
            ),
            PrimaryKeyModified { ref space } => write!(
                f,
                "Attempt to modify a tuple field which is part of primary index in space '{}'",
                space
            ),
            IncompatibleAlter { ref space, ref reason } => {
                write!(f, "Can't modify space '{}': {}", space, reason)
            }
            InvalidIndexDef { ref index, ref space, ref reason } => write!(
                f,
                "Can't create or modify index '{}' in space '{}': {}",
                index, space, reason
            ),
            SpaceExists(ref name) => {
                write!(f, "Space '{}' already exists", name)
            }
            SpaceBusy { ref space } => write!(
                f,
                "Space '{}' is being altered, retry the statement after the DDL",
                space
            ),
            TupleTooLarge { size, max } => write!(
                f,
                "Tuple of {} bytes exceeds the maximum tuple size {}",
                size, max
            ),
            FieldTypeMismatch { fieldno, expected, found } => write!(
                f,
                "Tuple field {} type does not match one required by operation: expected {}, got {}",
                fieldno, expected, found
            ),
            Corruption(ref what) => write!(f, "Data corruption: {}", what),
            OutOfMemory { size, what } => {
                write!(f, "Failed to allocate {} bytes for {}", size, what)
            }
            InvalidCursor => {
                write!(f, "Cursor is not positioned on a row")
            }
            Unsupported(ref e) => write!(f, "Unsupported: {}", e),
            AccessDenied { access, object_type, ref object, user } => write!(
                f,
                "{} access to {} '{}' is denied for user #{}",
                access, object_type, object, user
            ),
            InvalidIdentifier(ref name) => {
                write!(f, "Invalid identifier '{}'", name.escape_debug())
            }
            Fatal(ref e) => write!(f, "Fatal: {}", e),
            ReportableBug(ref e) => write!(
                f,
                "Unexpected bug has happened: {}. \
                 PLEASE REPORT THIS BUG!",
                e
            ),
            Io(ref e) => write!(f, "IO error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::NoSuchSpace(7).kind(), ErrorKind::NotFound);
        assert_eq!(Error::MoreThanOneTuple.kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::OutOfMemory { size: 8, what: "key" }.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(Error::InvalidCursor.kind(), ErrorKind::Misuse);
        assert_eq!(Error::Fatal("x".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn clone_preserves_equality() {
        let e = Error::DuplicateKey { index: "pk".into(), space: "s".into() };
        assert_eq!(e.clone(), e);

        let io = Error::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        // io errors never compare equal, mirroring io::Error itself
        assert_ne!(io.clone(), io);
    }
}
