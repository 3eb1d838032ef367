// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2018 The Moonfire NVR Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// In addition, as a special exception, the copyright holders give
// permission to link the code of portions of this program with the
// OpenSSL library under certain conditions as described in each
// individual source file, and distribute linked combinations including
// the two.
//
// You must obey the GNU General Public License in all respects for all
// of the code used other than OpenSSL. If you modify file(s) with this
// exception, you may extend this exception to your version of the
// file(s), but you are not obligated to do so. If you do not wish to do
// so, delete this exception statement from your version. If you delete
// this exception statement from all source files in the program, then
// also delete it here.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt;

/// Error kind.
///
/// These codes are taken from
/// [grpc::StatusCode](https://github.com/grpc/grpc/blob/0e00c430827e81d61e1e7164ef04ca21ccbfaa77/include/grpcpp/impl/codegen/status_code_enum.h),
/// which is a nice general-purpose classification of errors. See that link for descriptions of
/// each error.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
}

impl fmt::Display for ErrorKind {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Unknown => "Unknown",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::DeadlineExceeded => "Deadline exceeded",
            ErrorKind::NotFound => "Not found",
            ErrorKind::AlreadyExists => "Already exists",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::ResourceExhausted => "Resource exhausted",
            ErrorKind::FailedPrecondition => "Failed precondition",
            ErrorKind::Aborted => "Aborted",
            ErrorKind::OutOfRange => "Out of range",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::Internal => "Internal",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::DataLoss => "Data loss",
        })
    }
}

/// The crate's universal error type.
///
/// Carries a [`ErrorKind`] (for programmatic dispatch, e.g. mapping to an HTTP status) plus an
/// optional message and an optional source rendered via `Display`, not chained through
/// `std::error::Error::source` (many of our sources, e.g. `nom`'s `VerboseError`, aren't `Error`
/// types at all — they're just displayable).
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            msg: None,
            source: None,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_source(mut self, source: impl fmt::Display) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Renders the full cause chain, one "caused by" per line.
    pub fn chain(&self) -> String {
        let mut s = self.to_string();
        if let (Some(_), Some(source)) = (&self.msg, &self.source) {
            s.push_str("\ncaused by: ");
            s.push_str(source);
        }
        s
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error {{ kind: {:?}, .. }}: {}", self.kind, self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.msg, &self.source) {
            (Some(m), _) => write!(f, "{}: {}", self.kind, m),
            (None, Some(s)) => write!(f, "{}: {}", self.kind, s),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind, keeping its `Display` text as the source.
    ///
    /// ```
    /// use base::{ErrorKind, ResultExt};
    /// use std::io::Read;
    /// let mut buf = [0u8; 1];
    /// let r = std::io::Cursor::new("").read_exact(&mut buf[..]).err_kind(ErrorKind::Internal);
    /// assert_eq!(r.unwrap_err().kind(), ErrorKind::Internal);
    /// ```
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E: fmt::Display> ResultExt<T> for Result<T, E> {
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::new(k).with_source(e))
    }
}

/// Constructs an [`Error`] with the given kind and optional `msg(...)`/`source(...)` clauses.
///
/// ```
/// use base::{err, ErrorKind};
/// let e = err!(Unauthenticated, msg("unknown user: {}", "slamb"));
/// assert_eq!(e.kind(), ErrorKind::Unauthenticated);
/// assert_eq!(e.to_string(), "Unauthenticated: unknown user: slamb");
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind)
    };
    ($kind:ident, msg($($msg:tt)+)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_msg(format!($($msg)+))
    };
    ($kind:ident, source($src:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_source($src)
    };
    ($kind:ident, msg($($msg:tt)+), source($src:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind)
            .with_msg(format!($($msg)+))
            .with_source($src)
    };
}

/// Like [`err!`], but returns immediately.
///
/// ```
/// use base::bail;
/// let e = || -> Result<(), base::Error> {
///     bail!(Unauthenticated, msg("unknown user: {}", "slamb"));
/// }().unwrap_err();
/// assert_eq!(e.kind(), base::ErrorKind::Unauthenticated);
/// ```
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return Err($crate::err!($($args)+))
    };
}
