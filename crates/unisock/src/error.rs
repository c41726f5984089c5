//! Portable error taxonomy.
//!
//! Every native failure code observed by this crate is folded into one of
//! the [`ErrorKind`] variants below before it reaches the caller. The raw
//! native code is preserved on the [`Error`] value for diagnostics, but
//! callers are expected to branch on the portable kind only.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Portable classification of a socket-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operating system ran out of resources (memory, descriptors, buffers).
    NoResources,
    /// Resource is not available (includes operations on a closed socket
    /// and unreachable networks/hosts).
    NotAvailable,
    AccessDenied,
    AlreadyConnected,
    /// Operation started but has not completed yet.
    InProgress,
    Aborted,
    InvalidArgument,
    NotSupported,
    TimedOut,
    /// Operation cannot be completed immediately.
    WouldBlock,
    AddressInUse,
    ConnectionRefused,
    NotConnected,
    QuotaExceeded,
    IsDirectory,
    NotDirectory,
    NameTooLong,
    AlreadyExists,
    NotExists,
    NoMoreData,
    NotImplemented,
    /// Catch-all for native codes with no portable equivalent.
    Failed,
}

impl ErrorKind {
    /// Human-readable description, stable across platforms.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoResources => "operating system has not enough resources",
            ErrorKind::NotAvailable => "resource is not available",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::AlreadyConnected => "already connected",
            ErrorKind::InProgress => "operation in progress",
            ErrorKind::Aborted => "operation aborted",
            ErrorKind::InvalidArgument => "invalid argument specified",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::TimedOut => "operation timed out",
            ErrorKind::WouldBlock => "operation cannot be completed immediately",
            ErrorKind::AddressInUse => "address is already under usage",
            ErrorKind::ConnectionRefused => "connection refused",
            ErrorKind::NotConnected => "connection required first",
            ErrorKind::QuotaExceeded => "user quota exceeded",
            ErrorKind::IsDirectory => "trying to open directory for writing",
            ErrorKind::NotDirectory => "component of the path prefix is not a directory",
            ErrorKind::NameTooLong => "specified name is too long",
            ErrorKind::AlreadyExists => "specified entry already exists",
            ErrorKind::NotExists => "specified entry does not exist",
            ErrorKind::NoMoreData => "no more data left",
            ErrorKind::NotImplemented => "operation is not implemented",
            ErrorKind::Failed => "general error",
        }
    }

    /// Maps a native error code (errno on Unix, a WSA/Win32 code on
    /// Windows) to its portable kind. Unmapped codes fall through to
    /// [`ErrorKind::Failed`].
    #[cfg(unix)]
    pub fn from_native(code: i32) -> ErrorKind {
        // ENONET and ENOSR only exist on Linux.
        #[cfg(target_os = "linux")]
        {
            if code == libc::ENONET {
                return ErrorKind::NotAvailable;
            }
            if code == libc::ENOSR {
                return ErrorKind::NoResources;
            }
        }
        // Guard-style comparison instead of const patterns: several errno
        // pairs alias each other on some platforms (EAGAIN/EWOULDBLOCK,
        // ENOTSUP/EOPNOTSUPP) and aliased consts are rejected as
        // unreachable match arms.
        match code {
            c if c == libc::EACCES || c == libc::EPERM => ErrorKind::AccessDenied,
            c if c == libc::ENOMEM
                || c == libc::ENOBUFS
                || c == libc::ENFILE
                || c == libc::ENOSPC
                || c == libc::EMFILE =>
            {
                ErrorKind::NoResources
            }
            c if c == libc::EINVAL
                || c == libc::EBADF
                || c == libc::ENOTSOCK
                || c == libc::EFAULT
                || c == libc::EPROTOTYPE =>
            {
                ErrorKind::InvalidArgument
            }
            c if c == libc::ENOTSUP
                || c == libc::EOPNOTSUPP
                || c == libc::ENOPROTOOPT
                || c == libc::EPROTONOSUPPORT
                || c == libc::EAFNOSUPPORT =>
            {
                ErrorKind::NotSupported
            }
            c if c == libc::EADDRNOTAVAIL
                || c == libc::ENETUNREACH
                || c == libc::ENETDOWN
                || c == libc::EHOSTDOWN
                || c == libc::EHOSTUNREACH =>
            {
                ErrorKind::NotAvailable
            }
            c if c == libc::EINPROGRESS || c == libc::EALREADY => ErrorKind::InProgress,
            c if c == libc::EISCONN => ErrorKind::AlreadyConnected,
            c if c == libc::ECONNREFUSED => ErrorKind::ConnectionRefused,
            c if c == libc::ENOTCONN => ErrorKind::NotConnected,
            c if c == libc::ECONNABORTED => ErrorKind::Aborted,
            c if c == libc::EADDRINUSE => ErrorKind::AddressInUse,
            c if c == libc::ETIMEDOUT => ErrorKind::TimedOut,
            c if c == libc::EDQUOT => ErrorKind::QuotaExceeded,
            c if c == libc::EISDIR => ErrorKind::IsDirectory,
            c if c == libc::ENOTDIR => ErrorKind::NotDirectory,
            c if c == libc::EEXIST => ErrorKind::AlreadyExists,
            c if c == libc::ENOENT => ErrorKind::NotExists,
            c if c == libc::ENAMETOOLONG => ErrorKind::NameTooLong,
            c if c == libc::ENOSYS => ErrorKind::NotImplemented,
            c if c == libc::EAGAIN || c == libc::EWOULDBLOCK => ErrorKind::WouldBlock,
            _ => ErrorKind::Failed,
        }
    }

    #[cfg(windows)]
    pub fn from_native(code: i32) -> ErrorKind {
        use windows_sys::Win32::Foundation::{
            ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND,
            ERROR_INVALID_ADDRESS, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER,
            ERROR_NOT_ENOUGH_MEMORY, ERROR_NOT_SUPPORTED, ERROR_NO_MORE_FILES, ERROR_OUTOFMEMORY,
            ERROR_PATH_NOT_FOUND, ERROR_TOO_MANY_OPEN_FILES,
        };
        use windows_sys::Win32::Networking::WinSock::{
            WSAEACCES, WSAEADDRINUSE, WSAEADDRNOTAVAIL, WSAEAFNOSUPPORT, WSAEALREADY, WSAEBADF,
            WSAECANCELLED, WSAECONNABORTED, WSAECONNREFUSED, WSAEHOSTDOWN, WSAEHOSTUNREACH,
            WSAEINPROGRESS, WSAEINVAL, WSAEISCONN, WSAEMFILE, WSAENAMETOOLONG, WSAENETDOWN,
            WSAENETUNREACH, WSAENOBUFS, WSAENOTCONN, WSAENOTSOCK, WSAEOPNOTSUPP, WSAEPFNOSUPPORT,
            WSAEPROTONOSUPPORT, WSAESOCKTNOSUPPORT, WSAETIMEDOUT, WSAEWOULDBLOCK,
            WSA_INVALID_HANDLE, WSA_INVALID_PARAMETER,
        };

        match code {
            c if c == WSAEADDRINUSE => ErrorKind::AddressInUse,
            c if c == WSAEWOULDBLOCK => ErrorKind::WouldBlock,
            c if c == WSAEACCES || c == ERROR_ACCESS_DENIED as i32 => ErrorKind::AccessDenied,
            c if c == WSA_INVALID_HANDLE
                || c == WSA_INVALID_PARAMETER
                || c == WSAEBADF
                || c == WSAENOTSOCK
                || c == WSAEINVAL
                || c == ERROR_INVALID_HANDLE as i32
                || c == ERROR_INVALID_PARAMETER as i32
                || c == ERROR_INVALID_ADDRESS as i32 =>
            {
                ErrorKind::InvalidArgument
            }
            c if c == WSAESOCKTNOSUPPORT
                || c == WSAEOPNOTSUPP
                || c == WSAEPFNOSUPPORT
                || c == WSAEAFNOSUPPORT
                || c == WSAEPROTONOSUPPORT
                || c == ERROR_NOT_SUPPORTED as i32 =>
            {
                ErrorKind::NotSupported
            }
            c if c == WSAEADDRNOTAVAIL
                || c == WSAENETUNREACH
                || c == WSAENETDOWN
                || c == WSAEHOSTDOWN
                || c == WSAEHOSTUNREACH =>
            {
                ErrorKind::NotAvailable
            }
            c if c == WSAEINPROGRESS || c == WSAEALREADY => ErrorKind::InProgress,
            c if c == WSAEISCONN => ErrorKind::AlreadyConnected,
            c if c == WSAECONNREFUSED => ErrorKind::ConnectionRefused,
            c if c == WSAENOTCONN => ErrorKind::NotConnected,
            c if c == WSAECONNABORTED || c == WSAECANCELLED => ErrorKind::Aborted,
            c if c == WSAETIMEDOUT => ErrorKind::TimedOut,
            c if c == WSAENOBUFS
                || c == WSAEMFILE
                || c == ERROR_OUTOFMEMORY as i32
                || c == ERROR_NOT_ENOUGH_MEMORY as i32
                || c == ERROR_TOO_MANY_OPEN_FILES as i32 =>
            {
                ErrorKind::NoResources
            }
            c if c == WSAENAMETOOLONG => ErrorKind::NameTooLong,
            c if c == ERROR_ALREADY_EXISTS as i32 || c == ERROR_FILE_EXISTS as i32 => {
                ErrorKind::AlreadyExists
            }
            c if c == ERROR_FILE_NOT_FOUND as i32 || c == ERROR_PATH_NOT_FOUND as i32 => {
                ErrorKind::NotExists
            }
            c if c == ERROR_NO_MORE_FILES as i32 => ErrorKind::NoMoreData,
            _ => ErrorKind::Failed,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed socket operation: portable kind, optional native code, and the
/// operation that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{context}: {kind}")]
pub struct Error {
    kind: ErrorKind,
    native: Option<i32>,
    context: &'static str,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, context: &'static str) -> Error {
        Error {
            kind,
            native: None,
            context,
        }
    }

    /// Wraps a raw native code, classifying it through the platform table.
    pub(crate) fn from_native(code: i32, context: &'static str) -> Error {
        Error {
            kind: ErrorKind::from_native(code),
            native: Some(code),
            context,
        }
    }

    pub(crate) fn from_io(err: io::Error, context: &'static str) -> Error {
        match err.raw_os_error() {
            Some(code) => Error::from_native(code, context),
            None => {
                let kind = match err.kind() {
                    io::ErrorKind::TimedOut => ErrorKind::TimedOut,
                    io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
                    io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
                    io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                    io::ErrorKind::NotConnected => ErrorKind::NotConnected,
                    io::ErrorKind::AddrInUse => ErrorKind::AddressInUse,
                    io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
                    io::ErrorKind::Unsupported => ErrorKind::NotSupported,
                    _ => ErrorKind::Failed,
                };
                Error {
                    kind,
                    native: None,
                    context,
                }
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The unmapped platform code, when the failure came from a native call.
    pub fn native_code(&self) -> Option<i32> {
        self.native
    }

    /// The operation that reported the failure.
    pub fn context(&self) -> &'static str {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn native_table_maps_common_codes() {
        assert_eq!(ErrorKind::from_native(libc::EAGAIN), ErrorKind::WouldBlock);
        assert_eq!(
            ErrorKind::from_native(libc::EWOULDBLOCK),
            ErrorKind::WouldBlock
        );
        assert_eq!(
            ErrorKind::from_native(libc::EADDRINUSE),
            ErrorKind::AddressInUse
        );
        assert_eq!(
            ErrorKind::from_native(libc::ECONNREFUSED),
            ErrorKind::ConnectionRefused
        );
        assert_eq!(
            ErrorKind::from_native(libc::EINPROGRESS),
            ErrorKind::InProgress
        );
        assert_eq!(ErrorKind::from_native(libc::EISCONN), ErrorKind::AlreadyConnected);
        assert_eq!(ErrorKind::from_native(libc::ETIMEDOUT), ErrorKind::TimedOut);
        assert_eq!(ErrorKind::from_native(libc::EPERM), ErrorKind::AccessDenied);
        assert_eq!(ErrorKind::from_native(libc::EMFILE), ErrorKind::NoResources);
    }

    #[cfg(windows)]
    #[test]
    fn native_table_maps_common_codes() {
        use windows_sys::Win32::Foundation::{
            ERROR_FILE_EXISTS, ERROR_INVALID_ADDRESS, ERROR_PATH_NOT_FOUND,
            ERROR_TOO_MANY_OPEN_FILES,
        };
        use windows_sys::Win32::Networking::WinSock::{
            WSAEADDRINUSE, WSAECANCELLED, WSAECONNREFUSED, WSAEWOULDBLOCK,
        };

        assert_eq!(ErrorKind::from_native(WSAEWOULDBLOCK), ErrorKind::WouldBlock);
        assert_eq!(
            ErrorKind::from_native(WSAEADDRINUSE),
            ErrorKind::AddressInUse
        );
        assert_eq!(
            ErrorKind::from_native(WSAECONNREFUSED),
            ErrorKind::ConnectionRefused
        );
        assert_eq!(ErrorKind::from_native(WSAECANCELLED), ErrorKind::Aborted);
        assert_eq!(
            ErrorKind::from_native(ERROR_PATH_NOT_FOUND as i32),
            ErrorKind::NotExists
        );
        assert_eq!(
            ErrorKind::from_native(ERROR_TOO_MANY_OPEN_FILES as i32),
            ErrorKind::NoResources
        );
        assert_eq!(
            ErrorKind::from_native(ERROR_FILE_EXISTS as i32),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ErrorKind::from_native(ERROR_INVALID_ADDRESS as i32),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn unmapped_codes_fall_through_to_failed() {
        assert_eq!(ErrorKind::from_native(-1), ErrorKind::Failed);
        assert_eq!(ErrorKind::from_native(987_654), ErrorKind::Failed);
    }

    #[test]
    fn display_carries_context_and_kind() {
        let err = Error::new(ErrorKind::TimedOut, "recv");
        assert_eq!(err.to_string(), "recv: operation timed out");
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(err.native_code(), None);
    }

    #[cfg(unix)]
    #[test]
    fn io_error_conversion_keeps_native_code() {
        let io_err = std::io::Error::from_raw_os_error(libc::ECONNABORTED);
        let err = Error::from_io(io_err, "accept");
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(err.native_code(), Some(libc::ECONNABORTED));
    }
}
