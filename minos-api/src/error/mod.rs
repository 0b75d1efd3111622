//! Error handling module for the MINOS kernel

use core::fmt;

/// Common error type used throughout the MINOS virtual memory subsystem.
///
/// The variants fall into three families with different recovery rules:
/// invalid accesses (`InvalidAddress`, `NotMapped`, `PermissionDenied`,
/// `Unaligned`, `AlreadyMapped`) are fatal to the requesting context,
/// resource exhaustion (`SwapExhausted`, `OutOfMemory`) is fatal to the
/// current kernel operation, and `Io` failures propagate from the disk or
/// file driver up to the faulting request. Nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Address lies outside the range the operation accepts
    InvalidAddress(&'static str),
    /// No page is registered at the given virtual address
    NotMapped,
    /// Write access to a read-only mapping
    PermissionDenied(&'static str),
    /// Address or offset violates a page-alignment precondition
    Unaligned(&'static str),
    /// A page is already registered at the given virtual address
    AlreadyMapped,
    /// Swap slot table has no free slot
    SwapExhausted,
    /// Out of memory
    OutOfMemory,
    /// I/O error
    Io(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            Error::NotMapped => write!(f, "Address not mapped"),
            Error::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Error::Unaligned(msg) => write!(f, "Unaligned argument: {}", msg),
            Error::AlreadyMapped => write!(f, "Address already mapped"),
            Error::SwapExhausted => write!(f, "Swap slot table is full"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;
