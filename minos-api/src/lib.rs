//! MINOS API - Core types and collaborator interfaces for the MINOS kernel
//!
//! This crate provides the types and abstractions shared between the MINOS
//! virtual memory subsystem and its collaborators (the trap handler, the
//! syscall dispatcher, the file layer and the disk driver). It defines:
//!
//! - **Error**: the common error type and `Result` alias
//! - **Memory**: address newtypes, page/sector constants and the user/kernel
//!   address space layout
//! - **Interfaces**: the traits the VM subsystem consumes (hardware page
//!   table manipulation, backing file I/O, swap disk I/O)
//!
//! # Design Principles
//!
//! - **Dependency Inversion**: the VM subsystem depends on these traits, not
//!   on concrete drivers
//! - **Interface Segregation**: one small trait per collaborator

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod error;
pub mod memory;

// Re-export commonly used types
pub use crate::error::{Error, Result};
pub use crate::memory::interface::{BackingFile, HardwareSpace, SwapDisk};
pub use crate::memory::{FaultKind, PhysAddr, VirtAddr, PAGE_SIZE, SECTOR_SIZE};
