//! Host-testable core types shared by every layer of the vireo kernel.
//!
//! This crate holds nothing that requires a kernel runtime: address and
//! page-table-entry types, resource identifiers, the POSIX-like error enum,
//! and the two lock primitives ([`sync::SpinLock`] and
//! [`sync::IrqSpinLock`]) that the rest of the workspace is built on. Every
//! item here is exercised by `cargo test` on the host.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod addr;
pub mod cell;
pub mod config;
pub mod error;
pub mod fd;
pub mod id;
pub mod sync;
