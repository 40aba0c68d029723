// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This is ckbind
//!
//! Bindings to PKCS#11 (cryptoki) modules whose `CK_ULONG` is 4 or 8
//! bytes wide and whose structures use the default alignment or 1 byte
//! packing. The profile of a module is detected from the host or forced
//! in the [Config], and one generic low level implementation
//! ([LowLevel]) is instantiated for it.
//!
//! [Pkcs11], [Slot] and [Session] wrap the low level calls: they marshal
//! templates and mechanism parameters into unmanaged memory laid out for
//! the module, run the two call length protocol and keep track of the
//! sessions they opened so that nothing is closed or finalized twice.

pub mod attribute;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod functions;
pub mod loader;
pub mod lowlevel;
pub mod mechanism;
pub mod memory;
pub mod platform;
pub mod session;
pub mod slot;
pub mod types;
pub mod vendor;

#[cfg(feature = "log")]
pub mod log;

pub use attribute::{Attribute, AttributeValue};
pub use config::Config;
pub use context::{InitializeOutcome, Pkcs11};
pub use error::{Error, ErrorKind, Result};
pub use factory::{DefaultFactories, Factories, ModuleSource};
pub use lowlevel::{Cryptoki, LowLevel};
pub use mechanism::{Mechanism, MechanismParams};
pub use session::Session;
pub use slot::Slot;

pub use pkcs11;

#[cfg(test)]
mod tests;
