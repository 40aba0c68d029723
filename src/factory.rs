// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Selection of the low level variant and of the session type handed out
//! by a [Pkcs11](crate::Pkcs11) context

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{BindMode, Config};
use crate::error::{Error, Result};
use crate::functions::StaticModule;
use crate::lowlevel::{Cryptoki, LowLevel};
use crate::session::Session;

use pkcs11::*;

/// Where the entry points of a module come from
#[derive(Clone, Debug)]
pub enum ModuleSource {
    Library(PathBuf),
    Static(Arc<StaticModule>),
}

impl ModuleSource {
    /// The library named in a configuration
    pub fn from_config(config: &Config) -> Result<ModuleSource> {
        match config.library {
            Some(ref lib) => Ok(ModuleSource::Library(PathBuf::from(lib))),
            None => Err(Error::config(
                "no module library configured".to_string(),
            )),
        }
    }
}

fn bind<W: Word, P: Packing>(
    source: &ModuleSource,
    mode: BindMode,
    vendor_symbols: &[&'static str],
) -> Result<Arc<dyn Cryptoki>> {
    Ok(match source {
        ModuleSource::Library(path) => {
            Arc::new(LowLevel::<W, P>::load(path, mode, vendor_symbols)?)
        }
        ModuleSource::Static(module) => Arc::new(
            LowLevel::<W, P>::from_static(module, mode, vendor_symbols)?,
        ),
    })
}

/// Builds the low level binding matching `profile`
pub fn low_level_for(
    source: &ModuleSource,
    profile: PlatformProfile,
    mode: BindMode,
    vendor_symbols: &[&'static str],
) -> Result<Arc<dyn Cryptoki>> {
    match (profile.word, profile.packing) {
        (NativeWord::Width4, PackingMode::Default) => {
            bind::<u32, DefaultPacking>(source, mode, vendor_symbols)
        }
        (NativeWord::Width4, PackingMode::OneByte) => {
            bind::<u32, OneBytePacking>(source, mode, vendor_symbols)
        }
        (NativeWord::Width8, PackingMode::Default) => {
            bind::<u64, DefaultPacking>(source, mode, vendor_symbols)
        }
        (NativeWord::Width8, PackingMode::OneByte) => {
            bind::<u64, OneBytePacking>(source, mode, vendor_symbols)
        }
    }
}

/// Customization point of a [Pkcs11](crate::Pkcs11) context, resolved
/// once at construction
pub trait Factories: Send + Sync + 'static {
    /// The session type returned by [Slot::open_session](crate::Slot)
    type Session: From<Session>;

    /// Optional entry points to resolve next to the standard ones
    fn vendor_symbols(&self) -> &'static [&'static str] {
        &[]
    }

    fn low_level(
        &self,
        source: &ModuleSource,
        profile: PlatformProfile,
        mode: BindMode,
    ) -> Result<Arc<dyn Cryptoki>> {
        low_level_for(source, profile, mode, self.vendor_symbols())
    }
}

/// Plain [Session]s, no vendor functions
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFactories;

impl Factories for DefaultFactories {
    type Session = Session;
}
