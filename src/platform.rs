// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Detection of the native ABI variant of the host

use std::os::raw::c_ulong;

use crate::config::Config;
use crate::error::{Error, Result};

use log::debug;
use once_cell::sync::Lazy;
use pkcs11::{NativeWord, PackingMode, PlatformProfile};

/* Modules built for Windows use #pragma pack(1) as mandated by the
 * PKCS#11 headers, everybody else uses the natural alignment */
#[cfg(windows)]
const HOST_PACKING: PackingMode = PackingMode::OneByte;
#[cfg(not(windows))]
const HOST_PACKING: PackingMode = PackingMode::Default;

static HOST_PROFILE: Lazy<std::result::Result<PlatformProfile, usize>> =
    Lazy::new(|| {
        let width = std::mem::size_of::<c_ulong>();
        let profile = profile_for_width(width, HOST_PACKING);
        debug!("host cryptoki profile: {:?}", profile);
        profile
    });

/// Builds a profile from a `CK_ULONG` width in bytes, the width is
/// returned back if it is not one cryptoki modules can use
pub fn profile_for_width(
    width: usize,
    packing: PackingMode,
) -> std::result::Result<PlatformProfile, usize> {
    match NativeWord::from_size(width) {
        Some(word) => Ok(PlatformProfile::new(word, packing)),
        None => Err(width),
    }
}

/// The profile of modules built for this host, computed once
pub fn detect() -> Result<PlatformProfile> {
    match *HOST_PROFILE {
        Ok(p) => Ok(p),
        Err(width) => Err(Error::config(format!(
            "unsupported native CK_ULONG width of {} bytes",
            width
        ))),
    }
}

/// The profile to use for a configuration: the forced one if any,
/// otherwise the host profile
pub fn resolve(config: &Config) -> Result<PlatformProfile> {
    match config.profile.forced() {
        Some(p) => Ok(p),
        None => detect(),
    }
}
