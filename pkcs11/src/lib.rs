// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Raw PKCS#11 v2.40 definitions
//!
//! This crate carries everything that describes the native cryptoki ABI
//! independently of how a module is loaded: the numeric constants, the
//! width of a native `CK_ULONG` and the structure packing of a module
//! ([profile]), and a declarative description of every mirrored
//! structure from which per-platform byte layouts are computed
//! ([layout], [structs]).

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

mod constants;
pub use constants::*;

pub mod layout;
pub mod profile;
pub mod structs;

pub use profile::{
    DefaultPacking, NativeWord, OneBytePacking, Packing, PackingMode,
    PlatformProfile, Word,
};
