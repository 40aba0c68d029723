// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The top level object: one loaded and (possibly) initialized module

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ApplicationType, Config};
use crate::error::{ck_ok, Error, Result};
use crate::usage_err;
use crate::factory::{DefaultFactories, Factories, ModuleSource};
use crate::lowlevel::{Cryptoki, InitializeArgs};
use crate::platform;
use crate::slot::Slot;
use crate::types::{Info, InitializeFlags};

use log::{debug, error};
use pkcs11::*;

/// How `C_Initialize` went
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitializeOutcome {
    /// This context initialized the module and will finalize it
    Initialized,
    /// Somebody else in the process did, the module is usable but this
    /// context will not finalize it
    AlreadyInitialized,
}

#[derive(Debug)]
struct SessionEntry {
    slot: CK_SLOT_ID,
    closed: Arc<AtomicBool>,
}

/// State shared by a context and every slot and session it hands out
pub(crate) struct Inner {
    ll: Arc<dyn Cryptoki>,
    config: Config,
    initialized: AtomicBool,
    usable: AtomicBool,
    sessions: Mutex<HashMap<CK_SESSION_HANDLE, SessionEntry>>,
}

impl Inner {
    /// The call surface, once `C_Initialize` succeeded for this context
    pub(crate) fn ll(&self) -> Result<&dyn Cryptoki> {
        if !self.usable.load(Ordering::SeqCst) {
            return usage_err!("the module is not initialized");
        }
        Ok(self.ll.as_ref())
    }

    pub(crate) fn raw(&self) -> &dyn Cryptoki {
        self.ll.as_ref()
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }

    pub(crate) fn profile(&self) -> PlatformProfile {
        self.ll.profile()
    }

    fn sessions(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<CK_SESSION_HANDLE, SessionEntry>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::ck_rv(CKR_GENERAL_ERROR))
    }

    /// Records a new session, returns its closed flag
    pub(crate) fn register(
        &self,
        handle: CK_SESSION_HANDLE,
        slot: CK_SLOT_ID,
    ) -> Result<Arc<AtomicBool>> {
        let closed = Arc::new(AtomicBool::new(false));
        let entry = SessionEntry {
            slot: slot,
            closed: closed.clone(),
        };
        if let Some(stale) = self.sessions()?.insert(handle, entry) {
            /* the module reused a handle we still had, the old one is
             * gone on the module side */
            stale.closed.store(true, Ordering::SeqCst);
        }
        Ok(closed)
    }

    pub(crate) fn unregister(&self, handle: CK_SESSION_HANDLE) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&handle);
        }
    }

    /// Marks closed and forgets the sessions of one slot, or of all slots
    pub(crate) fn forget_sessions(&self, slot: Option<CK_SLOT_ID>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|_, e| {
                if slot.is_none() || slot == Some(e.slot) {
                    e.closed.store(true, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            });
        }
    }

    pub(crate) fn open_sessions(&self) -> usize {
        match self.sessions.lock() {
            Ok(s) => s.len(),
            Err(_) => 0,
        }
    }

    fn finalize(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.usable.store(false, Ordering::SeqCst);
        self.forget_sessions(None);
        debug!("finalizing the module");
        ck_ok("C_Finalize", self.ll.c_finalize()?)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize the module: {}", e);
        }
        if let Err(e) = self.ll.unload() {
            error!("failed to unload the module: {}", e);
        }
    }
}

/// Two-phase fetch of a `CK_ULONG` list
pub(crate) fn fetch_ulongs(
    function: &'static str,
    mut call: impl FnMut(
        Option<&mut [CK_ULONG]>,
        &mut CK_ULONG,
    ) -> Result<CK_RV>,
) -> Result<Vec<CK_ULONG>> {
    let mut count: CK_ULONG = 0;
    ck_ok(function, call(None, &mut count)?)?;
    let mut list = vec![0; usize::try_from(count)?];
    if list.is_empty() {
        return Ok(list);
    }
    ck_ok(function, call(Some(&mut list), &mut count)?)?;
    list.truncate(usize::try_from(count)?);
    Ok(list)
}

/// A cryptoki module bound with the right profile
///
/// Dropping the last reference (contexts, slots and sessions all hold
/// one) finalizes the module, if this context initialized it, and
/// unloads the library.
pub struct Pkcs11<F: Factories = DefaultFactories> {
    inner: Arc<Inner>,
    factories: Arc<F>,
}

impl Pkcs11<DefaultFactories> {
    /// Loads the library named in the configuration
    pub fn new(config: &Config) -> Result<Pkcs11> {
        let source = ModuleSource::from_config(config)?;
        Pkcs11::with_factories(config, source, DefaultFactories)
    }

    pub fn with_source(
        config: &Config,
        source: ModuleSource,
    ) -> Result<Pkcs11> {
        Pkcs11::with_factories(config, source, DefaultFactories)
    }
}

impl<F: Factories> Pkcs11<F> {
    pub fn with_factories(
        config: &Config,
        source: ModuleSource,
        factories: F,
    ) -> Result<Pkcs11<F>> {
        let profile = platform::resolve(config)?;
        let ll = factories.low_level(&source, profile, config.binding)?;
        debug!("module source {:?} uses the {} profile", source, profile);
        Ok(Pkcs11 {
            inner: Arc::new(Inner {
                ll: ll,
                config: config.clone(),
                initialized: AtomicBool::new(false),
                usable: AtomicBool::new(false),
                sessions: Mutex::new(HashMap::new()),
            }),
            factories: Arc::new(factories),
        })
    }

    pub fn profile(&self) -> PlatformProfile {
        self.inner.profile()
    }

    pub fn factories(&self) -> &F {
        &self.factories
    }

    /// Direct access to the call surface, for what the wrappers don't do
    pub fn low_level(&self) -> &dyn Cryptoki {
        self.inner.raw()
    }

    fn initialize_args(&self) -> Result<Option<InitializeArgs>> {
        let mut args = InitializeArgs::default();
        let config = &self.inner.config;
        if config.application_type == ApplicationType::MultiThreaded {
            args.flags |= InitializeFlags::OS_LOCKING_OK;
        }
        if let Some(ref r) = config.init_reserved {
            args.reserved = Some(CString::new(r.as_str())?);
        }
        if args.flags.is_empty() && args.reserved.is_none() {
            Ok(None)
        } else {
            Ok(Some(args))
        }
    }

    pub fn initialize(&self) -> Result<InitializeOutcome> {
        let args = self.initialize_args()?;
        let rv = self.inner.raw().c_initialize(args.as_ref())?;
        match rv {
            CKR_OK => {
                self.inner.initialized.store(true, Ordering::SeqCst);
                self.inner.usable.store(true, Ordering::SeqCst);
                debug!("module initialized");
                Ok(InitializeOutcome::Initialized)
            }
            CKR_CRYPTOKI_ALREADY_INITIALIZED => {
                self.inner.usable.store(true, Ordering::SeqCst);
                debug!("module was already initialized");
                Ok(InitializeOutcome::AlreadyInitialized)
            }
            _ => Err(Error::ck_fn("C_Initialize", rv)),
        }
    }

    /// Whether the module can be used through this context, that is
    /// initialized by it or by somebody else and not finalized here
    pub fn is_initialized(&self) -> bool {
        self.inner.is_usable()
    }

    /// Whether [Pkcs11::finalize] would call `C_Finalize`
    pub fn initialized_here(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Finalizes the module if this context initialized it, sessions
    /// opened through it are considered closed afterwards
    pub fn finalize(&self) -> Result<()> {
        self.inner.finalize()
    }

    pub fn get_info(&self) -> Result<Info> {
        let mut info = Info::default();
        ck_ok("C_GetInfo", self.inner.ll()?.c_get_info(&mut info)?)?;
        Ok(info)
    }

    pub fn get_slot_list(
        &self,
        token_present: bool,
    ) -> Result<Vec<CK_SLOT_ID>> {
        let ll = self.inner.ll()?;
        fetch_ulongs("C_GetSlotList", |list, count| {
            ll.c_get_slot_list(token_present, list, count)
        })
    }

    pub fn get_slots(&self, token_present: bool) -> Result<Vec<Slot<F>>> {
        Ok(self
            .get_slot_list(token_present)?
            .into_iter()
            .map(|id| self.slot(id))
            .collect())
    }

    pub fn slot(&self, id: CK_SLOT_ID) -> Slot<F> {
        Slot::new(self.inner.clone(), id)
    }

    /// Waits for (or with `CKF_DONT_BLOCK` polls) a slot event, no event
    /// is `None`
    pub fn wait_for_slot_event(
        &self,
        flags: CK_FLAGS,
    ) -> Result<Option<CK_SLOT_ID>> {
        let mut slot: CK_SLOT_ID = 0;
        match self.inner.ll()?.c_wait_for_slot_event(flags, &mut slot)? {
            CKR_OK => Ok(Some(slot)),
            CKR_NO_EVENT => Ok(None),
            rv => Err(Error::ck_fn("C_WaitForSlotEvent", rv)),
        }
    }

    /// Number of sessions opened through this context and not closed yet
    pub fn open_session_count(&self) -> usize {
        self.inner.open_sessions()
    }
}

impl<F: Factories> std::fmt::Debug for Pkcs11<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11")
            .field("profile", &self.profile())
            .field("initialized", &self.is_initialized())
            .field("initialized_here", &self.initialized_here())
            .finish()
    }
}
