// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::{fetch_ulongs, Inner};
use crate::error::{ck_ok, Error, Result};
use crate::factory::{DefaultFactories, Factories};
use crate::session::Session;
use crate::types::{MechanismInfo, SlotInfo, TokenInfo};

use log::debug;
use pkcs11::*;
use zeroize::Zeroizing;

/// A slot of the module, cheap to clone
pub struct Slot<F: Factories = DefaultFactories> {
    inner: Arc<Inner>,
    id: CK_SLOT_ID,
    factories: PhantomData<fn() -> F>,
}

impl<F: Factories> Clone for Slot<F> {
    fn clone(&self) -> Self {
        Slot {
            inner: self.inner.clone(),
            id: self.id,
            factories: PhantomData,
        }
    }
}

impl<F: Factories> std::fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("id", &self.id).finish()
    }
}

/* Token labels are 32 bytes, blank padded, not NUL terminated */
fn token_label(label: &str) -> Result<[u8; 32]> {
    let bytes = label.as_bytes();
    if bytes.len() > 32 {
        return Err(Error::usage(format!(
            "token label is {} bytes, at most 32 fit",
            bytes.len()
        )));
    }
    let mut padded = [b' '; 32];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

impl<F: Factories> Slot<F> {
    pub(crate) fn new(inner: Arc<Inner>, id: CK_SLOT_ID) -> Slot<F> {
        Slot {
            inner: inner,
            id: id,
            factories: PhantomData,
        }
    }

    pub fn id(&self) -> CK_SLOT_ID {
        self.id
    }

    pub fn get_slot_info(&self) -> Result<SlotInfo> {
        let mut info = SlotInfo::default();
        ck_ok(
            "C_GetSlotInfo",
            self.inner.ll()?.c_get_slot_info(self.id, &mut info)?,
        )?;
        Ok(info)
    }

    pub fn get_token_info(&self) -> Result<TokenInfo> {
        let mut info = TokenInfo::default();
        ck_ok(
            "C_GetTokenInfo",
            self.inner.ll()?.c_get_token_info(self.id, &mut info)?,
        )?;
        Ok(info)
    }

    pub fn get_mechanism_list(&self) -> Result<Vec<CK_MECHANISM_TYPE>> {
        let ll = self.inner.ll()?;
        fetch_ulongs("C_GetMechanismList", |list, count| {
            ll.c_get_mechanism_list(self.id, list, count)
        })
    }

    pub fn get_mechanism_info(
        &self,
        mechanism: CK_MECHANISM_TYPE,
    ) -> Result<MechanismInfo> {
        let mut info = MechanismInfo::default();
        ck_ok(
            "C_GetMechanismInfo",
            self.inner
                .ll()?
                .c_get_mechanism_info(self.id, mechanism, &mut info)?,
        )?;
        Ok(info)
    }

    /// Initializes the token, `None` as SO PIN uses the protected
    /// authentication path
    pub fn init_token(&self, so_pin: Option<&str>, label: &str) -> Result<()> {
        let label = token_label(label)?;
        let pin = so_pin.map(|p| Zeroizing::new(p.as_bytes().to_vec()));
        ck_ok(
            "C_InitToken",
            self.inner.ll()?.c_init_token(
                self.id,
                pin.as_ref().map(|p| p.as_slice()),
                &label,
            )?,
        )
    }

    /// Opens a serial session, registered with the owning context
    pub fn open_session(&self, read_write: bool) -> Result<F::Session> {
        let mut flags = CKF_SERIAL_SESSION;
        if read_write {
            flags |= CKF_RW_SESSION;
        }
        let mut handle: CK_SESSION_HANDLE = CK_INVALID_HANDLE;
        ck_ok(
            "C_OpenSession",
            self.inner.ll()?.c_open_session(self.id, flags, &mut handle)?,
        )?;
        let closed = match self.inner.register(handle, self.id) {
            Ok(c) => c,
            Err(e) => {
                let _ = self.inner.raw().c_close_session(handle);
                return Err(e);
            }
        };
        debug!("opened session {} on slot {}", handle, self.id);
        Ok(F::Session::from(Session::new(
            self.inner.clone(),
            handle,
            self.id,
            closed,
        )))
    }

    /// Closes every session of the slot, including the ones opened by
    /// other contexts in the process
    pub fn close_all_sessions(&self) -> Result<()> {
        self.inner.forget_sessions(Some(self.id));
        ck_ok(
            "C_CloseAllSessions",
            self.inner.ll()?.c_close_all_sessions(self.id)?,
        )
    }
}
