// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;
use std::sync::Arc;

use crate::attribute::AttributeSlot;
use crate::config::{ApplicationType, BindMode, ProfileChoice};
use crate::functions::StaticModule;
use crate::mechanism::*;
use crate::memory::AllocationStats;
use crate::slot::Slot;
use crate::types::*;
use crate::vendor::{MockFactories, MockSession};

use ckbind_mock::{EMPTY_SLOT_ID, SLOT_ID, SO_PIN, TOKEN_LABEL, USER_PIN};
use pkcs11::*;
use serial_test::serial;

#[macro_use]
mod util;
use util::*;

mod crypto;
#[cfg(feature = "integration_tests")]
mod dynamic;
mod init;
mod keys;
mod layout;
mod session;

/* The mock module keeps a single, process wide state: every test resets
 * it and runs serially */
struct TestToken {
    profile: PlatformProfile,
    pkcs11: Pkcs11<MockFactories>,
}

impl TestToken {
    fn config(profile: PlatformProfile) -> Config {
        Config::new().with_profile(ProfileChoice::from(profile))
    }

    fn with_config(profile: PlatformProfile, config: &Config) -> TestToken {
        ckbind_mock::reset();
        let pkcs11 = ret_or_panic!(Pkcs11::with_factories(
            config,
            mock_source(profile),
            MockFactories,
        ));
        assert_eq!(pkcs11.profile(), profile);
        TestToken {
            profile: profile,
            pkcs11: pkcs11,
        }
    }

    fn new(profile: PlatformProfile) -> TestToken {
        Self::with_config(profile, &Self::config(profile))
    }

    fn initialized(profile: PlatformProfile) -> TestToken {
        let token = Self::new(profile);
        let outcome = ret_or_panic!(token.pkcs11.initialize());
        assert_eq!(outcome, InitializeOutcome::Initialized);
        token
    }

    fn slot(&self) -> Slot<MockFactories> {
        self.pkcs11.slot(SLOT_ID)
    }

    fn get_session(&self, rw: bool) -> MockSession {
        ret_or_panic!(self.slot().open_session(rw))
    }

    /* read/write session logged in as the normal user */
    fn login(&self) -> MockSession {
        let session = self.get_session(true);
        ret_or_panic!(session.login(CKU_USER, Some(USER_PIN)));
        session
    }
}

fn mock_source(profile: PlatformProfile) -> ModuleSource {
    ModuleSource::Static(Arc::new(StaticModule::new(
        "ckbind-mock",
        ckbind_mock::entries_for(profile),
    )))
}

/* runs a test body once per profile, on a freshly reset module */
fn for_each_profile<T: Fn(&TestToken)>(test: T) {
    for profile in PlatformProfile::ALL {
        let token = TestToken::initialized(profile);
        test(&token);
    }
}
