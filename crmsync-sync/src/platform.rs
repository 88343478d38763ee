//! Customer-data platform client abstraction.

use crate::config::TenantSettings;
use crate::error::SyncResult;
use async_trait::async_trait;
use crmsync_types::Fields;
use serde::{Deserialize, Serialize};

/// Identifies the platform user traits are written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub email: String,
}

/// Identifies the platform account traits are written to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Operations the agent needs from the platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Reads the tenant's current settings.
    async fn settings(&self) -> SyncResult<TenantSettings>;

    /// Replaces the tenant's settings.
    async fn update_settings(&self, settings: TenantSettings) -> SyncResult<()>;

    /// Writes traits to a user.
    async fn write_user_traits(&self, identity: UserIdentity, traits: Fields) -> SyncResult<()>;

    /// Writes traits to an account.
    async fn write_account_traits(
        &self,
        identity: AccountIdentity,
        traits: Fields,
    ) -> SyncResult<()>;
}

/// In-memory platform client for tests.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        settings: TenantSettings,
        settings_updates: Vec<TenantSettings>,
        user_writes: Vec<(UserIdentity, Fields)>,
        account_writes: Vec<(AccountIdentity, Fields)>,
        fail_writes: bool,
    }

    /// Records every write and serves fixed settings.
    #[derive(Default)]
    pub struct MockPlatform {
        state: Mutex<State>,
    }

    impl MockPlatform {
        pub fn new(settings: TenantSettings) -> Self {
            Self {
                state: Mutex::new(State {
                    settings,
                    ..Default::default()
                }),
            }
        }

        /// Makes trait writes fail.
        pub fn failing_writes(self) -> Self {
            self.state.lock().unwrap().fail_writes = true;
            self
        }

        pub fn current_settings(&self) -> TenantSettings {
            self.state.lock().unwrap().settings.clone()
        }

        pub fn settings_updates(&self) -> Vec<TenantSettings> {
            self.state.lock().unwrap().settings_updates.clone()
        }

        pub fn user_writes(&self) -> Vec<(UserIdentity, Fields)> {
            self.state.lock().unwrap().user_writes.clone()
        }

        pub fn account_writes(&self) -> Vec<(AccountIdentity, Fields)> {
            self.state.lock().unwrap().account_writes.clone()
        }
    }

    #[async_trait]
    impl PlatformClient for MockPlatform {
        async fn settings(&self) -> SyncResult<TenantSettings> {
            Ok(self.current_settings())
        }

        async fn update_settings(&self, settings: TenantSettings) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            state.settings_updates.push(settings.clone());
            state.settings = settings;
            Ok(())
        }

        async fn write_user_traits(&self, identity: UserIdentity, traits: Fields) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(SyncError::Platform("write rejected".to_string()));
            }
            state.user_writes.push((identity, traits));
            Ok(())
        }

        async fn write_account_traits(
            &self,
            identity: AccountIdentity,
            traits: Fields,
        ) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(SyncError::Platform("write rejected".to_string()));
            }
            state.account_writes.push((identity, traits));
            Ok(())
        }
    }
}
