//! Explicit per-process context.
//!
//! Everything expedition logic needs from the world around it: which
//! process it is running in, the connected players, storage, and the
//! relay. Passed in at construction instead of read from globals.

use std::sync::Arc;

use crate::config::{ExpeditionSettings, StorageFailurePolicy};
use crate::domain::{Notice, ProcessIdentity};
use crate::error::ExpeditionError;
use crate::persistence::ExpeditionStore;
use crate::relay::{RelayEnvelope, RelayLink, RelayMessage};
use crate::session::SessionDirectory;

/// Capabilities and identity of one zone process.
#[derive(Debug, Clone)]
pub struct ZoneContext {
    /// Zone and instance this process serves.
    pub identity: ProcessIdentity,
    /// Players connected here.
    pub sessions: Arc<dyn SessionDirectory>,
    /// Durable storage.
    pub store: Arc<dyn ExpeditionStore>,
    /// Outbound relay.
    pub relay: Arc<dyn RelayLink>,
    /// Expedition behaviour switches.
    pub settings: ExpeditionSettings,
}

impl ZoneContext {
    /// Bundles the capabilities of one process.
    #[must_use]
    pub fn new(
        identity: ProcessIdentity,
        sessions: Arc<dyn SessionDirectory>,
        store: Arc<dyn ExpeditionStore>,
        relay: Arc<dyn RelayLink>,
        settings: ExpeditionSettings,
    ) -> Self {
        Self {
            identity,
            sessions,
            store,
            relay,
            settings,
        }
    }

    /// Broadcasts a message stamped with this process's identity.
    pub fn broadcast(&self, message: RelayMessage) {
        tracing::trace!(kind = message.kind(), sender = %self.identity, "relay send");
        self.relay
            .send(RelayEnvelope::from_zone(self.identity, message));
    }

    /// Delivers a notice to a character by name, locally when connected
    /// here and through the relay otherwise.
    pub fn notify_character(&self, name: &str, notice: Notice) {
        match self.sessions.find_by_name(name) {
            Some(handle) => self.sessions.send(handle.character_id, notice.into()),
            None => self.broadcast(RelayMessage::CharacterNotice {
                character_name: name.to_string(),
                notice,
            }),
        }
    }

    /// Applies the storage failure policy to an insert or update, which
    /// must touch at least one row.
    ///
    /// # Errors
    ///
    /// Under [`StorageFailurePolicy::Abort`], returns the storage error or
    /// [`ExpeditionError::RowsNotAffected`].
    pub fn check_write(
        &self,
        operation: &'static str,
        result: Result<u64, ExpeditionError>,
    ) -> Result<(), ExpeditionError> {
        match result {
            Ok(0) => self.storage_failed(operation, ExpeditionError::RowsNotAffected { operation }),
            Ok(_) => Ok(()),
            Err(e) => self.storage_failed(operation, e),
        }
    }

    /// Applies the storage failure policy to a delete or staged insert,
    /// where touching no rows is normal.
    ///
    /// # Errors
    ///
    /// Under [`StorageFailurePolicy::Abort`], returns the storage error.
    pub fn check_call(
        &self,
        operation: &'static str,
        result: Result<u64, ExpeditionError>,
    ) -> Result<(), ExpeditionError> {
        match result {
            Ok(_) => Ok(()),
            Err(e) => self.storage_failed(operation, e),
        }
    }

    fn storage_failed(&self, operation: &'static str, error: ExpeditionError) -> Result<(), ExpeditionError> {
        match self.settings.storage_failure_policy {
            StorageFailurePolicy::Proceed => {
                tracing::warn!(operation, error = %error, "storage write failed, cache runs ahead of storage");
                Ok(())
            }
            StorageFailurePolicy::Abort => {
                tracing::warn!(operation, error = %error, "storage write failed, operation aborted");
                Err(error)
            }
        }
    }
}
