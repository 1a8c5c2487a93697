//! Relay message taxonomy.
//!
//! Every message crossing the coordinating process is a [`RelayEnvelope`]:
//! the sender's [`ProcessIdentity`] plus one [`RelayMessage`] variant.
//! Variants ending in `Request`, [`RelayMessage::OnlineMembersQuery`] and
//! [`RelayMessage::SaveInvite`] are addressed to the coordinator; zone
//! processes ignore them. Everything else is applied by zone processes.

use serde::{Deserialize, Serialize};

use super::codec::{
    CHARACTER_NAME_LEN, EVENT_NAME_LEN, EXPEDITION_NAME_LEN, MAX_ENTRIES_PER_FRAME, truncate_name,
};
use crate::domain::{
    CharacterId, ExpeditionId, LocationKind, MemberStatus, Notice, ProcessIdentity, ZoneLocation,
};

/// Which expedition flag a [`RelayMessage::Setting`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingKind {
    /// Invitations blocked.
    LockState,
    /// Fresh replay timer granted on join.
    ReplayOnJoin,
}

/// A leader command that has to find its target in another process.
///
/// Travels to the coordinator as a request and comes back as the
/// matching continuation with `is_char_online` filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DzCommand {
    /// Expedition the command is for.
    pub expedition_id: ExpeditionId,
    /// Leader who issued it.
    pub requester_name: String,
    /// Character being invited or promoted.
    pub target_name: String,
    /// Member to swap out, empty when not a swap.
    pub remove_name: String,
    /// Set by the coordinator: whether the target is online anywhere.
    pub is_char_online: bool,
}

impl DzCommand {
    /// Member to swap out, if this is a swap.
    #[must_use]
    pub fn swap_remove_name(&self) -> Option<&str> {
        (!self.remove_name.is_empty()).then_some(self.remove_name.as_str())
    }
}

/// One member's location in an online-status query or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterEntry {
    /// Expedition the member belongs to.
    pub expedition_id: ExpeditionId,
    /// Member.
    pub character_id: CharacterId,
    /// Zone the member is in, `0` if unknown.
    pub zone_id: u32,
    /// Instance the member is in, `0` if none.
    pub instance_id: u32,
    /// Whether the member is connected anywhere.
    pub online: bool,
}

impl CharacterEntry {
    /// Query entry for a member whose location is not yet known.
    #[must_use]
    pub const fn query(expedition_id: ExpeditionId, character_id: CharacterId) -> Self {
        Self {
            expedition_id,
            character_id,
            zone_id: 0,
            instance_id: 0,
            online: false,
        }
    }
}

/// Payload of one relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// A new expedition was inserted; load it from storage.
    Create {
        /// New expedition.
        expedition_id: ExpeditionId,
    },
    /// The coordinator deleted an expedition.
    Deleted {
        /// Deleted expedition.
        expedition_id: ExpeditionId,
    },
    /// Every member was removed.
    MembersRemoved {
        /// Affected expedition.
        expedition_id: ExpeditionId,
    },
    /// One member was added or removed.
    MemberChange {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// Member.
        char_id: CharacterId,
        /// Member name.
        char_name: String,
        /// `true` for a removal.
        removed: bool,
    },
    /// One member was swapped for another.
    MemberSwap {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// Member swapped out.
        remove_char_id: CharacterId,
        /// Name of the member swapped out.
        remove_char_name: String,
        /// Member swapped in.
        add_char_id: CharacterId,
        /// Name of the member swapped in.
        add_char_name: String,
    },
    /// A member's status changed.
    MemberStatus {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// Member.
        character_id: CharacterId,
        /// New status.
        status: MemberStatus,
    },
    /// Leadership moved.
    LeaderChanged {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// New leader.
        char_id: CharacterId,
        /// New leader name.
        char_name: String,
    },
    /// An expedition lockout was added or removed.
    Lockout {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// Event name.
        event_name: String,
        /// Expiry as a unix timestamp in seconds.
        expire_time: i64,
        /// Duration in seconds.
        duration: u32,
        /// `true` for a removal.
        remove: bool,
    },
    /// Lock or replay-on-join flag changed.
    Setting {
        /// Which flag.
        kind: SettingKind,
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// New value.
        enabled: bool,
    },
    /// One of the instance's locations changed.
    DzLocation {
        /// Which location.
        kind: LocationKind,
        /// Expedition owning the instance.
        owner_id: ExpeditionId,
        /// Instance zone id.
        dz_zone_id: u32,
        /// Instance id.
        dz_instance_id: u32,
        /// New location.
        location: ZoneLocation,
    },
    /// Asks the coordinator to locate an invite target.
    AddPlayerRequest(DzCommand),
    /// Invite continuation for the process holding the target.
    AddPlayer(DzCommand),
    /// Asks the coordinator to locate a new leader.
    MakeLeaderRequest(DzCommand),
    /// Make-leader continuation for the process holding the target.
    MakeLeader(DzCommand),
    /// Asks the coordinator for the location of cached members.
    OnlineMembersQuery {
        /// Members to look up.
        entries: Vec<CharacterEntry>,
    },
    /// Coordinator answer to [`RelayMessage::OnlineMembersQuery`].
    OnlineMembersReply {
        /// Members with location filled in.
        entries: Vec<CharacterEntry>,
    },
    /// Hands an unanswered invite to the coordinator when its holder
    /// leaves the process.
    SaveInvite {
        /// Invited character.
        character_name: String,
        /// Expedition the invite is for.
        expedition_id: ExpeditionId,
        /// Who sent the invite.
        inviter_name: String,
        /// Member to swap out, empty when not a swap.
        swap_remove_name: String,
    },
    /// Removes a character's lockouts wherever the character is.
    RemoveCharacterLockouts {
        /// Character.
        character_name: String,
        /// Expedition name the lockouts belong to.
        expedition_name: String,
        /// Event, or empty for all of the expedition's lockouts.
        event_name: String,
    },
    /// The instance's duration changed.
    DzDuration {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// New duration in seconds.
        new_duration_seconds: u32,
    },
    /// The instance is about to expire.
    ExpireWarning {
        /// Affected expedition.
        expedition_id: ExpeditionId,
        /// Minutes left.
        minutes_remaining: u32,
    },
    /// A notice for a character connected to some other process.
    CharacterNotice {
        /// Recipient.
        character_name: String,
        /// The notice.
        notice: Notice,
    },
}

impl RelayMessage {
    /// Splits an online-status lookup into queries that each fit one frame.
    #[must_use]
    pub fn online_members_queries(entries: &[CharacterEntry]) -> Vec<Self> {
        entries
            .chunks(MAX_ENTRIES_PER_FRAME)
            .map(|chunk| Self::OnlineMembersQuery {
                entries: chunk.to_vec(),
            })
            .collect()
    }

    /// Short name of the variant, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Deleted { .. } => "deleted",
            Self::MembersRemoved { .. } => "members_removed",
            Self::MemberChange { .. } => "member_change",
            Self::MemberSwap { .. } => "member_swap",
            Self::MemberStatus { .. } => "member_status",
            Self::LeaderChanged { .. } => "leader_changed",
            Self::Lockout { .. } => "lockout",
            Self::Setting { .. } => "setting",
            Self::DzLocation { .. } => "dz_location",
            Self::AddPlayerRequest(_) => "add_player_request",
            Self::AddPlayer(_) => "add_player",
            Self::MakeLeaderRequest(_) => "make_leader_request",
            Self::MakeLeader(_) => "make_leader",
            Self::OnlineMembersQuery { .. } => "online_members_query",
            Self::OnlineMembersReply { .. } => "online_members_reply",
            Self::SaveInvite { .. } => "save_invite",
            Self::RemoveCharacterLockouts { .. } => "remove_character_lockouts",
            Self::DzDuration { .. } => "dz_duration",
            Self::ExpireWarning { .. } => "expire_warning",
            Self::CharacterNotice { .. } => "character_notice",
        }
    }

    /// Returns `true` for messages only the coordinator acts on.
    #[must_use]
    pub const fn is_coordinator_bound(&self) -> bool {
        matches!(
            self,
            Self::AddPlayerRequest(_)
                | Self::MakeLeaderRequest(_)
                | Self::OnlineMembersQuery { .. }
                | Self::SaveInvite { .. }
        )
    }

    fn bound_names(&mut self) {
        match self {
            Self::MemberChange { char_name, .. } | Self::LeaderChanged { char_name, .. } => {
                truncate_name(char_name, CHARACTER_NAME_LEN);
            }
            Self::MemberSwap {
                remove_char_name,
                add_char_name,
                ..
            } => {
                truncate_name(remove_char_name, CHARACTER_NAME_LEN);
                truncate_name(add_char_name, CHARACTER_NAME_LEN);
            }
            Self::Lockout { event_name, .. } => truncate_name(event_name, EVENT_NAME_LEN),
            Self::AddPlayerRequest(cmd)
            | Self::AddPlayer(cmd)
            | Self::MakeLeaderRequest(cmd)
            | Self::MakeLeader(cmd) => {
                truncate_name(&mut cmd.requester_name, CHARACTER_NAME_LEN);
                truncate_name(&mut cmd.target_name, CHARACTER_NAME_LEN);
                truncate_name(&mut cmd.remove_name, CHARACTER_NAME_LEN);
            }
            Self::SaveInvite {
                character_name,
                inviter_name,
                swap_remove_name,
                ..
            } => {
                truncate_name(character_name, CHARACTER_NAME_LEN);
                truncate_name(inviter_name, CHARACTER_NAME_LEN);
                truncate_name(swap_remove_name, CHARACTER_NAME_LEN);
            }
            Self::RemoveCharacterLockouts {
                character_name,
                expedition_name,
                event_name,
            } => {
                truncate_name(character_name, CHARACTER_NAME_LEN);
                truncate_name(expedition_name, EXPEDITION_NAME_LEN);
                truncate_name(event_name, EVENT_NAME_LEN);
            }
            Self::CharacterNotice { character_name, .. } => {
                truncate_name(character_name, CHARACTER_NAME_LEN);
            }
            Self::Create { .. }
            | Self::Deleted { .. }
            | Self::MembersRemoved { .. }
            | Self::MemberStatus { .. }
            | Self::Setting { .. }
            | Self::DzLocation { .. }
            | Self::OnlineMembersQuery { .. }
            | Self::OnlineMembersReply { .. }
            | Self::DzDuration { .. }
            | Self::ExpireWarning { .. } => {}
        }
    }
}

/// A relay message tagged with the process that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Sending zone process, `None` when the coordinator originated it.
    pub sender: Option<ProcessIdentity>,
    /// Payload.
    pub message: RelayMessage,
}

impl RelayEnvelope {
    /// Wraps a message, cutting every name field to its wire width.
    #[must_use]
    pub fn new(sender: Option<ProcessIdentity>, mut message: RelayMessage) -> Self {
        message.bound_names();
        Self { sender, message }
    }

    /// Envelope sent by a zone process.
    #[must_use]
    pub fn from_zone(sender: ProcessIdentity, message: RelayMessage) -> Self {
        Self::new(Some(sender), message)
    }

    /// Envelope originated by the coordinator.
    #[must_use]
    pub fn from_coordinator(message: RelayMessage) -> Self {
        Self::new(None, message)
    }

    /// Returns `true` if `identity` sent this envelope.
    #[must_use]
    pub fn is_echo_for(&self, identity: ProcessIdentity) -> bool {
        self.sender == Some(identity)
    }
}
