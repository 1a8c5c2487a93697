//! Messages and window updates delivered to connected players.
//!
//! [`Notice`] is every user-visible chat line this crate can produce; its
//! [`fmt::Display`] output is the text the player reads. [`ClientUpdate`]
//! is what the session layer is asked to deliver: a notice, or one of the
//! expedition window updates.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::instanced_zone::ZoneLocation;
use super::lockout::TimeRemaining;
use super::member::MemberStatus;

/// User-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// No instance could be created for a new expedition.
    InstanceUnavailable,
    /// A new expedition is ready.
    ExpeditionAvailable {
        /// Expedition name.
        expedition: String,
    },
    /// A creation request named someone already in an expedition.
    OtherBelongs {
        /// Requester name.
        requester: String,
        /// Member who already belongs to one.
        name: String,
    },
    /// The requester has no expedition.
    NotAssigned,
    /// The invitee is standing in an instance.
    LeaveZoneFirst {
        /// Invitee name.
        name: String,
    },
    /// The invitee is already in this expedition.
    AlreadyPart {
        /// Invitee name.
        name: String,
    },
    /// The invitee is already in another expedition.
    AlreadyAssigned {
        /// Invitee name.
        name: String,
    },
    /// The invitee holds this expedition's replay timer.
    ReplayTimer {
        /// Invitee name.
        name: String,
        /// Time left on the replay timer.
        remaining: TimeRemaining,
    },
    /// The invitee holds an event lockout the expedition does not.
    EventTimer {
        /// Invitee name.
        name: String,
        /// Event name.
        event: String,
        /// Time left on the lockout.
        remaining: TimeRemaining,
    },
    /// The expedition is full.
    ExceedMax {
        /// Maximum member count.
        max_players: u32,
    },
    /// The invitee already has an invite from this expedition.
    InvitePending {
        /// Invitee name.
        name: String,
    },
    /// The invitee already has an invite from another expedition.
    InvitePendingOther {
        /// Invitee name.
        name: String,
    },
    /// The expedition is locked.
    NotAllowingInvites,
    /// The named character is not online.
    NotOnline {
        /// Character name.
        name: String,
    },
    /// An invite could not be sent.
    InviteFailed {
        /// Invitee name.
        name: String,
    },
    /// An invite was sent.
    Invited {
        /// Invitee name as typed by the leader.
        name: String,
    },
    /// A swap invite was sent.
    SwapInvited {
        /// Invitee name as typed by the leader.
        name: String,
    },
    /// Shown to an invitee.
    AskedToJoin {
        /// Leader name.
        leader: String,
        /// Expedition name.
        expedition: String,
    },
    /// Header before lockout warnings on an invite.
    LockoutWarningHeader {
        /// Expedition name.
        expedition: String,
    },
    /// One lockout the invitee will receive on entering the instance.
    LockoutWarning {
        /// Event name.
        event: String,
        /// Time left on the lockout.
        remaining: TimeRemaining,
    },
    /// The invitee declined.
    InviteDeclined {
        /// Invitee name.
        name: String,
    },
    /// The invitee accepted but the add failed re-validation.
    InviteError {
        /// Invitee name.
        name: String,
    },
    /// The invitee accepted.
    InviteAccepted {
        /// Invitee name.
        name: String,
    },
    /// The expedition leader could not be determined.
    UnableToRetrieveLeader,
    /// The requester is not the leader.
    NotLeader {
        /// Current leader name.
        leader: String,
    },
    /// Leadership was handed over.
    MakeLeaderName {
        /// New leader name.
        name: String,
    },
    /// The proposed new leader is not online.
    MakeLeaderNotOnline {
        /// Proposed leader name.
        name: String,
    },
    /// Shown to the new leader.
    MakeLeaderYou,
    /// The named character is not a member.
    NotMember {
        /// Character name.
        name: String,
    },
    /// A member was removed.
    Removed {
        /// Removed character name, or "Everyone".
        name: String,
        /// Expedition name.
        expedition: String,
    },
    /// The swap-out target is not a member.
    SwapCannotRemove {
        /// Character name.
        name: String,
    },
    /// A member was added.
    MemberAdded {
        /// Added character name.
        name: String,
        /// Expedition name.
        expedition: String,
    },
    /// Leader line of the player list.
    Leader {
        /// Leader name.
        name: String,
    },
    /// Member line of the player list.
    Members {
        /// Comma-separated names.
        names: String,
    },
    /// The instance is about to expire.
    ExpireWarning {
        /// Minutes left.
        minutes: u32,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstanceUnavailable => {
                write!(f, "The instance is not ready yet. Try again later.")
            }
            Self::ExpeditionAvailable { expedition } => {
                write!(f, "Your expedition '{expedition}' is now available.")
            }
            Self::OtherBelongs { requester, name } => write!(
                f,
                "{requester} attempted to create an expedition but {name} already belongs to one."
            ),
            Self::NotAssigned => write!(
                f,
                "You could not use this command because you are not currently assigned to a dynamic zone."
            ),
            Self::LeaveZoneFirst { name } => write!(
                f,
                "{name} must leave their current instance before they can be added."
            ),
            Self::AlreadyPart { name } => {
                write!(f, "{name} is already part of your expedition.")
            }
            Self::AlreadyAssigned { name } => {
                write!(f, "{name} is already assigned to another expedition.")
            }
            Self::ReplayTimer { name, remaining } => write!(
                f,
                "{name} has a replay timer for this expedition ({}D:{}H:{}M remaining).",
                remaining.days, remaining.hours, remaining.minutes
            ),
            Self::EventTimer {
                name,
                event,
                remaining,
            } => write!(
                f,
                "{name} has an event timer for {event} ({}D:{}H:{}M remaining) that this expedition does not share.",
                remaining.days, remaining.hours, remaining.minutes
            ),
            Self::ExceedMax { max_players } => write!(
                f,
                "Adding that player would exceed the expedition's limit of {max_players}."
            ),
            Self::InvitePending { name } => {
                write!(f, "{name} already has a pending invite to your expedition.")
            }
            Self::InvitePendingOther { name } => write!(
                f,
                "{name} already has a pending invite to another expedition."
            ),
            Self::NotAllowingInvites => {
                write!(f, "Your expedition is not currently allowing new members.")
            }
            Self::NotOnline { name } => write!(f, "{name} is not online."),
            Self::InviteFailed { name } => write!(f, "Unable to invite {name}."),
            Self::Invited { name } => write!(f, "Invitation sent to {name}."),
            Self::SwapInvited { name } => write!(f, "Swap invitation sent to {name}."),
            Self::AskedToJoin { leader, expedition } => {
                write!(f, "{leader} has asked you to join the expedition: {expedition}.")
            }
            Self::LockoutWarningHeader { expedition } => write!(
                f,
                "Warning! You will be given replay timers for the following events if you enter {expedition}:"
            ),
            Self::LockoutWarning { event, remaining } => write!(
                f,
                "{event} - {}D:{}H:{}M",
                remaining.days, remaining.hours, remaining.minutes
            ),
            Self::InviteDeclined { name } => {
                write!(f, "{name} has declined your expedition invitation.")
            }
            Self::InviteError { name } => {
                write!(f, "{name} could not be added to your expedition.")
            }
            Self::InviteAccepted { name } => {
                write!(f, "{name} has accepted your expedition invitation.")
            }
            Self::UnableToRetrieveLeader => {
                write!(f, "Unable to retrieve the expedition leader.")
            }
            Self::NotLeader { leader } => write!(
                f,
                "You are not the expedition leader, only {leader} can issue this command."
            ),
            Self::MakeLeaderName { name } => write!(f, "{name} is now the expedition leader."),
            Self::MakeLeaderNotOnline { name } => write!(
                f,
                "{name} is not online and cannot become the expedition leader."
            ),
            Self::MakeLeaderYou => write!(f, "You are now the expedition leader."),
            Self::NotMember { name } => write!(f, "{name} is not a member of this expedition."),
            Self::Removed { name, expedition } => {
                write!(f, "{name} has been removed from {expedition}.")
            }
            Self::SwapCannotRemove { name } => write!(
                f,
                "{name} cannot be swapped out because they are not a member of this expedition."
            ),
            Self::MemberAdded { name, expedition } => {
                write!(f, "{name} has been added to {expedition}.")
            }
            Self::Leader { name } => write!(f, "Expedition leader: {name}"),
            Self::Members { names } => write!(f, "Expedition members: {names}"),
            Self::ExpireWarning { minutes } => write!(
                f,
                "Your expedition will expire in {minutes} minute(s)."
            ),
        }
    }
}

/// Header of the expedition window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpeditionInfo {
    /// Expedition name.
    pub expedition_name: String,
    /// Leader name.
    pub leader_name: String,
    /// Maximum members.
    pub max_players: u32,
}

/// One row of the expedition window's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    /// Member name.
    pub name: String,
    /// Member status.
    pub status: MemberStatus,
}

/// Invite window contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteWindow {
    /// Who sent the invite.
    pub inviter_name: String,
    /// Expedition name.
    pub expedition_name: String,
    /// Member the invitee would replace, for swap invites.
    pub swap_name: Option<String>,
    /// Instance zone id.
    pub dz_zone_id: u32,
    /// Instance id.
    pub dz_instance_id: u32,
}

/// Something the session layer should deliver to one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientUpdate {
    /// A chat line.
    Notice(Notice),
    /// Window header; `None` clears the window.
    ExpeditionInfo(Option<ExpeditionInfo>),
    /// Full member list; empty clears it.
    MemberList(Vec<MemberEntry>),
    /// Single name added to or removed from the member list.
    MemberListName {
        /// Member name.
        name: String,
        /// `true` when added, `false` when removed.
        added: bool,
    },
    /// Single member status change.
    MemberListStatus(MemberEntry),
    /// Leader name changed.
    LeaderName(String),
    /// Invite window.
    Invite(InviteWindow),
    /// Compass marker; `None` removes it.
    Compass(Option<ZoneLocation>),
    /// The player's own lockout list should be re-sent.
    LockoutTimers,
}

impl From<Notice> for ClientUpdate {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}
