//! Inbound relay dispatch.

use crate::domain::Leader;
use crate::error::ExpeditionError;
use crate::service::ExpeditionService;

use super::messages::{RelayEnvelope, RelayMessage};

/// Applies one inbound envelope to this process's cache.
///
/// The sender's own echo is dropped first. Nothing here broadcasts:
/// every change was already broadcast by the process that made it.
/// Messages for expeditions this process does not cache are ignored, as
/// are the requests only the coordinator answers.
///
/// # Errors
///
/// Returns storage errors from loading a new expedition, and under the
/// abort policy from the few appliers that write storage.
pub async fn dispatch(service: &mut ExpeditionService, envelope: RelayEnvelope) -> Result<(), ExpeditionError> {
    let kind = envelope.message.kind();
    if envelope.is_echo_for(service.identity()) {
        tracing::trace!(kind, "relay echo dropped");
        return Ok(());
    }
    tracing::trace!(kind, sender = ?envelope.sender, "relay dispatch");

    match envelope.message {
        RelayMessage::Create { expedition_id } => {
            service.cache_expedition(expedition_id).await?;
        }
        RelayMessage::Deleted { expedition_id } => service.apply_deleted(expedition_id),
        RelayMessage::MembersRemoved { expedition_id } => service.apply_members_removed(expedition_id),
        RelayMessage::MemberChange {
            expedition_id,
            char_id,
            char_name,
            removed,
        } => {
            service
                .apply_member_change(expedition_id, char_id, &char_name, removed)
                .await?;
        }
        RelayMessage::MemberSwap {
            expedition_id,
            remove_char_id,
            remove_char_name,
            add_char_id,
            add_char_name,
        } => {
            service
                .apply_member_swap(
                    expedition_id,
                    (remove_char_id, &remove_char_name),
                    (add_char_id, &add_char_name),
                )
                .await?;
        }
        RelayMessage::MemberStatus {
            expedition_id,
            character_id,
            status,
        } => service.apply_member_status(expedition_id, character_id, status),
        RelayMessage::LeaderChanged {
            expedition_id,
            char_id,
            char_name,
        } => service.apply_leader_changed(expedition_id, Leader::new(char_id, char_name)),
        RelayMessage::Lockout {
            expedition_id,
            event_name,
            expire_time,
            duration,
            remove,
        } => {
            service
                .apply_lockout(expedition_id, &event_name, expire_time, duration, remove)
                .await?;
        }
        RelayMessage::Setting {
            kind,
            expedition_id,
            enabled,
        } => service.apply_setting(kind, expedition_id, enabled),
        RelayMessage::DzLocation {
            kind,
            owner_id,
            location,
            ..
        } => service.apply_location(kind, owner_id, location),
        RelayMessage::AddPlayer(command) => service.invites().continue_add_player(&command),
        RelayMessage::MakeLeader(command) => {
            service.invites().continue_make_leader(&command).await?;
        }
        RelayMessage::OnlineMembersReply { entries } => service.apply_online_members(&entries),
        RelayMessage::RemoveCharacterLockouts {
            character_name,
            expedition_name,
            event_name,
        } => {
            service
                .apply_remove_character_lockouts(&character_name, &expedition_name, &event_name)
                .await?;
        }
        RelayMessage::DzDuration {
            expedition_id,
            new_duration_seconds,
        } => service.apply_duration(expedition_id, new_duration_seconds),
        RelayMessage::ExpireWarning {
            expedition_id,
            minutes_remaining,
        } => service.apply_expire_warning(expedition_id, minutes_remaining),
        RelayMessage::CharacterNotice {
            character_name,
            notice,
        } => service.deliver_notice(&character_name, notice),
        RelayMessage::AddPlayerRequest(_)
        | RelayMessage::MakeLeaderRequest(_)
        | RelayMessage::OnlineMembersQuery { .. }
        | RelayMessage::SaveInvite { .. } => {
            tracing::trace!(kind, "coordinator request ignored");
        }
    }
    Ok(())
}
