use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// A logical REST endpoint of the Discord API.
///
/// Routes identify *workloads* rather than concrete URLs: every call to
/// "post a message" is the same route, whatever channel it targets. The
/// server assigns each route to a rate-limit bucket, and the connection pool
/// keeps one connection per route.
///
/// Routes print as and parse from their `snake_case` name:
///
/// ```
/// use drest_lib::Route;
/// use std::str::FromStr;
///
/// let route = Route::from_str("post_message").unwrap();
/// assert_eq!(route, Route::PostMessage);
/// assert_eq!(route.to_string(), "post_message");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Route {
    // Application commands
    GetGlobalApplicationCommands,
    PostGlobalApplicationCommand,
    GetGlobalApplicationCommand,
    PatchGlobalApplicationCommand,
    DeleteGlobalApplicationCommand,
    BulkPutGlobalApplicationCommands,
    GetGuildApplicationCommands,
    PostGuildApplicationCommand,
    GetGuildApplicationCommand,
    PatchGuildApplicationCommand,
    DeleteGuildApplicationCommand,
    BulkPutGuildApplicationCommands,
    GetGuildApplicationCommandsPermissions,
    GetGuildApplicationCommandPermissions,
    PutGuildApplicationCommandPermissions,
    BatchPutGuildApplicationCommandPermissions,
    // Interactions and followups
    PostInteractionResponse,
    GetInteractionResponse,
    PatchInteractionResponse,
    DeleteInteractionResponse,
    PostFollowupMessage,
    GetFollowupMessage,
    PatchFollowupMessage,
    DeleteFollowupMessage,
    // Audit log and channels
    GetGuildAuditLogs,
    GetChannel,
    PatchChannel,
    DeleteChannel,
    // Messages and reactions
    GetMessages,
    GetMessage,
    PostMessage,
    CrosspostMessage,
    PutReaction,
    DeleteOwnReaction,
    DeleteUserReaction,
    GetReactions,
    DeleteAllReactions,
    DeleteReactionsByEmoji,
    PatchMessage,
    DeleteMessage,
    DeleteMessageOld,
    BulkDeleteMessages,
    // Channel permissions, invites and pins
    PutChannelPermissionOverwrites,
    GetChannelInvites,
    PostChannelInvite,
    DeleteChannelPermissionOverwrites,
    PostFollowNewsChannel,
    PostTriggerTypingIndicator,
    GetPinnedMessages,
    PutPinMessage,
    DeletePinMessage,
    PutRecipientToGroupDm,
    DeleteRecipientFromGroupDm,
    // Threads
    PostThreadWithMessage,
    PostThreadWithoutMessage,
    PutSelfInThread,
    PutThreadMember,
    DeleteSelfFromThread,
    DeleteThreadMember,
    GetThreadMember,
    GetThreadMembers,
    GetActiveThreads,
    GetPublicArchivedThreads,
    GetPrivateArchivedThreads,
    GetJoinedPrivateArchivedThreads,
    // Emoji
    GetEmojiList,
    GetGuildEmoji,
    PostGuildEmoji,
    PatchGuildEmoji,
    DeleteGuildEmoji,
    // Guilds
    PostGuild,
    GetGuild,
    GetGuildPreview,
    PatchGuild,
    DeleteGuild,
    GetGuildChannels,
    PostGuildChannel,
    PatchGuildChannelPositions,
    GetGuildActiveThreads,
    // Guild members, bans and roles
    GetGuildMember,
    GetGuildMembers,
    GetSearchGuildMembers,
    PutGuildMember,
    PatchGuildMember,
    PatchCurrentGuildMember,
    PutGuildMemberRole,
    DeleteGuildMemberRole,
    DeleteGuildMember,
    GetGuildBans,
    GetGuildBan,
    PutGuildBan,
    DeleteGuildBan,
    GetGuildRoles,
    PostGuildRole,
    PatchGuildRolePositions,
    PatchGuildRole,
    DeleteGuildRole,
    // Guild administration
    GetGuildPruneCount,
    PostGuildPrune,
    GetGuildVoiceRegions,
    GetGuildInvites,
    GetGuildIntegrations,
    DeleteGuildIntegration,
    GetGuildWidgetSettings,
    PatchGuildWidget,
    GetGuildWidget,
    GetVanityInvite,
    GetGuildWidgetImage,
    GetGuildWelcomeScreen,
    PatchGuildWelcomeScreen,
    // Voice states and scheduled events
    PatchCurrentUserVoiceState,
    PatchUserVoiceState,
    GetGuildScheduledEvents,
    PostGuildScheduledEvent,
    GetGuildScheduledEvent,
    PatchGuildScheduledEvent,
    DeleteGuildScheduledEvent,
    GetGuildScheduledEventUsers,
    // Templates, invites and stage instances
    GetGuildTemplate,
    PostGuildFromGuildTemplate,
    GetGuildTemplates,
    PostGuildTemplate,
    PutGuildTemplate,
    PatchGuildTemplate,
    DeleteGuildTemplate,
    GetInvite,
    DeleteInvite,
    PostStageInstance,
    GetStageInstance,
    PatchStageInstance,
    DeleteStageInstance,
    // Stickers
    GetSticker,
    GetNitroStickerPacks,
    GetGuildStickers,
    PostGuildSticker,
    PatchGuildSticker,
    DeleteGuildSticker,
    // Users
    GetCurrentUser,
    GetUser,
    PatchCurrentUser,
    GetCurrentUserGuilds,
    DeleteLeaveGuild,
    PostCreateUserDm,
    GetUserConnections,
    // Webhooks
    GetVoiceRegions,
    PostWebhook,
    GetChannelWebhooks,
    GetGuildWebhooks,
    GetWebhook,
    GetWebhookWithToken,
    PatchWebhook,
    PatchWebhookWithToken,
    DeleteWebhook,
    DeleteWebhookWithToken,
    PostExecuteWebhook,
    GetWebhookMessage,
    PatchWebhookMessage,
    DeleteWebhookMessage,
    // Application and gateway
    GetApplicationInfo,
    GetAuthorizationInfo,
    GetGatewayBot,
}

impl Route {
    /// Whether calls to this route edit or delete messages.
    ///
    /// These share an undocumented per-channel limit that the server does
    /// not advertise through rate-limit headers.
    #[must_use]
    pub const fn is_message_mutation(self) -> bool {
        matches!(
            self,
            Self::PatchMessage | Self::DeleteMessage | Self::DeleteMessageOld
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use strum::{EnumCount, IntoEnumIterator};

    use super::Route;

    #[test]
    fn test_route_names_round_trip() {
        for route in Route::iter() {
            assert_eq!(Route::from_str(&route.to_string()), Ok(route));
        }
    }

    #[test]
    fn test_route_snake_case() {
        assert_eq!(Route::GetGuildMember.to_string(), "get_guild_member");
        assert_eq!(
            Route::BulkPutGuildApplicationCommands.to_string(),
            "bulk_put_guild_application_commands"
        );
        let name: &'static str = Route::GetGatewayBot.into();
        assert_eq!(name, "get_gateway_bot");
    }

    #[test]
    fn test_unknown_route() {
        assert!(Route::from_str("post_everything").is_err());
    }

    #[test]
    fn test_route_catalogue_is_complete() {
        assert_eq!(Route::COUNT, 161);
    }

    #[test]
    fn test_message_mutation() {
        assert!(Route::DeleteMessage.is_message_mutation());
        assert!(Route::DeleteMessageOld.is_message_mutation());
        assert!(!Route::PostMessage.is_message_mutation());
    }
}
