//! Post-registration user commands: NICK, MODE, AWAY
//!
//! These run only for user sources; the link module owns the server-side
//! spellings of the same verbs. The channel command family (JOIN, PART,
//! TOPIC, ...) is not part of this handler set; a channel module would
//! drive the core's membership model the same way these drive the user
//! entity.

use async_trait::async_trait;
use ironircd_core::{
    convert_umode_string, CommandContext, CommandHandler, CommandSource, HookAction, Message,
    NumericReply, Pool, Result,
};
use std::sync::Arc;

fn user_uid(ctx: &CommandContext) -> Option<&str> {
    match &ctx.source {
        CommandSource::User(uid) => Some(uid),
        _ => None,
    }
}

struct NickHandler;

#[async_trait]
impl CommandHandler for NickHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let uid = match user_uid(ctx) {
            Some(uid) => uid.to_string(),
            None => return Ok(HookAction::Continue),
        };
        let new_nick = match msg.param(0) {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::ErrNeedMoreParams,
                    vec!["NICK".to_string(), "Not enough parameters".to_string()],
                ))
            }
        };
        if !ironircd_core::utils::is_valid_nickname(&new_nick, pool.config.limits.max_nick_length) {
            return Ok(HookAction::StopWithReply(
                NumericReply::ErrErroneousNickname,
                vec![new_nick, "Erroneous nickname".to_string()],
            ));
        }

        let old_mask = pool
            .user(&uid)
            .map(|u| u.read().full_mask())
            .unwrap_or_default();

        if pool.change_nick(&uid, &new_nick, None).is_err() {
            return Ok(HookAction::StopWithReply(
                NumericReply::ErrNicknameInUse,
                vec![new_nick, "Nickname is already in use.".to_string()],
            ));
        }

        // The user, everyone sharing a channel, and the network all hear it
        let line = format!(":{} NICK :{}", old_mask, new_nick);
        if let Some(user) = pool.user(&uid) {
            user.read().send_line(&line);
        }
        pool.send_to_common_channels(&uid, None, &line);
        let nick_time = pool
            .user(&uid)
            .map(|u| u.read().nick_time)
            .unwrap_or_default();
        pool.send_children(None, &format!(":{} NICK {} {}", uid, new_nick, nick_time));
        Ok(HookAction::StopSilent)
    }
}

struct ModeHandler;

#[async_trait]
impl CommandHandler for ModeHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let uid = match user_uid(ctx) {
            Some(uid) => uid.to_string(),
            None => return Ok(HookAction::Continue),
        };
        let target = match msg.param(0) {
            Some(target) => target.to_string(),
            None => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::ErrNeedMoreParams,
                    vec!["MODE".to_string(), "Not enough parameters".to_string()],
                ))
            }
        };
        if target.starts_with('#') {
            // Channel modes belong to a channel module
            return Ok(HookAction::Continue);
        }

        let user = match pool.user(&uid) {
            Some(user) => user.read().clone(),
            None => return Ok(HookAction::StopSilent),
        };
        if ironircd_core::utils::fold(&target) != ironircd_core::utils::fold(&user.nick) {
            return Ok(HookAction::StopWithReply(
                NumericReply::ErrUsersDontMatch,
                vec!["Cannot change mode for other users".to_string()],
            ));
        }

        let me = pool.me();
        let my_table = me.read().umodes.clone();

        let mode_str = match msg.param(1) {
            Some(modes) => modes.to_string(),
            None => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::RplUmodeIs,
                    vec![user.modes_string(&my_table)],
                ))
            }
        };

        let applied = pool.apply_umode_string(&uid, &mode_str, false);
        if applied.is_empty() {
            return Ok(HookAction::StopSilent);
        }

        if let Some(entry) = pool.user(&uid) {
            let snapshot = entry.read().clone();
            snapshot.send_line(&format!(
                ":{} MODE {} :{}",
                snapshot.full_mask(),
                snapshot.nick,
                applied
            ));
        }
        // Each peer gets the change under its own letters
        for server in pool.servers() {
            let server = server.read();
            if server.sid == *pool.me_sid() || server.link.is_none() || server.i_sent_burst.is_none()
            {
                continue;
            }
            let translated = convert_umode_string(&my_table, &server.umodes, &applied);
            if translated != "+" {
                server.send_line(&format!(":{} MODE {} :{}", uid, uid, translated));
            }
        }
        Ok(HookAction::StopSilent)
    }
}

struct AwayHandler;

#[async_trait]
impl CommandHandler for AwayHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let uid = match user_uid(ctx) {
            Some(uid) => uid.to_string(),
            None => return Ok(HookAction::Continue),
        };
        let reason = msg.param(0).filter(|r| !r.is_empty()).map(String::from);
        pool.set_away(&uid, reason, None);
        Ok(HookAction::StopSilent)
    }
}

/// Register the user command handlers
pub fn register(pool: &Arc<Pool>) {
    pool.hooks.register_command("user_cmds", "NICK", Arc::new(NickHandler));
    pool.hooks.register_command("user_cmds", "MODE", Arc::new(ModeHandler));
    pool.hooks.register_command("user_cmds", "AWAY", Arc::new(AwayHandler));
}
