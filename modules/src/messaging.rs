//! PRIVMSG and NOTICE command handlers
//!
//! Target resolution lives here; the actual per-user delivery contract
//! (away replies, policy hooks, forwarding) is the core's `privmsg_notice`.
//! Lines arriving over a server link carry the acting user in the message
//! source and are applied with `force` so nothing is lost in transit.

use async_trait::async_trait;
use ironircd_core::{
    CommandContext, CommandHandler, CommandSource, HookAction, Message, MsgOptions, NumericReply,
    Pool, Result, Source,
};
use std::sync::Arc;

struct MessageHandler {
    command: &'static str,
}

#[async_trait]
impl CommandHandler for MessageHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        match &ctx.source {
            CommandSource::User(uid) => self.from_user(pool, uid, msg),
            CommandSource::Server(sid) => self.from_server(pool, sid, msg),
            CommandSource::Unregistered(_) => Ok(HookAction::Continue),
        }
    }
}

impl MessageHandler {
    /// NOTICE never generates error replies; PRIVMSG does
    fn reply_errors(&self) -> bool {
        self.command == "PRIVMSG"
    }

    fn from_user(&self, pool: &Arc<Pool>, uid: &str, msg: &Message) -> Result<HookAction> {
        let target = match msg.param(0) {
            Some(target) if !target.is_empty() => target.to_string(),
            _ => {
                if self.reply_errors() {
                    return Ok(HookAction::StopWithReply(
                        NumericReply::ErrNoRecipient,
                        vec![format!("No recipient given ({})", self.command)],
                    ));
                }
                return Ok(HookAction::StopSilent);
            }
        };
        let text = match msg.param(1) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                if self.reply_errors() {
                    return Ok(HookAction::StopWithReply(
                        NumericReply::ErrNoTextToSend,
                        vec!["No text to send".to_string()],
                    ));
                }
                return Ok(HookAction::StopSilent);
            }
        };

        if target.starts_with('#') {
            self.to_channel(pool, uid, &target, &text, None);
            return Ok(HookAction::StopSilent);
        }

        let target_uid = match pool.user_by_nick(&target) {
            Some(user) => user.read().uid.clone(),
            None => {
                if self.reply_errors() {
                    return Ok(HookAction::StopWithReply(
                        NumericReply::ErrNoSuchNick,
                        vec![target, "No such nick/channel".to_string()],
                    ));
                }
                return Ok(HookAction::StopSilent);
            }
        };

        pool.privmsg_notice(
            &CommandSource::User(uid.to_string()),
            &target_uid,
            self.command,
            &text,
            MsgOptions::default(),
        )?;
        Ok(HookAction::StopSilent)
    }

    /// A relayed message: the acting user is in the source prefix, the
    /// target parameter is a UID or channel
    fn from_server(&self, pool: &Arc<Pool>, sid: &str, msg: &Message) -> Result<HookAction> {
        let acting = match &msg.source {
            Some(Source::Server(id)) => id.clone(),
            _ => return Ok(HookAction::StopSilent),
        };
        let (target, text) = match (msg.param(0), msg.param(1)) {
            (Some(target), Some(text)) => (target.to_string(), text.to_string()),
            _ => return Ok(HookAction::StopSilent),
        };

        if target.starts_with('#') {
            self.to_channel(pool, &acting, &target, &text, Some(sid));
            return Ok(HookAction::StopSilent);
        }

        pool.privmsg_notice(
            &CommandSource::User(acting),
            &target,
            self.command,
            &text,
            MsgOptions {
                force: true,
                dont_forward: false,
            },
        )?;
        Ok(HookAction::StopSilent)
    }

    /// Fan a channel message out to local members and relay it onward
    fn to_channel(
        &self,
        pool: &Arc<Pool>,
        source_uid: &str,
        target: &str,
        text: &str,
        origin: Option<&str>,
    ) {
        let chan = match pool.channel(target) {
            Some(chan) => chan,
            None => return,
        };
        let source_mask = pool
            .user(source_uid)
            .map(|u| u.read().full_mask())
            .unwrap_or_else(|| source_uid.to_string());
        let (name, members) = {
            let chan = chan.read();
            (chan.name.clone(), chan.member_uids())
        };
        let line = format!(":{} {} {} :{}", source_mask, self.command, name, text);
        for member in members {
            if member == source_uid {
                continue;
            }
            if let Some(peer) = pool.user(&member) {
                let peer = peer.read();
                if peer.link.is_some() {
                    peer.send_line(&line);
                }
            }
        }
        pool.send_children(
            origin,
            &format!(":{} {} {} :{}", source_uid, self.command, name, text),
        );
    }
}

/// Register PRIVMSG and NOTICE handlers
pub fn register(pool: &Arc<Pool>) {
    pool.hooks.register_command(
        "messaging",
        "PRIVMSG",
        Arc::new(MessageHandler { command: "PRIVMSG" }),
    );
    pool.hooks.register_command(
        "messaging",
        "NOTICE",
        Arc::new(MessageHandler { command: "NOTICE" }),
    );
}
