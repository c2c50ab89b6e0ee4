//! MOTD command handler
//!
//! The welcome path dispatches a synthetic MOTD through the registry, so
//! this module also serves freshly registered users.

use async_trait::async_trait;
use ironircd_core::{
    CommandContext, CommandHandler, CommandSource, HookAction, Message, NumericReply, Pool, Result,
};
use std::sync::Arc;

struct MotdHandler;

#[async_trait]
impl CommandHandler for MotdHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        _msg: &Message,
    ) -> Result<HookAction> {
        let uid = match &ctx.source {
            CommandSource::User(uid) => uid,
            _ => return Ok(HookAction::StopSilent),
        };
        let user = match pool.user(uid) {
            Some(user) => user.read().clone(),
            None => return Ok(HookAction::StopSilent),
        };

        let lines = pool
            .config
            .motd_file
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok());
        let lines = match lines {
            Some(lines) => lines,
            None => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::ErrNoMotd,
                    vec!["MOTD File is missing".to_string()],
                ))
            }
        };

        pool.send_numeric(
            &user,
            NumericReply::RplMotdStart,
            vec![format!("- {} Message of the day -", pool.server_name())],
        );
        for line in lines.lines() {
            pool.send_numeric(&user, NumericReply::RplMotd, vec![format!("- {}", line)]);
        }
        pool.send_numeric(
            &user,
            NumericReply::RplEndOfMotd,
            vec!["End of /MOTD command.".to_string()],
        );
        Ok(HookAction::StopSilent)
    }
}

/// Register the MOTD handler
pub fn register(pool: &Arc<Pool>) {
    pool.hooks.register_command("motd", "MOTD", Arc::new(MotdHandler));
}
