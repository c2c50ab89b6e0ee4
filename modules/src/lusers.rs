//! LUSERS command handler

use async_trait::async_trait;
use ironircd_core::{
    CommandContext, CommandHandler, CommandSource, HookAction, Message, NumericReply, Pool, Result,
};
use std::sync::Arc;

struct LusersHandler;

#[async_trait]
impl CommandHandler for LusersHandler {
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

        let total = pool.user_count();
        let invisible = pool.invisible_count();
        let visible = total.saturating_sub(invisible);
        let servers = pool.server_count();
        let opers = pool.oper_count();
        let unknown = pool.unknown_count();
        let channels = pool.channel_count();
        let local = pool.local_user_count();

        pool.send_numeric(
            &user,
            NumericReply::RplLuserClient,
            vec![format!(
                "There are {} users and {} invisible on {} servers",
                visible, invisible, servers
            )],
        );
        pool.send_numeric(
            &user,
            NumericReply::RplLuserOp,
            vec![opers.to_string(), "operator(s) online".to_string()],
        );
        if unknown > 0 {
            pool.send_numeric(
                &user,
                NumericReply::RplLuserUnknown,
                vec![unknown.to_string(), "unknown connection(s)".to_string()],
            );
        }
        pool.send_numeric(
            &user,
            NumericReply::RplLuserChannels,
            vec![channels.to_string(), "channels formed".to_string()],
        );
        pool.send_numeric(
            &user,
            NumericReply::RplLuserMe,
            vec![format!("I have {} clients and {} servers", local, servers - 1)],
        );
        pool.send_numeric(
            &user,
            NumericReply::RplLocalUsers,
            vec![
                local.to_string(),
                local.to_string(),
                format!("Current local users {}, max {}", local, local),
            ],
        );
        pool.send_numeric(
            &user,
            NumericReply::RplGlobalUsers,
            vec![
                total.to_string(),
                total.to_string(),
                format!("Current global users {}, max {}", total, total),
            ],
        );
        Ok(HookAction::StopSilent)
    }
}

/// Register the LUSERS handler
pub fn register(pool: &Arc<Pool>) {
    pool.hooks
        .register_command("lusers", "LUSERS", Arc::new(LusersHandler));
}
