//! OPER command handler
//!
//! Verifies the operator block password (Argon2, see the mkpasswd tool) and
//! hands the flag grant to the core's oper path.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use async_trait::async_trait;
use ironircd_core::{
    CommandContext, CommandHandler, CommandSource, HookAction, Message, NumericReply, Pool, Result,
};
use std::sync::Arc;

struct OperHandler;

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("unparsable operator password hash: {}", e);
            false
        }
    }
}

#[async_trait]
impl CommandHandler for OperHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let uid = match &ctx.source {
            CommandSource::User(uid) => uid.clone(),
            _ => return Ok(HookAction::Continue),
        };
        let (name, password) = match (msg.param(0), msg.param(1)) {
            (Some(name), Some(password)) => (name.to_string(), password.to_string()),
            _ => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::ErrNeedMoreParams,
                    vec!["OPER".to_string(), "Not enough parameters".to_string()],
                ))
            }
        };

        let block = match pool.config.operator_block(&name) {
            Some(block) => block.clone(),
            None => {
                return Ok(HookAction::StopWithReply(
                    NumericReply::ErrPasswdMismatch,
                    vec!["Password incorrect".to_string()],
                ))
            }
        };
        if !verify_password(&password, &block.password_hash) {
            return Ok(HookAction::StopWithReply(
                NumericReply::ErrPasswdMismatch,
                vec!["Password incorrect".to_string()],
            ));
        }

        let flags = if block.flags.is_empty() {
            vec!["all".to_string()]
        } else {
            block.flags.clone()
        };
        pool.oper_up(&uid, &flags);
        if let Some(user) = pool.user(&uid) {
            // Opers hear every structured notice by default
            user.write().notice_flags.insert("all".to_string());
        }
        Ok(HookAction::StopSilent)
    }
}

/// Register the OPER handler
pub fn register(pool: &Arc<Pool>) {
    pool.hooks.register_command("oper", "OPER", Arc::new(OperHandler));
}
