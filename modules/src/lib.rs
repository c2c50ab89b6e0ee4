//! Command handler modules for ironircd
//!
//! The core routes commands by name through its hook registry; everything
//! here is a pluggable handler on top of that contract. `register_all`
//! installs the standard set.

pub mod link;
pub mod lusers;
pub mod messaging;
pub mod motd;
pub mod oper;
pub mod user_cmds;

use ironircd_core::Pool;
use std::sync::Arc;

/// Install the standard handler set into a pool's registry
pub fn register_all(pool: &Arc<Pool>) {
    motd::register(pool);
    lusers::register(pool);
    messaging::register(pool);
    user_cmds::register(pool);
    oper::register(pool);
    link::register(pool);
}
