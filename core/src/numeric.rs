//! IRC numeric replies used by the core

use crate::{Message, Source};

/// Numeric reply codes emitted by the core and its bundled modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericReply {
    // Connection registration
    RplWelcome = 1,
    RplYourHost = 2,
    RplCreated = 3,
    RplMyInfo = 4,
    RplIsupport = 5,
    RplYourId = 42,

    // LUSERS
    RplLuserClient = 251,
    RplLuserOp = 252,
    RplLuserUnknown = 253,
    RplLuserChannels = 254,
    RplLuserMe = 255,
    RplLocalUsers = 265,
    RplGlobalUsers = 266,

    // User state
    RplUmodeIs = 221,
    RplAway = 301,
    RplUnaway = 305,
    RplNowAway = 306,
    RplYoureOper = 381,
    RplHostHidden = 396,
    RplHostHiddenReset = 397,

    // MOTD
    RplMotd = 372,
    RplMotdStart = 375,
    RplEndOfMotd = 376,

    // Errors
    ErrNoSuchNick = 401,
    ErrNoSuchServer = 402,
    ErrNoRecipient = 411,
    ErrNoTextToSend = 412,
    ErrUnknownCommand = 421,
    ErrNoMotd = 422,
    ErrNoNicknameGiven = 431,
    ErrErroneousNickname = 432,
    ErrNicknameInUse = 433,
    ErrNotRegistered = 451,
    ErrNeedMoreParams = 461,
    ErrAlreadyRegistered = 462,
    ErrPasswdMismatch = 464,
    ErrNoPrivileges = 481,
    ErrUsersDontMatch = 502,
}

impl NumericReply {
    /// Three-digit code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Three-digit ASCII command token
    pub fn token(&self) -> String {
        format!("{:03}", self.code())
    }

    /// Build the reply as a message from `server` to `target`
    pub fn reply(&self, server: &str, target: &str, mut params: Vec<String>) -> Message {
        let mut all = vec![target.to_string()];
        all.append(&mut params);
        Message::with_source(Source::Server(server.to_string()), self.token(), all)
    }
}
