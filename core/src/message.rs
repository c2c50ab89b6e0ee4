//! IRC message parsing and serialization
//!
//! Implements the RFC 1459 line grammar: an optional `:source` prefix, a
//! command token (letters or a three-digit numeric), up to fourteen middle
//! parameters, and an optional trailing parameter introduced by `:`.

use crate::{Error, Result};
use std::fmt;

/// Maximum number of middle parameters before everything folds into the
/// trailing parameter.
pub const MAX_MIDDLE_PARAMS: usize = 14;

/// Message source (server name or user mask)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Server name or SID
    Server(String),
    /// User source (nick!user@host)
    User {
        nick: String,
        user: String,
        host: String,
    },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Server(name) => write!(f, "{}", name),
            Source::User { nick, user, host } => write!(f, "{}!{}@{}", nick, user, host),
        }
    }
}

/// A parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional source prefix
    pub source: Option<Source>,
    /// Command token, uppercased
    pub command: String,
    /// Parameters; the final one may be a trailing segment
    pub params: Vec<String>,
}

impl Message {
    /// Create a new message without a source
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            source: None,
            command: command.into().to_uppercase(),
            params,
        }
    }

    /// Create a new message with a source
    pub fn with_source(source: Source, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            source: Some(source),
            command: command.into().to_uppercase(),
            params,
        }
    }

    /// First parameter, if present
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(|s| s.as_str())
    }

    /// Parse one protocol line (without its CR/LF terminator)
    pub fn parse(input: &str) -> Result<Self> {
        let mut rest = input.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(Error::MessageParse("empty message".to_string()));
        }

        let source = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = match stripped.split_once(' ') {
                Some((p, t)) => (p, t),
                None => return Err(Error::MessageParse("prefix without command".to_string())),
            };
            rest = tail.trim_start_matches(' ');
            Some(parse_source(prefix)?)
        } else {
            None
        };

        let (command, tail) = match rest.split_once(' ') {
            Some((c, t)) => (c, t.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(Error::MessageParse("missing command".to_string()));
        }
        let numeric = command.len() == 3 && command.chars().all(|c| c.is_ascii_digit());
        if !numeric && !command.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::MessageParse(format!("invalid command token: {}", command)));
        }

        let mut params = Vec::new();
        let mut rest = tail;
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            if params.len() == MAX_MIDDLE_PARAMS {
                // Whatever remains becomes one trailing parameter.
                params.push(rest.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((word, tail)) => {
                    params.push(word.to_string());
                    rest = tail.trim_start_matches(' ');
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            source,
            command: command.to_uppercase(),
            params,
        })
    }

    /// Serialize to one wire line, without the CRLF terminator
    pub fn to_line(&self) -> String {
        let mut line = String::new();

        if let Some(ref source) = self.source {
            line.push(':');
            line.push_str(&source.to_string());
            line.push(' ');
        }

        line.push_str(&self.command);

        for (i, param) in self.params.iter().enumerate() {
            line.push(' ');
            let last = i == self.params.len() - 1;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                line.push(':');
            }
            line.push_str(param);
        }

        line
    }
}

fn parse_source(prefix: &str) -> Result<Source> {
    if let Some((nick, rest)) = prefix.split_once('!') {
        let (user, host) = rest
            .split_once('@')
            .ok_or_else(|| Error::MessageParse("invalid user prefix".to_string()))?;
        if nick.is_empty() || user.is_empty() || host.is_empty() {
            return Err(Error::MessageParse("invalid user prefix".to_string()));
        }
        Ok(Source::User {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        })
    } else {
        Ok(Source::Server(prefix.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_message() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert!(msg.source.is_none());
    }

    #[test]
    fn test_parse_lowercase_command() {
        let msg = Message::parse("privmsg bob :hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_parse_message_with_source() {
        let msg = Message::parse(":alice!ali@host PRIVMSG #chan :Hello world").unwrap();
        match msg.source {
            Some(Source::User { nick, user, host }) => {
                assert_eq!(nick, "alice");
                assert_eq!(user, "ali");
                assert_eq!(host, "host");
            }
            _ => panic!("expected user source"),
        }
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "Hello world"]);
    }

    #[test]
    fn test_parse_server_source_numeric() {
        let msg = Message::parse(":irc.example.org 001 alice :Welcome").unwrap();
        assert_eq!(msg.source, Some(Source::Server("irc.example.org".to_string())));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["alice", "Welcome"]);
    }

    #[test]
    fn test_parse_rejects_garbage_command() {
        assert!(Message::parse("12 alice").is_err());
        assert!(Message::parse("NI@CK alice").is_err());
        assert!(Message::parse("").is_err());
    }

    #[test]
    fn test_trailing_preserves_spaces_and_colon() {
        let msg = Message::parse("USER ali 0 * ::) double  spaced").unwrap();
        assert_eq!(msg.params[3], ":) double  spaced");
    }

    #[test]
    fn test_param_limit_folds_into_trailing() {
        let line = format!("CMD {}", (0..16).map(|i| i.to_string()).collect::<Vec<_>>().join(" "));
        let msg = Message::parse(&line).unwrap();
        assert_eq!(msg.params.len(), MAX_MIDDLE_PARAMS + 1);
        assert_eq!(msg.params[MAX_MIDDLE_PARAMS], "14 15");
    }

    #[test]
    fn test_serialize_round_trip() {
        let msg = Message::with_source(
            Source::User {
                nick: "alice".to_string(),
                user: "ali".to_string(),
                host: "host".to_string(),
            },
            "PRIVMSG",
            vec!["#chan".to_string(), "Hello world".to_string()],
        );
        assert_eq!(msg.to_line(), ":alice!ali@host PRIVMSG #chan :Hello world");
        assert_eq!(Message::parse(&msg.to_line()).unwrap(), msg);
    }

    #[test]
    fn test_serialize_empty_trailing() {
        let msg = Message::new("AWAY", vec![String::new()]);
        assert_eq!(msg.to_line(), "AWAY :");
    }
}
