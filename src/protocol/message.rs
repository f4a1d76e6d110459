//! Line codec for the chat protocol.
//!
//! One message per line: `CODE,arg1,arg2...`. Each command has a fixed
//! arity; when its last argument is free text it takes the remainder of
//! the line, separators included.

use thiserror::Error;

/// Field separator.
pub const SEPARATOR: char = ',';

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Command codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Auth,
    AuthOk,
    ChangeNick,
    ChangeNickOk,
    ChangePassword,
    ChangePasswordOk,
    BroadcastMessage,
    PrivateMessage,
    ListUsers,
    ErrorMessage,
}

impl CommandCode {
    /// All codes.
    pub const ALL: [CommandCode; 10] = [
        CommandCode::Auth,
        CommandCode::AuthOk,
        CommandCode::ChangeNick,
        CommandCode::ChangeNickOk,
        CommandCode::ChangePassword,
        CommandCode::ChangePasswordOk,
        CommandCode::BroadcastMessage,
        CommandCode::PrivateMessage,
        CommandCode::ListUsers,
        CommandCode::ErrorMessage,
    ];

    /// Get the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::Auth => "AUTH",
            CommandCode::AuthOk => "AUTH_OK",
            CommandCode::ChangeNick => "CHANGE_NICK",
            CommandCode::ChangeNickOk => "CHANGE_NICK_OK",
            CommandCode::ChangePassword => "CHANGE_PASSWORD",
            CommandCode::ChangePasswordOk => "CHANGE_PASSWORD_OK",
            CommandCode::BroadcastMessage => "BROADCAST_MESSAGE",
            CommandCode::PrivateMessage => "PRIVATE_MESSAGE",
            CommandCode::ListUsers => "LIST_USERS",
            CommandCode::ErrorMessage => "ERROR_MESSAGE",
        }
    }

    /// Look up a code by its wire representation (case-sensitive).
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == s)
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced while decoding a line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The line was empty.
    #[error("empty line")]
    Empty,

    /// The first field is not a known code.
    #[error("unknown command code '{0}'")]
    UnknownCode(String),

    /// The code is valid but not in this direction.
    #[error("'{0}' is not accepted in this direction")]
    WrongDirection(CommandCode),

    /// Wrong number of arguments.
    #[error("{code} expects {expected} argument(s), got {found}")]
    Arity {
        code: CommandCode,
        expected: usize,
        found: usize,
    },

    /// A free-text argument was blank.
    #[error("{0} requires non-empty text")]
    EmptyText(CommandCode),
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Auth { login: String, password: String },
    ChangeNick { nickname: String },
    ChangePassword { old_password: String, new_password: String },
    Broadcast { text: String },
    Private { recipient: String, text: String },
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    AuthOk { nickname: String },
    ChangeNickOk { nickname: String },
    ChangePasswordOk,
    /// Current online nicknames.
    ListUsers { nicknames: Vec<String> },
    Error { reason: String },
    /// Relayed broadcast.
    Broadcast { from: String, text: String },
    /// Relayed private message.
    Private { from: String, text: String },
}

impl ServerMessage {
    /// Create an error reply.
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            reason: reason.into(),
        }
    }
}

/// Split a line into its code and the unparsed remainder.
fn split_code(line: &str) -> Result<(CommandCode, Option<&str>), DecodeError> {
    let line = line.trim_end_matches(LINE_ENDINGS);
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    let (code, rest) = match line.split_once(SEPARATOR) {
        Some((code, rest)) => (code, Some(rest)),
        None => (line, None),
    };
    let code = CommandCode::from_wire(code)
        .ok_or_else(|| DecodeError::UnknownCode(code.to_string()))?;
    Ok((code, rest))
}

/// Split the remainder into exactly `arity` fields.
///
/// With `text_last`, the final field keeps any further separators.
fn fields<'a>(
    code: CommandCode,
    rest: Option<&'a str>,
    arity: usize,
    text_last: bool,
) -> Result<Vec<&'a str>, DecodeError> {
    let found: Vec<&str> = match rest {
        None => Vec::new(),
        Some(rest) if text_last => rest.splitn(arity, SEPARATOR).collect(),
        Some(rest) => rest.split(SEPARATOR).collect(),
    };
    if found.len() != arity {
        return Err(DecodeError::Arity {
            code,
            expected: arity,
            found: found.len(),
        });
    }
    if text_last && found.last().is_some_and(|text| text.trim().is_empty()) {
        return Err(DecodeError::EmptyText(code));
    }
    Ok(found)
}

impl ClientMessage {
    /// Get the command code of this message.
    pub fn code(&self) -> CommandCode {
        match self {
            ClientMessage::Auth { .. } => CommandCode::Auth,
            ClientMessage::ChangeNick { .. } => CommandCode::ChangeNick,
            ClientMessage::ChangePassword { .. } => CommandCode::ChangePassword,
            ClientMessage::Broadcast { .. } => CommandCode::BroadcastMessage,
            ClientMessage::Private { .. } => CommandCode::PrivateMessage,
        }
    }

    /// Decode one line.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let (code, rest) = split_code(line)?;
        match code {
            CommandCode::Auth => {
                let f = fields(code, rest, 2, false)?;
                Ok(ClientMessage::Auth {
                    login: f[0].to_string(),
                    password: f[1].to_string(),
                })
            }
            CommandCode::ChangeNick => {
                let f = fields(code, rest, 1, false)?;
                Ok(ClientMessage::ChangeNick {
                    nickname: f[0].to_string(),
                })
            }
            CommandCode::ChangePassword => {
                let f = fields(code, rest, 2, false)?;
                Ok(ClientMessage::ChangePassword {
                    old_password: f[0].to_string(),
                    new_password: f[1].to_string(),
                })
            }
            CommandCode::BroadcastMessage => {
                let f = fields(code, rest, 1, true)?;
                Ok(ClientMessage::Broadcast {
                    text: f[0].to_string(),
                })
            }
            CommandCode::PrivateMessage => {
                let f = fields(code, rest, 2, true)?;
                Ok(ClientMessage::Private {
                    recipient: f[0].to_string(),
                    text: f[1].to_string(),
                })
            }
            other => Err(DecodeError::WrongDirection(other)),
        }
    }

    /// Encode as one line, without terminator.
    pub fn encode(&self) -> String {
        let code = self.code().as_str();
        match self {
            ClientMessage::Auth { login, password } => join(code, &[login, password]),
            ClientMessage::ChangeNick { nickname } => join(code, &[nickname]),
            ClientMessage::ChangePassword {
                old_password,
                new_password,
            } => join(code, &[old_password, new_password]),
            ClientMessage::Broadcast { text } => join(code, &[text]),
            ClientMessage::Private { recipient, text } => join(code, &[recipient, text]),
        }
    }
}

impl ServerMessage {
    /// Get the command code of this message.
    pub fn code(&self) -> CommandCode {
        match self {
            ServerMessage::AuthOk { .. } => CommandCode::AuthOk,
            ServerMessage::ChangeNickOk { .. } => CommandCode::ChangeNickOk,
            ServerMessage::ChangePasswordOk => CommandCode::ChangePasswordOk,
            ServerMessage::ListUsers { .. } => CommandCode::ListUsers,
            ServerMessage::Error { .. } => CommandCode::ErrorMessage,
            ServerMessage::Broadcast { .. } => CommandCode::BroadcastMessage,
            ServerMessage::Private { .. } => CommandCode::PrivateMessage,
        }
    }

    /// Decode one line.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let (code, rest) = split_code(line)?;
        match code {
            CommandCode::AuthOk => {
                let f = fields(code, rest, 1, false)?;
                Ok(ServerMessage::AuthOk {
                    nickname: f[0].to_string(),
                })
            }
            CommandCode::ChangeNickOk => {
                let f = fields(code, rest, 1, false)?;
                Ok(ServerMessage::ChangeNickOk {
                    nickname: f[0].to_string(),
                })
            }
            CommandCode::ChangePasswordOk => {
                fields(code, rest, 0, false)?;
                Ok(ServerMessage::ChangePasswordOk)
            }
            CommandCode::ListUsers => Ok(ServerMessage::ListUsers {
                nicknames: rest
                    .map(|rest| rest.split(SEPARATOR).map(String::from).collect())
                    .unwrap_or_default(),
            }),
            CommandCode::ErrorMessage => {
                let f = fields(code, rest, 1, true)?;
                Ok(ServerMessage::error(f[0]))
            }
            CommandCode::BroadcastMessage => {
                let f = fields(code, rest, 2, true)?;
                Ok(ServerMessage::Broadcast {
                    from: f[0].to_string(),
                    text: f[1].to_string(),
                })
            }
            CommandCode::PrivateMessage => {
                let f = fields(code, rest, 2, true)?;
                Ok(ServerMessage::Private {
                    from: f[0].to_string(),
                    text: f[1].to_string(),
                })
            }
            other => Err(DecodeError::WrongDirection(other)),
        }
    }

    /// Encode as one line, without terminator.
    pub fn encode(&self) -> String {
        let code = self.code().as_str();
        match self {
            ServerMessage::AuthOk { nickname } | ServerMessage::ChangeNickOk { nickname } => {
                join(code, &[nickname])
            }
            ServerMessage::ChangePasswordOk => code.to_string(),
            ServerMessage::ListUsers { nicknames } => {
                let refs: Vec<&String> = nicknames.iter().collect();
                join(code, &refs)
            }
            ServerMessage::Error { reason } => join(code, &[reason]),
            ServerMessage::Broadcast { from, text } | ServerMessage::Private { from, text } => {
                join(code, &[from, text])
            }
        }
    }
}

fn join(code: &str, args: &[&String]) -> String {
    let mut line = String::from(code);
    for arg in args {
        line.push(SEPARATOR);
        line.push_str(arg);
    }
    line
}
