//! Command router — turns raw chat text into typed commands.
//!
//! Parsing is pure: no I/O, no shared state. The grammar is a fixed prefix
//! (configurable, `!` by default), a command name, positional arguments and
//! optional `--key=value` options in any position after the name:
//!
//! ```text
//! !info 2C-B
//! !schematic nitrous oxide --width=400
//! !effects lsd
//! !help
//! ```
//!
//! Messages without the prefix are not commands and are reported as
//! [`Parsed::NotACommand`] so the event loop can ignore them silently.
//! A prefixed message with an unknown name is a [`ParseError::Unrecognized`]
//! — the caller replies with guidance instead of dropping it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Prefixed message with a name outside the recognized set.
    #[error("unrecognized command: {0}")]
    Unrecognized(String),

    /// Prefix present but no command name followed it.
    #[error("empty command")]
    Empty,

    /// A recognized command is missing a required positional argument.
    #[error("command '{command}' requires a {what}")]
    MissingArgument { command: &'static str, what: &'static str },

    /// An option token that is not `--key=value`.
    #[error("malformed option: {0}")]
    BadOption(String),
}

// ── Command model ────────────────────────────────────────────────────────────

/// Recognized command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Info,
    Schematic,
    Effects,
    Help,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Info => "info",
            CommandName::Schematic => "schematic",
            CommandName::Effects => "effects",
            CommandName::Help => "help",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(CommandName::Info),
            "schematic" => Ok(CommandName::Schematic),
            "effects" => Ok(CommandName::Effects),
            "help" => Ok(CommandName::Help),
            _ => Err(()),
        }
    }
}

/// A parsed command. Immutable; created per inbound event and discarded
/// after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: CommandName,
    /// Positional arguments in input order.
    pub args: Vec<String>,
    /// `--key=value` options; keys are lowercased, last occurrence wins.
    pub opts: BTreeMap<String, String>,
    /// Opaque channel/user identifier the event came from.
    pub origin: String,
}

impl Command {
    /// The subject string a lookup command operates on — all positional
    /// arguments joined, so multi-word substance names work unquoted.
    pub fn subject(&self) -> String {
        self.args.join(" ")
    }
}

/// Outcome of parsing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Command(Command),
    /// No command prefix — ordinary chat, ignored by the bot.
    NotACommand,
}

// ── parse ────────────────────────────────────────────────────────────────────

/// Parse one raw message into a [`Parsed`] outcome.
///
/// Pure function; `origin` is carried through untouched.
pub fn parse(text: &str, origin: &str, prefix: &str) -> Result<Parsed, ParseError> {
    let text = text.trim();

    let Some(rest) = text.strip_prefix(prefix) else {
        return Ok(Parsed::NotACommand);
    };

    let mut tokens = rest.split_whitespace();
    let Some(name_token) = tokens.next() else {
        return Err(ParseError::Empty);
    };

    let name = CommandName::from_str(&name_token.to_lowercase())
        .map_err(|_| ParseError::Unrecognized(name_token.to_string()))?;

    let mut args = Vec::new();
    let mut opts = BTreeMap::new();

    for token in tokens {
        if let Some(opt) = token.strip_prefix("--") {
            let Some((key, value)) = opt.split_once('=') else {
                return Err(ParseError::BadOption(token.to_string()));
            };
            if key.is_empty() || value.is_empty() {
                return Err(ParseError::BadOption(token.to_string()));
            }
            opts.insert(key.to_lowercase(), value.to_string());
        } else {
            args.push(token.to_string());
        }
    }

    match name {
        CommandName::Info | CommandName::Schematic | CommandName::Effects => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: name.as_str(),
                    what: "substance name",
                });
            }
        }
        CommandName::Help => {}
    }

    Ok(Parsed::Command(Command {
        name,
        args,
        opts,
        origin: origin.to_string(),
    }))
}

/// One-line usage summary per command, used for `help` replies and
/// `Unrecognized` guidance.
pub fn usage() -> &'static str {
    "commands: !info <substance>, !schematic <substance>, !effects <substance>, !help"
}
