//! Inbound command interpreter
//!
//! Maps raw message text to a typed [`InboundCommand`]. Verbs are matched
//! case-insensitively and may carry a `@botname` suffix (`/start@somebot`).
//! Arguments are split on whitespace and passed through untouched; numeric
//! validation happens in the registry.

use std::sync::LazyLock;

use regex::Regex;

use crate::SubscriberId;
use crate::transport::InboundMessage;

const COMMAND_PREFIX: char = '/';

static VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([a-z_]+)(?:@[A-Za-z0-9_]+)?$").expect("verb pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    Value,
    ShowSettings,
    SetUpper,
    SetLower,
    SetThresholds,
    Reset,
    Help,
    Unrecognized,
}

impl CommandKind {
    fn from_verb(verb: &str) -> CommandKind {
        match verb {
            "start" => CommandKind::Start,
            "stop" => CommandKind::Stop,
            "value" => CommandKind::Value,
            "settings" => CommandKind::ShowSettings,
            "upper" => CommandKind::SetUpper,
            "lower" => CommandKind::SetLower,
            "thresholds" => CommandKind::SetThresholds,
            "reset" => CommandKind::Reset,
            "help" => CommandKind::Help,
            _ => CommandKind::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub sender_id: SubscriberId,
    pub kind: CommandKind,
    pub args: Vec<String>,
}

impl InboundCommand {
    pub fn is_recognized(&self) -> bool {
        self.kind != CommandKind::Unrecognized
    }
}

/// Classify one inbound message. Pure; never fails.
pub fn interpret(message: &InboundMessage) -> InboundCommand {
    let unrecognized = || InboundCommand {
        sender_id: message.sender_id,
        kind: CommandKind::Unrecognized,
        args: Vec::new(),
    };

    let text = message.text.trim();
    if !text.starts_with(COMMAND_PREFIX) {
        return unrecognized();
    }

    let mut tokens = text.split_whitespace();
    let Some(head) = tokens.next() else {
        return unrecognized();
    };

    let head = head.to_ascii_lowercase();
    let Some(verb) = VERB.captures(&head).and_then(|captures| captures.get(1)) else {
        return unrecognized();
    };

    InboundCommand {
        sender_id: message.sender_id,
        kind: CommandKind::from_verb(verb.as_str()),
        args: tokens.map(str::to_string).collect(),
    }
}
