//! # Chat Commands
//!
//! Static table of `!name` chat commands, built once at startup and then shared
//! read-only. Only registered commands exist. The built-in `!commands` lists every
//! registered command with its description.
//!
//! ```text
//! !spawn Entity/Props/Crate   -> command "spawn", params ["Entity/Props/Crate"]
//! ```

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Name of the built-in listing command
pub const LIST_COMMAND: &str = "commands";

const COMMAND_PREFIX: char = '!';

type CommandHandler<T> = Box<dyn Fn(&[&str], &mut T) -> String + Send + Sync>;

struct Command<T> {
    name: String,
    description: String,
    handler: Option<CommandHandler<T>>,
}

/// Registered chat commands invoked against a target of type `T` (usually a session)
pub struct CommandRegistry<T> {
    commands: Vec<Command<T>>,
}

impl<T> Default for CommandRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandRegistry<T> {
    pub fn new() -> Self {
        Self {
            commands: vec![Command {
                name: LIST_COMMAND.to_string(),
                description: "Prints available commands.".to_string(),
                handler: None,
            }],
        }
    }

    /// Register a command. Names are case-insensitive and must be unique.
    pub fn register<F>(&mut self, name: &str, description: &str, handler: F) -> Result<()>
    where
        F: Fn(&[&str], &mut T) -> String + Send + Sync + 'static,
    {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ProtocolError::ConfigError(format!("invalid command name '{name}'")));
        }
        if self.find(&name).is_some() {
            return Err(ProtocolError::ConfigError(format!("command '{name}' already registered")));
        }

        self.commands.push(Command {
            name,
            description: description.to_string(),
            handler: Some(Box::new(handler)),
        });
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, name: &str, description: &str, handler: F) -> Result<Self>
    where
        F: Fn(&[&str], &mut T) -> String + Send + Sync + 'static,
    {
        self.register(name, description, handler)?;
        Ok(self)
    }

    /// Run `input` if it is a registered command.
    ///
    /// Returns `None` when the input is not a command or names an unknown one, so the
    /// caller can treat it as plain chat. Otherwise returns the command output, which
    /// may be empty.
    pub fn try_parse(&self, input: &str, target: &mut T) -> Option<String> {
        let (name, params) = parse_input(input)?;
        let command = self.find(&name)?;

        match &command.handler {
            Some(handler) => Some(handler(&params, target)),
            None => Some(self.listing()),
        }
    }

    /// `(name, description)` of every command in registration order
    pub fn commands(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .iter()
            .map(|command| (command.name.as_str(), command.description.as_str()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(&name.to_lowercase()).is_some()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Command<T>> {
        self.commands.iter().find(|command| command.name == name)
    }

    fn listing(&self) -> String {
        self.commands()
            .map(|(name, description)| format!("{COMMAND_PREFIX}{name} - {description}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<T> fmt::Debug for CommandRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.commands.iter().map(|command| &command.name))
            .finish()
    }
}

/// Split `!name p1 p2` into the lowercased name and its parameters
fn parse_input(input: &str) -> Option<(String, Vec<&str>)> {
    let input = input.trim();
    let body = input.strip_prefix(COMMAND_PREFIX)?;
    if body.is_empty() {
        return None;
    }

    let mut tokens = body.split(' ');
    let name = tokens.next()?.to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, tokens.filter(|token| !token.is_empty()).collect()))
}
