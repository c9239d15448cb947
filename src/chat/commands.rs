//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to manage saved sessions without sending messages to the
//! server.

use crate::SessionId;

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Save the current conversation and start a new one.
    New,

    /// Save the current conversation and keep going.
    Save,

    /// List saved sessions.
    Sessions,

    /// Show the current conversation.
    History,

    /// Replace the current conversation with a saved one.
    Load(SessionId),

    /// Delete a saved session.
    Delete(SessionId),

    /// Rename a saved session.
    Title(SessionId, String),

    /// Delete every saved session.
    ClearAll,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use coachline::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/load 1714552200000").is_some());
/// assert!(parse_command("How many rest days a week?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" | "reset" => ChatCommand::New,
        "save" => ChatCommand::Save,
        "sessions" | "list" => ChatCommand::Sessions,
        "history" => ChatCommand::History,
        "load" => parse_id_command(argument, ChatCommand::Load, "/load"),
        "delete" | "rm" => parse_id_command(argument, ChatCommand::Delete, "/delete"),
        "title" => parse_title_command(argument),
        "clear-all" => ChatCommand::ClearAll,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_id_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(SessionId) -> ChatCommand,
{
    match argument {
        Some(arg) => match arg.parse::<SessionId>() {
            Ok(id) => constructor(id),
            Err(_) => ChatCommand::Invalid(format!("{} expects a session id", name)),
        },
        None => ChatCommand::Invalid(format!("{} requires a session id", name)),
    }
}

fn parse_title_command(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/title requires a session id and a title".to_string());
    };
    let mut parts = arg.splitn(2, ' ');
    let id = parts.next().unwrap_or_default();
    let title = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());
    match (id.parse::<SessionId>(), title) {
        (Ok(id), Some(title)) => ChatCommand::Title(id, title.to_string()),
        (Ok(_), None) => ChatCommand::Invalid("/title requires a title".to_string()),
        (Err(_), _) => ChatCommand::Invalid("/title expects a session id".to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Save this conversation and start a new one
  /save                  Save this conversation
  /sessions              List saved sessions
  /history               Show this conversation
  /load <id>             Continue a saved session
  /delete <id>           Delete a saved session
  /title <id> <title>    Rename a saved session
  /clear-all             Delete every saved session
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl-C while a reply is streaming to stop it."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New));
        assert_eq!(parse_command("/NEW"), Some(ChatCommand::New));
        assert_eq!(parse_command("/save"), Some(ChatCommand::Save));
        assert_eq!(parse_command("/sessions"), Some(ChatCommand::Sessions));
        assert_eq!(parse_command("/list"), Some(ChatCommand::Sessions));
        assert_eq!(parse_command("/history"), Some(ChatCommand::History));
        assert_eq!(parse_command("/clear-all"), Some(ChatCommand::ClearAll));
    }

    #[test]
    fn parse_load_and_delete() {
        assert_eq!(
            parse_command("/load 1714552200000"),
            Some(ChatCommand::Load(SessionId::new(1714552200000)))
        );
        assert_eq!(
            parse_command("/delete   42  "),
            Some(ChatCommand::Delete(SessionId::new(42)))
        );
        assert!(matches!(
            parse_command("/load"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/delete yesterday"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("expects")
        ));
    }

    #[test]
    fn parse_title() {
        assert_eq!(
            parse_command("/title 7 Leg day plan"),
            Some(ChatCommand::Title(SessionId::new(7), "Leg day plan".to_string()))
        );
        assert!(matches!(
            parse_command("/title 7"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires a title")
        ));
        assert!(matches!(
            parse_command("/title seven Leg day"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("session id")
        ));
        assert!(matches!(parse_command("/title"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("/model gpt"),
            Some(ChatCommand::Invalid("Unknown command: /model".to_string()))
        );
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("Hello, coach!"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(help.contains("/quit"));
        assert!(help.contains("/load"));
        assert!(help.contains("/title"));
        assert!(help.contains("/clear-all"));
    }
}
