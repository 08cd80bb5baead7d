//! # Chat Commands
//!
//! A chat line starting with `/` is a command; anything else is chat.
//!
//! | Input                 | Command                     |
//! |-----------------------|-----------------------------|
//! | `/map <level>`        | [`Command::Map`] (host)     |
//! | `/spectate`           | [`Command::Spectate`]       |
//! | `/join`               | [`Command::Join`]           |
//! | `/connect <address>`  | [`Command::Connect`]        |
//! | `/leave`              | [`Command::Leave`]          |
//! | `/quit`               | [`Command::Quit`]           |
//!
//! Command names are case-insensitive; arguments are kept as typed.

use crate::error::{CommandError, CommandResult};

const MAP_USAGE: &str = "Invalid arguments, expected : /map map_name";
const CONNECT_USAGE: &str = "Expected usage : /connect 123.23.45.2";

/// Parsed chat input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Switch the host to a level.
    Map(String),
    /// Stop playing and watch.
    Spectate,
    /// Leave spectator mode.
    Join,
    /// Leave the current session and connect to an address.
    Connect(String),
    /// Leave the current session.
    Leave,
    /// Exit the program.
    Quit,
    /// Plain chat.
    Chat(String),
}

/// Parses one line of chat input. Blank input gives `None`.
///
/// # Errors
///
/// [`CommandError::Unrecognized`] for an unknown `/command`, and
/// [`CommandError::Usage`] when a command gets the wrong arguments.
pub fn parse(input: &str) -> CommandResult<Option<Command>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let Some(body) = input.strip_prefix('/') else {
        return Ok(Some(Command::Chat(input.to_owned())));
    };

    let mut words = body.split_whitespace();
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "map" => match args.as_slice() {
            [level] => Command::Map((*level).to_owned()),
            _ => return Err(CommandError::Usage(MAP_USAGE)),
        },
        "connect" => match args.as_slice() {
            [address] => Command::Connect((*address).to_owned()),
            _ => return Err(CommandError::Usage(CONNECT_USAGE)),
        },
        "spectate" => Command::Spectate,
        "join" => Command::Join,
        "leave" => Command::Leave,
        "quit" => Command::Quit,
        _ => return Err(CommandError::Unrecognized(input.split_whitespace().next().unwrap_or(input).to_owned())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chat_and_blank_input() {
        assert_eq!(parse("  gg  ").unwrap(), Some(Command::Chat("gg".into())));
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("/map pi_mar").unwrap(), Some(Command::Map("pi_mar".into())));
        assert_eq!(parse("/MAP pi_mar").unwrap(), Some(Command::Map("pi_mar".into())));
        assert_eq!(parse("/spectate").unwrap(), Some(Command::Spectate));
        assert_eq!(parse("/join").unwrap(), Some(Command::Join));
        assert_eq!(parse("/leave").unwrap(), Some(Command::Leave));
        assert_eq!(parse("/quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse("/connect 10.0.0.2:31414").unwrap(),
            Some(Command::Connect("10.0.0.2:31414".into()))
        );
    }

    #[test]
    fn test_bad_arguments_report_usage() {
        let err = parse("/map").unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments, expected : /map map_name");
        assert_eq!(parse("/map a b").unwrap_err(), CommandError::Usage(MAP_USAGE));
        assert_eq!(parse("/connect").unwrap_err().to_string(), "Expected usage : /connect 123.23.45.2");
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse("/dance now").unwrap_err().to_string(), "/dance command not recognized.");
    }
}
