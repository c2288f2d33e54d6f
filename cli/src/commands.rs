//! Slash commands understood by the interactive `tail` mode

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Older,
    Summary,
    Ask(String),
    /// `/send <entry> <ordinal>` forwards a co-pilot draft
    SendDraft { entry: usize, ordinal: usize },
    Cancel,
    ClearAssistant,
    Comments,
    Comment(String),
    Open(i64),
    Dismiss,
    Mic,
    MicCancel,
    /// Send what voice input has put in the compose buffer
    SendCompose,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, String> {
        let Some(body) = input.strip_prefix('/') else {
            return Err("Not a command".to_string());
        };

        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        match name {
            "quit" | "exit" => Ok(Command::Quit),
            "help" => Ok(Command::Help),
            "older" => Ok(Command::Older),
            "summary" => Ok(Command::Summary),
            "ask" if !rest.is_empty() => Ok(Command::Ask(rest.to_string())),
            "ask" => Err("Usage: /ask <question>".to_string()),
            "send" => {
                let mut parts = rest.split_whitespace().map(str::parse::<usize>);
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(entry)), Some(Ok(ordinal)), None) => Ok(Command::SendDraft { entry, ordinal }),
                    _ => Err("Usage: /send <entry> <ordinal>".to_string()),
                }
            }
            "cancel" => Ok(Command::Cancel),
            "clear" => Ok(Command::ClearAssistant),
            "comments" => Ok(Command::Comments),
            "comment" if !rest.is_empty() => Ok(Command::Comment(rest.to_string())),
            "comment" => Err("Usage: /comment <text>".to_string()),
            "open" => rest
                .parse::<i64>()
                .map(Command::Open)
                .map_err(|_| "Usage: /open <conversation id>".to_string()),
            "dismiss" => Ok(Command::Dismiss),
            "mic" => Ok(Command::Mic),
            "miccancel" => Ok(Command::MicCancel),
            "say" => Ok(Command::SendCompose),
            _ => Err(format!("Unknown command: /{}. Type /help for available commands.", name)),
        }
    }
}

pub fn print_help() {
    println!("Available commands:");
    println!("  <text>                 - Send a message to the conversation");
    println!("  /older                 - Load an older page");
    println!("  /summary               - Stream a summary of the conversation");
    println!("  /ask <question>        - Ask the co-pilot");
    println!("  /send <entry> <n>      - Send draft n of co-pilot answer <entry>");
    println!("  /cancel                - Stop the running summary and co-pilot streams");
    println!("  /clear                 - Forget the co-pilot log, summary and sent drafts");
    println!("  /comments              - Show internal notes");
    println!("  /comment <text>        - Add an internal note");
    println!("  /open <id>             - Switch conversation");
    println!("  /dismiss               - Dismiss the current notice");
    println!("  /mic                   - Start or stop voice input");
    println!("  /miccancel             - Discard the current recording");
    println!("  /say                   - Send the dictated compose text");
    println!("  /quit, /exit           - Exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_draft() {
        assert_eq!(
            Command::parse("/send 3 1"),
            Ok(Command::SendDraft { entry: 3, ordinal: 1 })
        );
        assert!(Command::parse("/send 3").is_err());
        assert!(Command::parse("/send a b").is_err());
    }

    #[test]
    fn test_parse_arguments_keep_spaces() {
        assert_eq!(
            Command::parse("/ask what did   they say?"),
            Ok(Command::Ask("what did   they say?".to_string()))
        );
        assert!(Command::parse("/ask").is_err());
    }

    #[test]
    fn test_parse_plain_commands() {
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
        assert_eq!(Command::parse("/open 12"), Ok(Command::Open(12)));
        assert!(Command::parse("/nope").is_err());
        assert!(Command::parse("hello").is_err());
    }
}
