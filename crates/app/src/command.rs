use snafu::{OptionExt, Snafu, ensure};

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Stop,
    Reset,
    SelectModel(String),
    ListModels,
    WebSearch(bool),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CommandError {
    #[snafu(display("unknown command /{name}, try /help"))]
    UnknownCommand { name: String },
    #[snafu(display("/{command} needs an argument: {usage}"))]
    MissingArgument {
        command: &'static str,
        usage: &'static str,
    },
    #[snafu(display("/search takes `on` or `off`, not '{value}'"))]
    InvalidToggle { value: String },
}

pub const HELP: &str = "\
commands:
  /stop            cancel the reply in progress
  /reset           start a new conversation
  /model <id>      use another model for the next message
  /models          list configured models
  /search on|off   toggle web search
  /quit            exit
anything else is sent as a message";

/// Parses one input line. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Result<Option<Input>, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let Some(command_line) = trimmed.strip_prefix('/') else {
        return Ok(Some(Input::Message(line.to_string())));
    };

    let (name, argument) = match command_line.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command_line, ""),
    };

    let input = match name {
        "stop" => Input::Stop,
        "reset" | "new" => Input::Reset,
        "models" => Input::ListModels,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        "model" => {
            ensure!(
                !argument.is_empty(),
                MissingArgumentSnafu {
                    command: "model",
                    usage: "/model <id>",
                }
            );
            Input::SelectModel(argument.to_string())
        }
        "search" => {
            let value = Some(argument)
                .filter(|value| !value.is_empty())
                .context(MissingArgumentSnafu {
                    command: "search",
                    usage: "/search on|off",
                })?;
            Input::WebSearch(parse_toggle(value)?)
        }
        _ => return UnknownCommandSnafu { name }.fail(),
    };

    Ok(Some(input))
}

fn parse_toggle(value: &str) -> Result<bool, CommandError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => InvalidToggleSnafu { value }.fail(),
    }
}
