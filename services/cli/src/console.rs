//! Line-oriented console for driving a live session.

use rtvi_core::{ClientConfig, LlmMessage, SessionClient, SessionError};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

pub const HELP: &str = "\
commands:
  say <text>                speak text after the current utterance
  say! <text>               interrupt and speak text
  interrupt                 stop the bot talking
  append <role> <content>   append a message to the LLM context
  context                   ask the bot for its LLM context
  model <name>              switch the LLM model (merged into the config)
  voice <name>              switch the TTS voice (only the change is sent)
  config                    print the current configuration
  mic on|off                toggle the microphone
  help                      show this text
  quit                      disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say { text: String, interrupt: bool },
    Interrupt,
    Append { role: String, content: String },
    Context,
    Model(String),
    Voice(String),
    Config,
    Mic(bool),
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("'{command}' expects {expected}, got '{got}'")]
    InvalidArgument {
        command: &'static str,
        expected: &'static str,
        got: String,
    },
}

/// Parses one console line.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let required = |command: &'static str, argument: &'static str| {
        if rest.is_empty() {
            Err(ParseError::MissingArgument { command, argument })
        } else {
            Ok(rest.to_string())
        }
    };

    match word {
        "" => Err(ParseError::Empty),
        "say" => Ok(Command::Say {
            text: required("say", "text")?,
            interrupt: false,
        }),
        "say!" => Ok(Command::Say {
            text: required("say!", "text")?,
            interrupt: true,
        }),
        "interrupt" => Ok(Command::Interrupt),
        "append" => {
            let rest = required("append", "a role and content")?;
            match rest.split_once(char::is_whitespace) {
                Some((role, content)) if !content.trim().is_empty() => Ok(Command::Append {
                    role: role.to_string(),
                    content: content.trim().to_string(),
                }),
                _ => Err(ParseError::MissingArgument {
                    command: "append",
                    argument: "content",
                }),
            }
        }
        "context" => Ok(Command::Context),
        "model" => Ok(Command::Model(required("model", "a model name")?)),
        "voice" => Ok(Command::Voice(required("voice", "a voice id")?)),
        "config" => Ok(Command::Config),
        "mic" => match rest {
            "on" => Ok(Command::Mic(true)),
            "off" => Ok(Command::Mic(false)),
            "" => Err(ParseError::MissingArgument {
                command: "mic",
                argument: "on|off",
            }),
            other => Err(ParseError::InvalidArgument {
                command: "mic",
                expected: "on|off",
                got: other.to_string(),
            }),
        },
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Whether the console loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Applies one command to the session.
pub fn execute(client: &SessionClient, command: Command) -> Result<Flow, SessionError> {
    match command {
        Command::Say { text, interrupt } => client.say(&text, interrupt)?,
        Command::Interrupt => client.interrupt()?,
        Command::Append { role, content } => {
            client.append_llm_context(&LlmMessage::new(role, content))?
        }
        Command::Context => client.request_llm_context()?,
        Command::Model(model) => {
            client.update_config(service_patch("llm", "model", &model), true, false)?
        }
        Command::Voice(voice) => {
            client.update_config(service_patch("tts", "voice", &voice), true, true)?
        }
        Command::Config => {
            let pretty = serde_json::to_string_pretty(&client.config())
                .unwrap_or_else(|e| format!("<unprintable config: {e}>"));
            println!("{pretty}");
        }
        Command::Mic(enable) => {
            client.enable_mic(enable);
            info!(enable, "Microphone toggled.");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn service_patch(service: &str, option: &str, value: &str) -> ClientConfig {
    ClientConfig::from_value(json!({ service: { option: value } })).unwrap_or_default()
}

/// Reads commands from `input` until EOF or `quit`.
///
/// Parse and session errors are reported and the loop carries on; only a
/// read failure ends it early.
pub async fn run<R>(client: &SessionClient, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        match execute(client, command) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => error!(error = %e, "Command failed."),
        }
    }
    Ok(())
}
