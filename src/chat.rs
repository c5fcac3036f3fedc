//! Interactive terminal chat (`ragserve chat`).
//!
//! Reads one line per turn from stdin. Lines starting with `/` are
//! commands; anything else is a question sent to the remote model.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/upload <path>` | Index a pdf, txt or docx file and make it active |
//! | `/drop` | Stop using the active document |
//! | `/history` | Print the conversation so far |
//! | `/help` | List commands |
//! | `/quit` | Leave the chat |

use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::RemoteRunnable;
use crate::config::Config;
use crate::extract::DocumentKind;
use crate::ingest::{Ingestor, UploadedFile};
use crate::prompt::Templates;
use crate::session::{ChatSession, Renderer};

const HELP: &str = "\
Commands:
  /upload <path>   index a pdf, txt or docx file and answer from it
  /drop            stop using the active document
  /history         print the conversation so far
  /help            show this help
  /quit            leave the chat
Anything else is sent as a question.";

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Ask(&'a str),
    Upload(&'a str),
    Drop,
    History,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Ask(line);
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "upload" => Command::Upload(arg),
            "drop" => Command::Drop,
            "history" => Command::History,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(name),
        }
    }
}

/// Prints the part of the accumulated text not yet on screen.
#[derive(Default)]
struct TerminalRenderer {
    shown: usize,
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, text: &str) {
        let mut out = std::io::stdout();
        match text.get(self.shown..) {
            Some(tail) => {
                let _ = out.write_all(tail.as_bytes());
            }
            None => {
                let _ = write!(out, "\r{}", text);
            }
        }
        let _ = out.flush();
        self.shown = text.len();
    }
}

/// Run the chat against `[client].endpoint` until `/quit` or end of input.
pub async fn run_chat(config: &Config, file: Option<PathBuf>) -> Result<()> {
    let ingestor = Ingestor::from_config(config)?;
    let runnable = RemoteRunnable::new(config.client.endpoint.clone());
    let mut session = ChatSession::new(
        &config.client.greeting,
        ingestor,
        Templates::from(&config.prompt),
    );

    tracing::info!(endpoint = runnable.base_url(), "chat started");
    println!("assistant> {}", config.client.greeting);
    println!("(type /help for commands)");

    if let Some(path) = file {
        upload(&mut session, &path).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::History => {
                for message in session.history() {
                    println!("{}> {}", message.role, message.content);
                }
            }
            Command::Drop => match session.drop_document() {
                Some(name) => println!("No longer using {}.", name),
                None => println!("No document is active."),
            },
            Command::Upload("") => println!("Usage: /upload <path>"),
            Command::Upload(path) => upload(&mut session, Path::new(path)).await,
            Command::Unknown(name) => println!("Unknown command /{}. Type /help.", name),
            Command::Ask(question) => {
                print!("assistant> ");
                let _ = std::io::stdout().flush();
                let mut renderer = TerminalRenderer::default();
                let result = session.submit(question, &runnable, &mut renderer).await;
                println!();
                if let Err(e) = result {
                    tracing::debug!(error = %e, "turn failed");
                    println!("[response incomplete: {}]", e);
                }
            }
        }
    }

    Ok(())
}

/// Load, check and index `path`, reporting the outcome on stdout.
async fn upload(session: &mut ChatSession, path: &Path) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if DocumentKind::from_file_name(&name).is_err() {
        println!(
            "Cannot upload {}: accepted file types are {}.",
            path.display(),
            DocumentKind::ACCEPTED_EXTENSIONS.join(", ")
        );
        return;
    }

    println!("Processing {}...", name);
    let result = match UploadedFile::from_path(path).await {
        Ok(file) => session.upload(&file).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(chunks) => println!("Using {} ({} chunks) to answer questions.", name, chunks),
        Err(e) => println!("Upload of {} failed: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_questions() {
        assert_eq!(Command::parse("  what is this?  "), Command::Ask("what is this?"));
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(
            Command::parse("/upload docs/my file.pdf"),
            Command::Upload("docs/my file.pdf")
        );
        assert_eq!(Command::parse("/upload"), Command::Upload(""));
        assert_eq!(Command::parse("/drop"), Command::Drop);
        assert_eq!(Command::parse("/history"), Command::History);
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("/frobnicate now"), Command::Unknown("frobnicate"));
    }
}
