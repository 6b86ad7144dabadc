use anyhow::{Context, Result, bail};
use nova_chat::company::{find_modality, intro_messages, support_flags, welcome_messages};
use nova_chat::{
    ApiClient, Applied, ChatError, ChatEvent, ChatSession, FileSessionCache, MemorySessionCache,
    ResolvedModality, SessionCache, SessionState, SocketState, SupportFlags,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

use super::picker::{self, PickerResult};
use super::render::{self, StreamPrinter};
use super::{Loaded, load_company, transcribe_file};
use crate::config::NovaConfig;

const HELP: &str = "\
Commands:
  /like, /dislike          rate the latest answer
  /new                     clear the chat and pick a topic again
  /retry                   start a new session with the current topic
  /status                  show session and connection state
  /transcribe <file> [s]   transcribe a recording and send it
  /quit                    leave
Anything else is sent as a message.";

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    Like,
    Dislike,
    New,
    Retry,
    Status,
    Transcribe { path: PathBuf, secs: f64 },
    Quit,
    Help,
    Usage(&'static str),
    Unknown(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let mut words = command.split_whitespace();
    match words.next().unwrap_or("") {
        "like" | "up" => Input::Like,
        "dislike" | "down" => Input::Dislike,
        "new" | "reset" => Input::New,
        "retry" => Input::Retry,
        "status" => Input::Status,
        "quit" | "exit" | "q" => Input::Quit,
        "help" | "?" => Input::Help,
        "transcribe" => {
            const USAGE: &str = "/transcribe <file> [seconds]";
            let Some(path) = words.next() else {
                return Input::Usage(USAGE);
            };
            let secs = match words.next().map(str::parse::<f64>) {
                None => 0.0,
                Some(Ok(secs)) if secs >= 0.0 => secs,
                Some(_) => return Input::Usage(USAGE),
            };
            Input::Transcribe {
                path: PathBuf::from(path),
                secs,
            }
        }
        other => Input::Unknown(other.to_string()),
    }
}

/// `nova chat` (and bare `nova`)
pub async fn chat_command(
    config: &NovaConfig,
    modality: Option<String>,
    ephemeral: bool,
) -> Result<()> {
    let Loaded {
        chat: chat_config,
        api,
        company,
        modalities,
    } = load_company(config).await?;

    let cache: Arc<dyn SessionCache> = if ephemeral {
        Arc::new(MemorySessionCache::new())
    } else {
        Arc::new(FileSessionCache::new(&config.sessions_dir)?)
    };

    let lang = chat_config.language_code.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", company.name);
    for line in intro_messages(&company, &lang) {
        println!("{}", line);
    }

    let key = match modality {
        Some(wanted) => match find_modality(&modalities, &wanted) {
            Some(m) => m.key.clone(),
            None => {
                let offered: Vec<&str> = modalities.iter().map(|m| m.key.as_str()).collect();
                bail!(
                    "Unknown modality {:?} (offered: {})",
                    wanted,
                    offered.join(", ")
                );
            }
        },
        None => match picker::pick_modality(&mut lines, &modalities).await? {
            PickerResult::Selected(key) => key,
            PickerResult::Quit => return Ok(()),
        },
    };

    let session = ChatSession::new(chat_config, api.clone(), cache)
        .context("Failed to set up chat")?;

    let mut repl = Repl {
        chat: session,
        api,
        modalities,
        lang,
        flags: support_flags(&company),
        bot_name: company.bot_name().to_string(),
        printer: StreamPrinter::new(),
        mid_line: false,
    };

    repl.start(key).await?;
    let outcome = repl.run(&mut lines).await;
    repl.chat.close().await;
    outcome
}

struct Repl {
    chat: ChatSession<ApiClient>,
    api: ApiClient,
    modalities: Vec<ResolvedModality>,
    lang: String,
    flags: SupportFlags,
    bot_name: String,
    printer: StreamPrinter,
    /// An answer is being printed and the cursor sits after it.
    mid_line: bool,
}

impl Repl {
    async fn start(&mut self, key: String) -> Result<()> {
        let state = self.chat.select_modality(Some(key.clone())).await?.clone();
        match state {
            SessionState::Active { .. } => {
                if let Some(modality) = find_modality(&self.modalities, &key) {
                    for line in welcome_messages(modality, &self.lang) {
                        println!("{}: {}", self.bot_name, line);
                    }
                }
            }
            SessionState::Error { message } => {
                eprintln!("[nova: could not start a session: {}]", message);
                eprintln!("[nova: /retry to try again]");
            }
            other => debug!(state = %other, "Session not active after start"),
        }
        prompt();
        Ok(())
    }

    async fn run<R>(&mut self, lines: &mut Lines<R>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if !self.on_input(parse_input(&line), lines).await? {
                        return Ok(());
                    }
                }
                event = self.chat.next_event() => {
                    if !self.on_event(event) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns false to leave.
    async fn on_input<R>(&mut self, input: Input, lines: &mut Lines<R>) -> Result<bool>
    where
        R: AsyncBufRead + Unpin,
    {
        match input {
            Input::Empty => {}
            Input::Text(text) => {
                self.send(&text).await;
                return Ok(true);
            }
            Input::Like => self.rate(true).await,
            Input::Dislike => self.rate(false).await,
            Input::New => {
                self.chat.reset().await?;
                self.printer.reset();
                self.mid_line = false;
                match picker::pick_modality(lines, &self.modalities).await? {
                    PickerResult::Selected(key) => return self.start(key).await.map(|_| true),
                    PickerResult::Quit => return Ok(false),
                }
            }
            Input::Retry => {
                let state = self.chat.retry().await?;
                eprintln!("[nova: session {}]", state);
            }
            Input::Status => self.status(),
            Input::Transcribe { path, secs } => {
                match transcribe_file(&self.api, &path, secs).await {
                    Ok(text) if text.trim().is_empty() => eprintln!("[nova: nothing heard]"),
                    Ok(text) => {
                        println!("(transcribed) {}", text);
                        self.send(&text).await;
                        return Ok(true);
                    }
                    Err(e) => eprintln!("[nova: {:#}]", e),
                }
            }
            Input::Quit => return Ok(false),
            Input::Help => println!("{}", HELP),
            Input::Usage(usage) => eprintln!("[nova: usage: {}]", usage),
            Input::Unknown(cmd) => eprintln!("[nova: unknown command /{}, /help lists commands]", cmd),
        }
        prompt();
        Ok(true)
    }

    async fn send(&mut self, text: &str) {
        self.end_line();
        match self.chat.send_text(text).await {
            Ok(_) => {}
            Err(ChatError::NoActiveSession) => {
                eprintln!("[nova: no active session, /retry to start one]");
                prompt();
            }
            Err(ChatError::NotConnected) => {
                eprintln!("[nova: not connected, message not sent]");
                prompt();
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                eprintln!("[nova: {}]", e);
                prompt();
            }
        }
    }

    async fn rate(&mut self, liked: bool) {
        if !self.flags.collect_feedback {
            eprintln!("[nova: feedback is not collected here]");
            return;
        }
        let Some(response_id) = self
            .chat
            .core()
            .latest_rateable()
            .and_then(|m| m.response_id.clone())
        else {
            eprintln!("[nova: nothing to rate]");
            return;
        };
        match self.chat.submit_feedback(&response_id, liked).await {
            Ok(true) => eprintln!("[nova: thanks for the feedback]"),
            Ok(false) => eprintln!("[nova: already rated]"),
            Err(e) => eprintln!("[nova: {}]", e),
        }
    }

    fn status(&self) {
        println!("topic:      {}", self.chat.flow_type().unwrap_or("-"));
        println!("session:    {}", self.chat.session_state());
        if let Some(id) = self.chat.session_state().session_id() {
            println!("session id: {}", id);
        }
        println!("connection: {}", self.chat.socket_state());
        println!("messages:   {}", self.chat.messages().len());
        if self.chat.is_waiting() {
            println!("waiting for an answer");
        }
    }

    /// Returns false to leave.
    fn on_event(&mut self, event: ChatEvent) -> bool {
        match event {
            ChatEvent::Message(Applied::StreamStarted(idx)) => {
                self.printer.reset();
                print!("{}: ", self.bot_name);
                self.mid_line = true;
                self.print_delta(idx);
            }
            ChatEvent::Message(Applied::StreamUpdated(idx)) => self.print_delta(idx),
            ChatEvent::Message(Applied::StreamFinished(Some(idx))) => {
                self.print_delta(idx);
                self.end_line();
                if let Some(msg) = self.chat.messages().get(idx) {
                    for line in render::answer_footer(msg, self.flags.collect_feedback) {
                        println!("{}", line);
                    }
                }
                prompt();
            }
            ChatEvent::Message(Applied::StreamFinished(None)) => {
                self.end_line();
                prompt();
            }
            ChatEvent::Message(Applied::ServerError(idx)) => {
                self.end_line();
                if let Some(msg) = self.chat.messages().get(idx) {
                    println!("{}: {}", self.bot_name, msg.text);
                }
                prompt();
            }
            ChatEvent::Message(Applied::Skipped) => {}
            ChatEvent::Socket(SocketState::Connected) => debug!("Connected"),
            ChatEvent::Socket(SocketState::Connecting) => {}
            ChatEvent::Socket(state) => {
                self.end_line();
                eprintln!("[nova: connection {}, reconnecting]", state);
            }
            ChatEvent::SessionExpired => {
                self.end_line();
                eprintln!("[nova: session expired, /retry to start a new one]");
            }
            ChatEvent::GatheringSources => {
                if self.mid_line {
                    print!(" (gathering sources...)");
                    flush();
                }
            }
            ChatEvent::Closed => return false,
        }
        true
    }

    fn print_delta(&mut self, idx: usize) {
        let Some(msg) = self.chat.messages().get(idx) else {
            return;
        };
        let delta = self.printer.delta(&msg.text, !msg.is_streaming);
        if !delta.is_empty() {
            print!("{}", delta);
            flush();
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

fn prompt() {
    print!("> ");
    flush();
}

fn flush() {
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(parse_input("  hello there \n"), Input::Text("hello there".into()));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn commands() {
        assert_eq!(parse_input("/like"), Input::Like);
        assert_eq!(parse_input("/dislike"), Input::Dislike);
        assert_eq!(parse_input("/new"), Input::New);
        assert_eq!(parse_input("/retry"), Input::Retry);
        assert_eq!(parse_input("/status"), Input::Status);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/help"), Input::Help);
        assert_eq!(parse_input("/frobnicate now"), Input::Unknown("frobnicate".into()));
        assert_eq!(parse_input("/"), Input::Unknown(String::new()));
    }

    #[test]
    fn transcribe_arguments() {
        assert_eq!(
            parse_input("/transcribe clip.webm"),
            Input::Transcribe {
                path: PathBuf::from("clip.webm"),
                secs: 0.0
            }
        );
        assert_eq!(
            parse_input("/transcribe clip.wav 12.5"),
            Input::Transcribe {
                path: PathBuf::from("clip.wav"),
                secs: 12.5
            }
        );
        assert!(matches!(parse_input("/transcribe"), Input::Usage(_)));
        assert!(matches!(parse_input("/transcribe a.wav soon"), Input::Usage(_)));
        assert!(matches!(parse_input("/transcribe a.wav -1"), Input::Usage(_)));
    }
}
