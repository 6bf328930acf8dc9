pub mod conversation_state;
pub mod ocr;
pub mod prompt;
pub mod render;
pub mod settings;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::ValueEnum;
use color_print::cwriteln;
use conversation_state::Transcript;
use eyre::Result;
use futures::StreamExt;
use prompt::generate_prompt;
use render::StreamRenderer;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use settings::{ChatSettings, Model};
use tracing::{debug, info, warn};

use crate::groq_client::{ApiError, ApiMessage, ChatClient, ChatRequest};

const WELCOME_TEXT: &str = "
Hi, I'm Groq Chat. Ask me anything.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Groq Chat CLI

/clear          Clear the conversation history
/model [name]   Show the available models or switch to another one
/history        Print the conversation so far
/image <path>   Extract text from an image and send it as a message
/help           Show this help dialogue
/quit           Quit the application
";

/// Where the chat loop gets its lines from.
pub trait LineSource {
    /// The next line, or `None` once input is exhausted.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

impl LineSource for Editor<()> {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.add_history_entry(line.as_str());
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// What to send before (or instead of) the interactive loop.
#[derive(Debug, Clone)]
pub enum ChatInput {
    Text(String),
    Image(PathBuf),
}

/// Result of handling one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Nothing was sent: empty input or a local command.
    Skipped,
    /// The model answered and the reply was added to the transcript.
    Answered,
    /// The request failed; the user message was rolled back.
    Failed,
}

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<ChatInput>,
    interactive: bool,
    transcript: Transcript,
    settings: ChatSettings,
    client: Box<dyn ChatClient>,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<ChatInput>,
        interactive: bool,
        settings: ChatSettings,
        client: Box<dyn ChatClient>,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            transcript: Transcript::new(),
            settings,
            client,
        }
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[cfg(test)]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        // Non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            let turn = match input {
                ChatInput::Text(text) => self.handle_input(&text).await?,
                ChatInput::Image(path) => self.process_image(&path).await?,
            };
            return Ok(match turn {
                Turn::Failed => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            });
        }

        let mut rl = prompt::rl()?;
        self.run_interactive(&mut rl).await?;
        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        writeln!(
            self.output,
            "Model: {} ({}), keeping the last {} messages\n",
            self.settings.model.label(),
            self.settings.model.id(),
            self.settings.window
        )?;
        Ok(())
    }

    /// Reads lines until `/quit` or end of input. Runs whether or not
    /// stdout is a terminal; only the banner depends on it.
    pub async fn run_interactive(&mut self, lines: &mut dyn LineSource) -> Result<()> {
        if self.interactive {
            self.print_welcome()?;
        }

        loop {
            let prompt_text = generate_prompt(self.settings.model);
            match lines.read_line(&prompt_text) {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    if matches!(line.trim(), "/quit" | "/exit") {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn handle_input(&mut self, input: &str) -> Result<Turn> {
        let input = input.trim();

        let Some(command) = input.strip_prefix('/') else {
            return self.process_chat_input(input).await;
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name {
            "help" => writeln!(self.output, "{}", HELP_TEXT)?,
            "clear" => {
                self.transcript.clear();
                writeln!(self.output, "Conversation cleared.")?;
            }
            "model" => self.select_model(arg)?,
            "history" => self.print_history()?,
            "image" => {
                if arg.is_empty() {
                    writeln!(self.output, "Usage: /image <path>")?;
                } else {
                    return self.process_image(Path::new(arg)).await;
                }
            }
            "quit" | "exit" => {}
            _ => writeln!(
                self.output,
                "Unknown command: /{}. Type /help to see the available commands.",
                name
            )?,
        }

        Ok(Turn::Skipped)
    }

    fn select_model(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            writeln!(self.output, "Available models:")?;
            for model in Model::value_variants() {
                let marker = if *model == self.settings.model { "*" } else { " " };
                writeln!(self.output, " {} {:<14} {}", marker, model.label(), model.id())?;
            }
            return Ok(());
        }

        match Model::parse(name) {
            Ok(model) => {
                self.settings.model = model;
                info!(model = model.id(), "Model switched");
                writeln!(self.output, "Switched to {} ({}).", model.label(), model.id())?;
            }
            Err(e) => cwriteln!(self.output, "<red>{}</red>", e)?,
        }
        Ok(())
    }

    fn print_history(&mut self) -> Result<()> {
        if self.transcript.is_empty() {
            writeln!(self.output, "No messages yet.")?;
            return Ok(());
        }
        for message in self.transcript.messages() {
            writeln!(
                self.output,
                "[{}] {}: {}",
                message.timestamp.format("%H:%M:%S"),
                message.role,
                message.content
            )?;
        }
        Ok(())
    }

    async fn process_image(&mut self, path: &Path) -> Result<Turn> {
        match ocr::extract_text(path).await {
            Ok(text) => {
                writeln!(self.output, "Extracted text:\n{}\n", text)?;
                self.process_chat_input(&text).await
            }
            Err(e) => {
                cwriteln!(self.output, "<red>Error extracting text: {}</red>", e)?;
                Ok(Turn::Failed)
            }
        }
    }

    async fn process_chat_input(&mut self, input: &str) -> Result<Turn> {
        let input = input.trim();
        if input.is_empty() {
            debug!("Ignoring empty input");
            return Ok(Turn::Skipped);
        }

        self.transcript.push_user(input);
        let request = self.build_request();
        debug!(
            messages = request.message_count(),
            transcript = self.transcript.len(),
            "Sending chat turn"
        );

        let started = Instant::now();
        let response = if self.settings.stream {
            self.stream_response(&request).await
        } else {
            self.complete_response(&request).await
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.transcript.rollback_pending_user();
                warn!("Discarded unanswered message after output failure: {}", e);
                return Err(e);
            }
        };

        match response {
            Ok(text) => {
                self.transcript.push_assistant(&text);
                let elapsed = started.elapsed();
                info!(
                    model = %self.settings.model,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Response received"
                );
                if self.interactive {
                    cwriteln!(self.output, "<dim>({:.2}s)</dim>", elapsed.as_secs_f64())?;
                }
                Ok(Turn::Answered)
            }
            Err(e) => {
                self.transcript.rollback_pending_user();
                warn!("Discarded unanswered message after API failure: {}", e);
                cwriteln!(self.output, "<red>Error generating response: {}</red>", e)?;
                Ok(Turn::Failed)
            }
        }
    }

    fn build_request(&self) -> ChatRequest {
        let messages = self
            .transcript
            .window(self.settings.history_window())
            .iter()
            .map(|message| ApiMessage::new(message.role.as_str(), message.content.as_str()))
            .collect();

        ChatRequest {
            model: self.settings.model.id().to_string(),
            system: self.settings.system_prompt.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// The outer error is local (writing output); the inner one is the API's.
    async fn stream_response(&mut self, request: &ChatRequest) -> Result<Result<String, ApiError>> {
        let mut stream = match self.client.stream(request).await {
            Ok(stream) => stream,
            Err(e) => return Ok(Err(e)),
        };

        let mut renderer = StreamRenderer::new(self.interactive);
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => renderer.push(&mut self.output, &fragment)?,
                Err(e) => {
                    renderer.abort(&mut self.output)?;
                    return Ok(Err(e));
                }
            }
        }

        if renderer.buffer().is_empty() {
            renderer.abort(&mut self.output)?;
            return Ok(Err(ApiError::EmptyResponse));
        }
        Ok(Ok(renderer.finish(&mut self.output)?))
    }

    async fn complete_response(&mut self, request: &ChatRequest) -> Result<Result<String, ApiError>> {
        match self.client.complete(request).await {
            Ok(text) => {
                let mut renderer = StreamRenderer::new(false);
                renderer.push(&mut self.output, &text)?;
                Ok(Ok(renderer.finish(&mut self.output)?))
            }
            Err(e) => Ok(Err(e)),
        }
    }
}
