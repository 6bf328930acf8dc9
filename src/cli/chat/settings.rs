use std::fmt;

use clap::ValueEnum;
use eyre::{Result, bail};

/// Models offered by the chat. The clap value is the Groq model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Model {
    #[default]
    #[value(name = "mixtral-8x7b-32768", alias = "mixtral")]
    Mixtral8x7b,
    #[value(name = "llama2-70b-4096", alias = "llama2")]
    Llama2_70b,
    #[value(name = "llama3-8b-8192", alias = "llama3-8b")]
    Llama3_8b,
    #[value(name = "llama3-70b-8192", alias = "llama3-70b")]
    Llama3_70b,
    #[value(name = "gemma-7b-it", alias = "gemma")]
    Gemma7b,
}

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::Mixtral8x7b => "mixtral-8x7b-32768",
            Model::Llama2_70b => "llama2-70b-4096",
            Model::Llama3_8b => "llama3-8b-8192",
            Model::Llama3_70b => "llama3-70b-8192",
            Model::Gemma7b => "gemma-7b-it",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Model::Mixtral8x7b => "Mixtral-8x7b",
            Model::Llama2_70b => "LLaMA2-70b",
            Model::Llama3_8b => "LLaMA3-8b",
            Model::Llama3_70b => "LLaMA3-70b",
            Model::Gemma7b => "Gemma-7b",
        }
    }

    /// Accepts a model id or one of its short aliases, ignoring case.
    pub fn parse(name: &str) -> Result<Self> {
        match <Model as ValueEnum>::from_str(name.trim(), true) {
            Ok(model) => Ok(model),
            Err(_) => bail!(
                "Unknown model '{}'. Available models: {}",
                name.trim(),
                Model::value_variants()
                    .iter()
                    .map(|m| m.id())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: Model,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Number of trailing transcript messages sent with each request.
    pub window: usize,
    pub stream: bool,
    /// Extra attempts for transient failures before any output arrived.
    pub retries: u32,
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: Model::default(),
            temperature: 0.7,
            max_tokens: 1024,
            window: 10,
            stream: true,
            retries: 0,
            system_prompt: None,
        }
    }
}

impl ChatSettings {
    /// Transcript messages that fit in the window next to the system prompt.
    pub fn history_window(&self) -> usize {
        match self.system_prompt {
            Some(_) => self.window.saturating_sub(1),
            None => self.window,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            bail!("History window must keep at least one message");
        }
        if self.system_prompt.is_some() && self.window < 2 {
            bail!("History window must be at least 2 when a system prompt is set");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("Temperature must be between 0.0 and 2.0, got {}", self.temperature);
        }
        if self.max_tokens == 0 {
            bail!("max_tokens must be greater than 0");
        }
        Ok(())
    }
}
