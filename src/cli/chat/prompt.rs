use rustyline::{Config, Editor, Result};

use super::settings::Model;

pub fn generate_prompt(model: Model) -> String {
    format!("[{}] > ", model.label())
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(false)
        .build();
    Editor::with_config(config)
}
