use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use log::info;

/// User executables run when a timer changes state
///
/// Each hook is looked up by name in the hooks directory and, if present,
/// run with the timer's category and persistence key as its arguments.
pub enum Hook {
    TimerStart,
    TimerEnd,
    TimerStop,
}

impl Hook {
    pub fn file_name(&self) -> &'static str {
        match *self {
            Self::TimerStart => "timer-start",
            Self::TimerEnd => "timer-end",
            Self::TimerStop => "timer-stop",
        }
    }

    pub fn run(&self, hooks_directory: &Path, category: &str, key: &str) -> Result<()> {
        let hook_path = hooks_directory.join(self.file_name());

        if hook_path.exists() {
            info!(
                "Executing hook at {}",
                hook_path.display().to_string().cyan()
            );

            std::process::Command::new(hook_path)
                .args([category, key])
                .output()
                .with_context(|| "Failed to execute hook")?;
        }

        Ok(())
    }
}
