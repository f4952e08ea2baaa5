//! Startup console: one line or spinner per stage.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ConsoleMode {
    /// Spinners on a terminal, plain lines otherwise.
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Console {
    mode: ConsoleMode,
    is_tty: bool,
    no_color: bool,
}

impl Console {
    pub fn new(mode: ConsoleMode, is_tty: bool, no_color: bool) -> Self {
        Self {
            mode,
            is_tty,
            no_color,
        }
    }

    /// Console for stderr. `NO_COLOR` turns auto mode plain.
    pub fn stderr(mode: ConsoleMode) -> Self {
        use std::io::IsTerminal;
        Self::new(
            mode,
            std::io::stderr().is_terminal(),
            std::env::var_os("NO_COLOR").is_some(),
        )
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                ConsoleMode::Pretty => true,
                ConsoleMode::Auto => !self.no_color,
                ConsoleMode::Plain => false,
            }
    }

    /// Begin a stage. It reports as done when dropped unless `fail` is called.
    pub fn stage(&self, name: &str) -> Stage {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Stage::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            Stage::new(name.to_string(), None)
        }
    }
}

pub struct Stage {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl Stage {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Mark the stage as failed with `reason`.
    pub fn fail(mut self, reason: impl std::fmt::Display) {
        self.failed = true;
        self.finish(format!("✘ {}: {}", self.name, reason));
    }

    fn finish(&self, message: String) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        self.finish(message);
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
