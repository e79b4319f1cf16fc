//! Stage progress on stderr for the command-line tools.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    /// Spinners need a terminal on stderr. In auto mode they are also
    /// disabled when stdout is piped, so JSON output stays clean to follow.
    pub fn detect(flag: &str) -> Self {
        let stderr_tty = std::io::stderr().is_terminal();
        let stdout_tty = std::io::stdout().is_terminal();
        let spinners = stderr_tty
            && match UiMode::parse(flag) {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_tty,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.spinners {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_message(name.to_string());
            Some(bar)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            started: Instant::now(),
            spinner,
        }
    }
}

/// Finishes the stage line when dropped.
pub struct Stage {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for Stage {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let took = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };
        let line = format!("done: {} ({})", self.name, took);
        match &self.spinner {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}
