use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use rhino_watch::{Detection, Frame, Presenter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// `Auto` draws spinners only when stderr is a terminal.
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = match mode {
            UiMode::Pretty => true,
            UiMode::Auto => is_tty,
            UiMode::Plain => false,
        };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
            let spinner = spinner();
            spinner.set_message(name.to_string());
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Presenter that keeps the latest status on one line of stderr.
    pub fn status_line(&self) -> StatusLine {
        StatusLine {
            spinner: self.pretty.then(spinner),
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

/// Times a startup stage; reports the outcome when dropped or finished.
pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    done: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            done: None,
        }
    }

    /// Replace the stage name in the completion line, e.g. "Model loaded".
    pub fn finish_as(mut self, message: &str) {
        self.done = Some(message.to_string());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let label = self.done.as_deref().unwrap_or(&self.name);
        let message = format!("✔ {} ({})", label, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct StatusLine {
    spinner: Option<ProgressBar>,
}

impl StatusLine {
    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

impl Presenter for StatusLine {
    fn on_frame(&self, frame: &Frame, detections: &[Detection]) {
        if let Some(best) = detections.first() {
            log::debug!(
                "frame {}: {} {:.2}",
                frame.index,
                best.label,
                best.confidence
            );
        }
    }

    fn on_status(&self, text: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(text.to_string()),
            None if text.is_empty() => {}
            None => eprintln!("status: {}", text),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
