//! Terminal implementation of the upgrade [`Notifier`].
//!
//! Prompts go to stdout and are answered on stdin. Progress is drawn on a
//! single stderr line. Ctrl+C dismisses an open prompt and cancels the
//! download of the progress surface that is open at the time.

use std::io::{Write, stderr, stdout};
use std::sync::Arc;

use async_trait::async_trait;
use cmake_upgrade::{DownloadProgress, Notifier, ProgressSurface, PromptChoice};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TerminalNotifier {
    assume_yes: bool,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the upgrade offer without asking.
    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }
}

/// Render the choice list shown under a prompt.
pub fn render_choices(choices: &[PromptChoice]) -> String {
    choices
        .iter()
        .enumerate()
        .map(|(i, choice)| format!("[{}] {}", i + 1, choice.label()))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Map a typed answer onto one of `choices`.
///
/// Accepts the 1-based index, the full label, or `y`/`yes` for the first
/// choice. Anything else, including an empty line, dismisses the prompt.
pub fn parse_answer(input: &str, choices: &[PromptChoice]) -> Option<PromptChoice> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(index) = input.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| choices.get(i)).copied();
    }

    if input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes") {
        return choices.first().copied();
    }

    choices
        .iter()
        .find(|choice| choice.label().eq_ignore_ascii_case(input))
        .copied()
}

/// One progress line, without the leading carriage return.
pub fn render_progress(progress: &DownloadProgress) -> String {
    match progress.percentage() {
        Some(pct) => format!("  Downloading... {:>3.0}% ({})", pct, progress.message()),
        None => format!("  Downloading... {}", progress.message()),
    }
}

fn read_answer() -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let read = std::io::stdin().read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

/// A fresh token that Ctrl+C cancels, armed only from now on.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        let token = cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        debug!("Ctrl+C received, cancelling download");
                        token.cancel();
                    }
                }
            }
        });
    }
    cancel
}

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn prompt(&self, message: &str, choices: &[PromptChoice]) -> Option<PromptChoice> {
        println!("\n{message}");

        if self.assume_yes {
            let choice = choices.first().copied().filter(|c| *c == PromptChoice::Upgrade);
            if let Some(choice) = choice {
                println!("  -> {} (--yes)", choice.label());
            }
            return choice;
        }

        print!("{} ", render_choices(choices));
        let _ = stdout().flush();

        // A detached thread, so an unanswered read never holds up runtime
        // shutdown after Ctrl+C.
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = tx.send(read_answer());
        });

        let answer = tokio::select! {
            answer = rx => answer,
            _ = tokio::signal::ctrl_c() => {
                println!();
                debug!("Prompt dismissed with Ctrl+C");
                return None;
            }
        };

        match answer {
            Ok(Ok(Some(line))) => parse_answer(&line, choices),
            Ok(Ok(None)) => {
                println!();
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read answer from stdin");
                None
            }
            Err(e) => {
                warn!(error = %e, "Prompt reader stopped");
                None
            }
        }
    }

    async fn info(&self, message: &str) {
        println!("{message}");
    }

    async fn error(&self, message: &str) {
        eprintln!("Error: {message}");
    }

    fn progress(&self, title: &str) -> ProgressSurface {
        eprintln!("{title} (Ctrl+C to cancel)");
        let sink = |progress: &DownloadProgress| {
            let mut err = stderr();
            let _ = write!(err, "\r{}", render_progress(progress));
            if progress.finished {
                let _ = writeln!(err);
            }
            let _ = err.flush();
        };
        ProgressSurface::new(Arc::new(sink), cancel_on_ctrl_c())
    }

    async fn restart_host(&self) {
        println!("Open a new shell so the upgraded cmake is picked up from PATH.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OFFER: [PromptChoice; 3] = [PromptChoice::Upgrade, PromptChoice::Later, PromptChoice::Never];

    #[test]
    fn test_render_choices() {
        assert_eq!(
            render_choices(&OFFER),
            "[1] Yes  [2] Not now  [3] Don't ask again"
        );
    }

    #[test]
    fn test_parse_answer_by_index() {
        assert_eq!(parse_answer("1\n", &OFFER), Some(PromptChoice::Upgrade));
        assert_eq!(parse_answer(" 3 ", &OFFER), Some(PromptChoice::Never));
        assert_eq!(parse_answer("0", &OFFER), None);
        assert_eq!(parse_answer("4", &OFFER), None);
    }

    #[test]
    fn test_parse_answer_by_label() {
        assert_eq!(parse_answer("y", &OFFER), Some(PromptChoice::Upgrade));
        assert_eq!(parse_answer("not now", &OFFER), Some(PromptChoice::Later));
        assert_eq!(
            parse_answer("yes", &[PromptChoice::Restart]),
            Some(PromptChoice::Restart)
        );
    }

    #[test]
    fn test_parse_answer_dismissed() {
        assert_eq!(parse_answer("", &OFFER), None);
        assert_eq!(parse_answer("\n", &OFFER), None);
        assert_eq!(parse_answer("maybe", &OFFER), None);
    }

    #[test]
    fn test_render_progress() {
        let known = DownloadProgress {
            received: 512,
            total: Some(1024),
            increment_percent: Some(50.0),
            finished: false,
        };
        assert_eq!(render_progress(&known), "  Downloading...  50% (512 B / 1.0 KB)");

        let unknown = DownloadProgress {
            received: 2048,
            total: None,
            increment_percent: None,
            finished: false,
        };
        assert_eq!(render_progress(&unknown), "  Downloading... 2.0 KB");
    }

    #[tokio::test]
    async fn test_assume_yes_only_accepts_upgrade() {
        let notifier = TerminalNotifier::new().assume_yes(true);
        assert_eq!(
            notifier.prompt("Upgrade?", &OFFER).await,
            Some(PromptChoice::Upgrade)
        );
        assert_eq!(notifier.prompt("Restart?", &[PromptChoice::Restart]).await, None);
    }

    #[tokio::test]
    async fn test_each_download_gets_fresh_cancellation() {
        let notifier = TerminalNotifier::new();

        let first = notifier.progress("Downloading CMake 3.19.2");
        assert!(!first.cancel.is_cancelled());
        first.cancel.cancel();

        // An earlier cancellation never leaks into a later download.
        let second = notifier.progress("Downloading CMake 3.19.2");
        assert!(!second.cancel.is_cancelled());
    }

    #[test]
    fn test_progress_outside_runtime() {
        let surface = TerminalNotifier::new().progress("Downloading CMake 3.19.2");
        assert!(!surface.cancel.is_cancelled());
    }
}
