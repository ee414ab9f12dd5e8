//! Terminal output: fact blocks, namespace rows and scan progress.

use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use keyscope::{KeyKind, PipelineStatus, Row, Ttl};
use nu_ansi_term::{Color, Style};

const TITLE_MARK: &str = "▸";
const NOTE_MARK: &str = "ℹ";
const DONE_MARK: &str = "✔";
const WARN_MARK: &str = "⚠";
const OPEN_MARK: &str = "▾";
const CLOSED_MARK: &str = "▸";

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

impl Theme {
    fn styles(self) -> Styles {
        match self {
            Theme::Plain => Styles::default(),
            Theme::Light => Styles {
                title: Style::new().fg(Color::Blue).bold(),
                prefix: Style::new().fg(Color::Black).bold(),
                count: Style::new().fg(Color::DarkGray),
                placeholder: Style::new().fg(Color::DarkGray).italic(),
                note: Style::new().fg(Color::Purple),
                done: Style::new().fg(Color::Green).bold(),
                warn: Style::new().fg(Color::Red).bold(),
                scalar: Style::new().fg(Color::Green),
                collection: Style::new().fg(Color::Blue),
                stream: Style::new().fg(Color::Magenta),
                gone: Style::new().fg(Color::Red),
            },
            Theme::Dark | Theme::Auto => Styles {
                title: Style::new().fg(Color::Purple).bold(),
                prefix: Style::new().fg(Color::LightBlue).bold(),
                count: Style::new().fg(Color::DarkGray),
                placeholder: Style::new().fg(Color::DarkGray).italic(),
                note: Style::new().fg(Color::LightCyan),
                done: Style::new().fg(Color::LightGreen).bold(),
                warn: Style::new().fg(Color::Yellow).bold(),
                scalar: Style::new().fg(Color::LightGreen),
                collection: Style::new().fg(Color::LightCyan),
                stream: Style::new().fg(Color::LightPurple),
                gone: Style::new().fg(Color::LightRed),
            },
        }
    }
}

#[derive(Default)]
struct Styles {
    title: Style,
    prefix: Style,
    count: Style,
    placeholder: Style,
    note: Style,
    done: Style,
    warn: Style,
    scalar: Style,
    collection: Style,
    stream: Style,
    gone: Style,
}

pub struct Ui {
    styles: Styles,
    color: bool,
    quiet: bool,
}

impl Ui {
    /// Colors only when stdout is a terminal and the output is not quiet.
    pub fn new(theme: Theme, quiet: bool) -> Self {
        let color = theme != Theme::Plain && !quiet && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if color {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self {
            styles: theme.styles(),
            color,
            quiet,
        }
    }

    fn paint(&self, style: Style, text: impl Display) -> String {
        if self.color {
            style.paint(text.to_string()).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn title(&self, title: &str) {
        if self.quiet {
            println!("{title}");
        } else {
            println!("{}", self.paint(self.styles.title, format!("{TITLE_MARK} {title}")));
        }
    }

    /// Titled block of `name: value` lines, names right-aligned.
    pub fn facts<V: Display>(&self, title: &str, facts: &[(&str, V)]) {
        if facts.is_empty() {
            return;
        }
        self.title(title);
        let width = facts.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        for (name, value) in facts {
            println!(
                "  {} {value}",
                self.paint(self.styles.prefix, format!("{name:>width$}:"))
            );
        }
    }

    pub fn bullets<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries = entries.into_iter().peekable();
        if entries.peek().is_none() {
            return;
        }
        self.title(title);
        for entry in entries {
            println!("  - {entry}");
        }
    }

    /// One namespace row, indented by its depth.
    ///
    /// Prefixes that are keys themselves carry a badge; `*` until described.
    pub fn row(&self, row: &Row) {
        let indent = "  ".repeat(row.depth());
        let line = match row {
            Row::Node {
                label,
                count,
                expanded,
                key,
                kind,
                ttl,
                ..
            } => {
                let mark = if *expanded { OPEN_MARK } else { CLOSED_MARK };
                let mut line = format!(
                    "{mark} {} {}",
                    self.paint(self.styles.prefix, label),
                    self.paint(self.styles.count, format!("({count})"))
                );
                if key.is_some() {
                    let badge = kind
                        .as_ref()
                        .map_or_else(|| "*".to_string(), |kind| self.badge(kind, *ttl));
                    line.push(' ');
                    line.push_str(&badge);
                }
                line
            }
            Row::Leaf {
                label, kind, ttl, ..
            } => match kind {
                Some(kind) => format!("  {label} {}", self.badge(kind, *ttl)),
                None => format!("  {label}"),
            },
            Row::LoadMore { shown, total, .. } => format!(
                "  {}",
                self.paint(self.styles.placeholder, format!("… {shown} of {total} shown"))
            ),
            Row::Scanning { .. } => {
                format!("  {}", self.paint(self.styles.placeholder, "… scanning"))
            }
        };
        println!("{indent}{line}");
    }

    fn badge(&self, kind: &KeyKind, ttl: Option<Ttl>) -> String {
        let text = match ttl {
            Some(Ttl::Expires(left)) => format!("[{kind}, ttl {}]", format_duration(left)),
            Some(Ttl::Missing) => format!("[{kind}, gone]"),
            Some(Ttl::Persistent) | None => format!("[{kind}]"),
        };
        let style = match kind {
            KeyKind::String => self.styles.scalar,
            KeyKind::List | KeyKind::Set | KeyKind::ZSet | KeyKind::Hash => self.styles.collection,
            KeyKind::Stream | KeyKind::Other(_) => self.styles.stream,
            KeyKind::None => self.styles.gone,
        };
        self.paint(style, text)
    }

    pub fn note(&self, message: &str) {
        println!("{}", self.marked(NOTE_MARK, self.styles.note, message));
    }

    pub fn done(&self, message: &str) {
        println!("{}", self.marked(DONE_MARK, self.styles.done, message));
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{}", self.marked(WARN_MARK, self.styles.warn, message));
    }

    fn marked(&self, mark: &str, style: Style, message: &str) -> String {
        if self.quiet {
            message.to_string()
        } else {
            format!("{} {message}", self.paint(style, mark))
        }
    }

    /// Spinner for a background job; nothing is drawn when quiet.
    pub fn progress(&self, label: impl Into<String>) -> Progress<'_> {
        let label = label.into();
        let bar = (!self.quiet).then(|| {
            let style = ProgressStyle::with_template("{spinner} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
            let bar = ProgressBar::new_spinner().with_style(style);
            bar.set_message(label.clone());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Progress {
            ui: self,
            label,
            started: Instant::now(),
            bar,
            finished: false,
        }
    }
}

/// Live progress of a scan or filter job.
pub struct Progress<'a> {
    ui: &'a Ui,
    label: String,
    started: Instant,
    bar: Option<ProgressBar>,
    finished: bool,
}

impl Progress<'_> {
    /// Shows keys merged, share of the estimate and merge rate.
    pub fn scan(&self, status: &PipelineStatus) {
        let Some(bar) = &self.bar else {
            return;
        };
        let secs = self.started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            (status.distinct as f64 / secs) as u64
        } else {
            0
        };
        let share = status
            .progress()
            .map(|fraction| format!(" ({:.0}%)", fraction * 100.0))
            .unwrap_or_default();
        bar.set_message(format!(
            "{}: {} keys{share}, {} batches, {rate} keys/s",
            self.label, status.distinct, status.batches
        ));
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.started.elapsed()
    }
}

impl Drop for Progress<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = format!(
            "{} interrupted after {}",
            self.label,
            format_duration(self.started.elapsed())
        );
        match self.bar.take() {
            Some(bar) => bar.abandon_with_message(message),
            None => self.ui.warn(&message),
        }
    }
}

/// Compact duration: `850ms`, `4.2s`, `3m05s`, `2h10m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0 => format!("{}ms", duration.as_millis()),
        1..=59 => format!("{:.1}s", duration.as_secs_f64()),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_the_largest_useful_unit() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(4_200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m05s");
        assert_eq!(format_duration(Duration::from_secs(7_800)), "2h10m");
    }
}
