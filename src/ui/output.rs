use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static COLOR: OnceLock<bool> = OnceLock::new();

pub struct Icons;

impl Icons {
    pub const DATABASE: &str = "🗄️";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DOWN: &str = "⬇️";
}

/// What a piece of terminal text means; decides its color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Title,
    Good,
    Bad,
    Caution,
    Muted,
}

impl Tone {
    fn style(self) -> Style {
        if !color_enabled() {
            return Style::new();
        }
        match self {
            Tone::Title => Style::new().cyan().bold(),
            Tone::Good => Style::new().green().bold(),
            Tone::Bad => Style::new().red().bold(),
            Tone::Caution => Style::new().yellow().bold(),
            Tone::Muted => Style::new().dimmed(),
        }
    }
}

/// Colors are only used when stdout is a terminal
pub fn color_enabled() -> bool {
    *COLOR.get_or_init(|| console::Term::stdout().is_term())
}

pub fn paint(text: &str, tone: Tone) -> String {
    text.style(tone.style()).to_string()
}

pub fn header(text: &str) {
    println!("{} {}", Icons::DATABASE, paint(text, Tone::Title));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, paint(label, Tone::Good));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, paint(label, Tone::Bad));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, paint(label, Tone::Caution));
}

/// `label: value` line
pub fn info(label: &str, value: &str) {
    println!("{} {}: {}", Icons::INFO, paint(label, Tone::Muted), value);
}

pub fn section(title: &str) {
    println!();
    println!("{}", paint(title, Tone::Title));
}

pub fn summary_row(icon: &str, label: &str) {
    println!("  {} {}", icon, label);
}
