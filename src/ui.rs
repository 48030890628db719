//! Output styling for wayprof: colors, tables, spinners.
//!
//! Color is disabled by `--no-color`, the `NO_COLOR` env var, `TERM=dumb`,
//! or a non-TTY stdout (in that priority order). Spinners additionally
//! require a TTY.

use anstream::{eprintln, println};
use anstyle::{AnsiColor, Color, Style};
use comfy_table::{Cell, ContentArrangement, Table, presets};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Color mode for output
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    #[default]
    Auto,
    Never,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            _ => Err(format!("invalid color mode: {}", s)),
        }
    }
}

/// Resolved display settings shared by all commands
#[derive(Debug, Clone)]
pub struct Ui {
    pub color_enabled: bool,
    pub spinner_enabled: bool,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(ColorMode::Auto, false)
    }
}

impl Ui {
    pub fn new(mode: ColorMode, force_no_color: bool) -> Self {
        let color_enabled = Self::resolve_color(mode, force_no_color);
        let spinner_enabled = color_enabled && std::io::stdout().is_terminal();

        if !color_enabled {
            anstream::ColorChoice::write_global(anstream::ColorChoice::Never);
        }

        Self {
            color_enabled,
            spinner_enabled,
        }
    }

    fn resolve_color(mode: ColorMode, force_no_color: bool) -> bool {
        if force_no_color || std::env::var("NO_COLOR").is_ok() {
            return false;
        }
        if std::env::var("TERM").map(|t| t == "dumb").unwrap_or(false) {
            return false;
        }
        match mode {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }

    fn labeled(&self, label: &str, color: AnsiColor, msg: &str) -> String {
        let style = if self.color_enabled {
            Style::new().fg_color(Some(Color::Ansi(color))).bold()
        } else {
            Style::new()
        };
        format!("{style}{label}{style:#} {msg}")
    }

    pub fn ok(&self, msg: impl AsRef<str>) {
        println!("{}", self.labeled("OK", AnsiColor::Green, msg.as_ref()));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        println!("{}", self.labeled("WARN", AnsiColor::Yellow, msg.as_ref()));
    }

    /// Errors go to stderr
    pub fn err(&self, msg: impl AsRef<str>) {
        eprintln!("{}", self.labeled("ERROR", AnsiColor::Red, msg.as_ref()));
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        println!("{}", self.labeled("INFO", AnsiColor::Cyan, msg.as_ref()));
    }

    fn styled(&self, s: &str, style: Style) -> String {
        if self.color_enabled {
            format!("{style}{s}{style:#}")
        } else {
            s.to_string()
        }
    }

    pub fn dim(&self, s: impl AsRef<str>) -> String {
        let st = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
        self.styled(s.as_ref(), st)
    }

    pub fn bold(&self, s: impl AsRef<str>) -> String {
        self.styled(s.as_ref(), Style::new().bold())
    }

    pub fn colored(&self, s: impl AsRef<str>, color: AnsiColor) -> String {
        self.styled(s.as_ref(), Style::new().fg_color(Some(Color::Ansi(color))))
    }

    pub fn icon_ok(&self) -> &'static str {
        if self.color_enabled { "✓" } else { "[OK]" }
    }

    pub fn icon_warn(&self) -> &'static str {
        if self.color_enabled { "⚠" } else { "[!]" }
    }

    pub fn icon_err(&self) -> &'static str {
        if self.color_enabled { "✗" } else { "[X]" }
    }

    pub fn icon_info(&self) -> &'static str {
        if self.color_enabled { "•" } else { "-" }
    }

    /// Bordered table for detailed listings
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        if self.color_enabled {
            table.load_preset(presets::UTF8_FULL_CONDENSED);
        } else {
            table.load_preset(presets::ASCII_MARKDOWN);
        }
        table
    }

    /// Borderless table for key/value output
    pub fn simple_table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(presets::NOTHING);
        table
    }

    pub fn cell(&self, content: impl Into<String>) -> Cell {
        Cell::new(content.into())
    }

    pub fn header_cell(&self, content: impl Into<String>) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.add_attribute(comfy_table::Attribute::Bold)
        } else {
            cell
        }
    }

    /// Colored via comfy-table's own styling so column widths stay right
    pub fn colored_cell(&self, content: impl Into<String>, color: AnsiColor) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.fg(comfy_color(color))
        } else {
            cell
        }
    }

    /// Spinner for the switch steps; a hidden no-op when disabled.
    pub fn spinner(&self, message: impl Into<std::borrow::Cow<'static, str>>) -> ProgressBar {
        let pb = if self.spinner_enabled {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .template("{spinner:.cyan} {msg}")
                    .expect("valid template"),
            );
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message);
        pb
    }

    pub fn spinner_finish_ok(
        &self,
        pb: &ProgressBar,
        msg: impl Into<std::borrow::Cow<'static, str>>,
    ) {
        self.finish(pb, "✓", AnsiColor::Green, msg.into());
    }

    pub fn spinner_finish_err(
        &self,
        pb: &ProgressBar,
        msg: impl Into<std::borrow::Cow<'static, str>>,
    ) {
        self.finish(pb, "✗", AnsiColor::Red, msg.into());
    }

    fn finish(
        &self,
        pb: &ProgressBar,
        icon: &str,
        color: AnsiColor,
        msg: std::borrow::Cow<'static, str>,
    ) {
        if self.spinner_enabled {
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{msg}")
                    .expect("valid template"),
            );
            pb.finish_with_message(format!("{} {}", self.colored(icon, color), msg));
        } else {
            pb.finish_and_clear();
            match color {
                AnsiColor::Red => self.err(msg),
                _ => self.ok(msg),
            }
        }
    }

    pub fn println(&self, msg: impl AsRef<str>) {
        println!("{}", msg.as_ref());
    }

    pub fn newline(&self) {
        println!();
    }

    pub fn section(&self, title: impl AsRef<str>) {
        println!("{}", self.bold(title));
    }
}

fn comfy_color(color: AnsiColor) -> comfy_table::Color {
    match color {
        AnsiColor::Black => comfy_table::Color::Black,
        AnsiColor::Red | AnsiColor::BrightRed => comfy_table::Color::Red,
        AnsiColor::Green | AnsiColor::BrightGreen => comfy_table::Color::Green,
        AnsiColor::Yellow | AnsiColor::BrightYellow => comfy_table::Color::Yellow,
        AnsiColor::Blue | AnsiColor::BrightBlue => comfy_table::Color::Blue,
        AnsiColor::Magenta | AnsiColor::BrightMagenta => comfy_table::Color::Magenta,
        AnsiColor::Cyan | AnsiColor::BrightCyan => comfy_table::Color::Cyan,
        AnsiColor::White | AnsiColor::BrightWhite => comfy_table::Color::White,
        AnsiColor::BrightBlack => comfy_table::Color::DarkGrey,
    }
}
