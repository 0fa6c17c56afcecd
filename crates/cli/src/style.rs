//! Terminal styling helpers.

use console::Style;

pub fn success(msg: &str) -> String {
    format!("{} {msg}", Style::new().green().apply_to("✓"))
}

pub fn error(msg: &str) -> String {
    format!("{} {msg}", Style::new().red().apply_to("✗"))
}

pub fn warn(msg: &str) -> String {
    format!("{} {msg}", Style::new().yellow().apply_to("⚠"))
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Label for source tree A.
pub fn side_a(msg: &str) -> String {
    Style::new().blue().bold().apply_to(msg).to_string()
}

/// Label for source tree B.
pub fn side_b(msg: &str) -> String {
    Style::new().magenta().bold().apply_to(msg).to_string()
}
