//! Defines the colors used in the output of the CLI.

use std::sync::LazyLock;

use console::Style;
use http::StatusCode;
use log::Level;

pub(crate) static DIM: LazyLock<Style> = LazyLock::new(|| Style::new().dim());
pub(crate) static BOLD: LazyLock<Style> = LazyLock::new(|| Style::new().bold());

static GREEN: LazyLock<Style> = LazyLock::new(|| Style::new().color256(2).bold().bright());
static YELLOW: LazyLock<Style> = LazyLock::new(|| Style::new().yellow().bright());
static PINK: LazyLock<Style> = LazyLock::new(|| Style::new().color256(197));
static BOLD_PINK: LazyLock<Style> = LazyLock::new(|| Style::new().color256(197).bold());

// Used for debug log messages
static BLUE: LazyLock<Style> = LazyLock::new(|| Style::new().blue().bright());

pub(crate) fn color_for_level(level: Level) -> &'static Style {
    match level {
        Level::Error => &BOLD_PINK,
        Level::Warn => &YELLOW,
        Level::Info => &GREEN,
        Level::Debug => &BLUE,
        Level::Trace => &DIM,
    }
}

/// Green for success, yellow for client errors, pink for server errors
pub(crate) fn color_for_status(status: StatusCode) -> &'static Style {
    if status.is_success() {
        &GREEN
    } else if status.is_client_error() {
        &YELLOW
    } else if status.is_server_error() {
        &PINK
    } else {
        &BOLD
    }
}
