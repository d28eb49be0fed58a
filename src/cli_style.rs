/*!
 * Ferry CLI Style System
 *
 * Styled terminal output for the `ferry` binary: themed text, status icons and
 * the summary tables printed after each relay.
 */

use crate::core::batch::{BatchSummary, DeliveryPath, ItemStatus};
use crate::core::object::ObjectSummary;
use crate::core::range::{RangeItemStatus, RangeSummary};
use crate::relay::MultiBatchSummary;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

// ============================================================================
// THEME COLORS
// ============================================================================

pub struct Theme;

impl Theme {
    /// Primary accent color (cyan)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const SKIPPED: &'static str = "○";
    pub const ARROW_RIGHT: &'static str = "→";
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// TABLES
// ============================================================================

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

/// Counts block shared by every summary
fn counts_rows(table: &mut Table, succeeded: usize, failed: usize, skipped: usize) {
    table.add_row(vec![
        Cell::new("Succeeded"),
        Cell::new(succeeded.to_string())
            .fg(Color::Green)
            .add_attribute(Attribute::Bold),
    ]);

    if skipped > 0 {
        table.add_row(vec![
            Cell::new("Skipped"),
            Cell::new(skipped.to_string()).fg(Color::Yellow),
        ]);
    }

    if failed > 0 {
        table.add_row(vec![
            Cell::new("Failed"),
            Cell::new(failed.to_string())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
        ]);
    }
}

pub fn object_summary_table(summary: &ObjectSummary) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Object Relay"), Cell::new("")]);

    table.add_row(vec![Cell::new("Object"), Cell::new(summary.locator.as_str())]);
    let outcome = if summary.outcome.is_delivered() {
        Cell::new(format!("{} {}", Icons::SUCCESS, summary.outcome)).fg(Color::Green)
    } else {
        Cell::new(format!("{} {}", Icons::SKIPPED, summary.outcome)).fg(Color::Yellow)
    };
    table.add_row(vec![Cell::new("Outcome"), outcome]);
    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(summary.elapsed_ms as f64 / 1000.0)),
    ]);
    table
}

pub fn batch_summary_table(summary: &BatchSummary) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Batch Relay"), Cell::new("")]);

    table.add_row(vec![Cell::new("Batch"), Cell::new(summary.batch.as_str())]);
    table.add_row(vec![
        Cell::new("Delivered By"),
        Cell::new(delivery_label(summary.delivery)).fg(Color::Cyan),
    ]);

    if summary.delivery != DeliveryPath::DirectCopy {
        counts_rows(
            &mut table,
            summary.succeeded(),
            summary.failed(),
            summary.skipped(),
        );
        table.add_row(vec![
            Cell::new("Total Size"),
            Cell::new(format_bytes(summary.bytes()))
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
        ]);
    }

    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(summary.elapsed_ms as f64 / 1000.0)),
    ]);
    table
}

/// Per-item detail rows, only for members that were not delivered
pub fn batch_items_table(summary: &BatchSummary) -> Option<Table> {
    let problems: Vec<_> = summary
        .items
        .iter()
        .filter(|i| i.status != ItemStatus::Succeeded)
        .collect();
    if problems.is_empty() {
        return None;
    }

    let mut table = create_table();
    table.set_header(vec![
        header_cell("#"),
        header_cell("Item"),
        header_cell("Status"),
        header_cell("Reason"),
    ]);
    for item in problems {
        let status = match item.status {
            ItemStatus::Failed => Cell::new(item.status.to_string()).fg(Color::Red),
            _ => Cell::new(item.status.to_string()).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(item.index + 1),
            Cell::new(item.locator.as_str()),
            status,
            Cell::new(item.detail.as_deref().unwrap_or("")).fg(Color::DarkGrey),
        ]);
    }
    Some(table)
}

pub fn range_summary_table(summary: &RangeSummary) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Range Relay"), Cell::new("")]);

    counts_rows(
        &mut table,
        summary.succeeded(),
        summary.failed(),
        summary.skipped(),
    );
    if summary.not_attempted > 0 {
        table.add_row(vec![
            Cell::new("Not Attempted"),
            Cell::new(summary.not_attempted.to_string()).fg(Color::DarkGrey),
        ]);
    }

    let stop = if summary.stop.is_completed() {
        Cell::new(summary.stop.to_string()).fg(Color::Green)
    } else {
        Cell::new(summary.stop.to_string())
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    };
    table.add_row(vec![Cell::new("Stopped"), stop]);
    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(summary.elapsed_ms as f64 / 1000.0)),
    ]);
    table
}

pub fn multi_batch_table(summary: &MultiBatchSummary) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Batch"),
        header_cell("Delivered By"),
        header_cell("Items"),
        header_cell("Result"),
    ]);

    for report in &summary.batches {
        let (delivery, items) = match &report.summary {
            Some(s) => (
                delivery_label(s.delivery).to_string(),
                format!("{}/{}", s.succeeded(), s.items.len()),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        let result = match (&report.error, report.is_success()) {
            (_, true) => Cell::new(Icons::SUCCESS).fg(Color::Green),
            (Some(error), false) => Cell::new(format!("{} {}", Icons::ERROR, error)).fg(Color::Red),
            (None, false) => Cell::new(Icons::ERROR).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(report.batch.as_str()),
            Cell::new(delivery),
            Cell::new(items),
            result,
        ]);
    }
    table
}

fn delivery_label(delivery: DeliveryPath) -> &'static str {
    match delivery {
        DeliveryPath::DirectCopy => "direct copy",
        DeliveryPath::BulkUpload => "bulk upload",
        DeliveryPath::IndividualUpload => "individual uploads",
        DeliveryPath::Undelivered => "nothing delivered",
    }
}

/// Icon for a range item, used in verbose listings
pub fn range_item_icon(status: RangeItemStatus) -> StyledObject<&'static str> {
    match status {
        RangeItemStatus::Succeeded => Theme::success(Icons::SUCCESS),
        RangeItemStatus::Failed => Theme::error(Icons::ERROR),
        RangeItemStatus::Skipped => Theme::warning(Icons::SKIPPED),
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let base = 1024.0_f64;
    let exp = (bytes_f.ln() / base.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f / base.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}
