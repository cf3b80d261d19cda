use std::io::Write;

use billing_core::{PagerView, SortDirection, SortView};
use billing_engine::TableSurface;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use serde_json::Value;
use tokio::sync::mpsc;

const FLAG_COLUMNS: [&str; 3] = ["anomaly_flags", "flags", "anomalies"];

/// Prints each frame as a table followed by a pager line.
pub struct TerminalSurface {
    out: Box<dyn Write + Send>,
    columns: Vec<String>,
    rows: Vec<Value>,
    message: Option<String>,
    painted: Option<mpsc::UnboundedSender<()>>,
}

impl TerminalSurface {
    pub fn new(out: Box<dyn Write + Send>, columns: Vec<String>) -> Self {
        Self {
            out,
            columns,
            rows: Vec::new(),
            message: None,
            painted: None,
        }
    }

    /// Signals `tx` after every complete frame.
    pub fn notify_painted(mut self, tx: mpsc::UnboundedSender<()>) -> Self {
        self.painted = Some(tx);
        self
    }
}

impl TableSurface<Value> for TerminalSurface {
    fn clear(&mut self) {
        self.rows.clear();
        self.message = None;
    }

    fn row(&mut self, item: &Value) {
        self.rows.push(item.clone());
    }

    fn message_row(&mut self, text: &str) {
        self.message = Some(text.to_string());
    }

    fn pager(&mut self, pager: &PagerView<'_>, sort: Option<SortView<'_>>) {
        let table = build_table(&self.columns, &self.rows, self.message.as_deref(), sort);
        let _ = writeln!(self.out, "{table}");
        let _ = writeln!(self.out, "{}", pager_line(pager));
        let _ = self.out.flush();
        if let Some(tx) = &self.painted {
            let _ = tx.send(());
        }
    }
}

pub fn build_table(
    columns: &[String],
    rows: &[Value],
    message: Option<&str>,
    sort: Option<SortView<'_>>,
) -> Table {
    let columns = if columns.is_empty() {
        inferred_columns(rows)
    } else {
        columns.to_vec()
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    if !columns.is_empty() {
        table.set_header(columns.iter().map(|column| header_cell(column, sort)));
    }

    if let Some(message) = message {
        let width = columns.len().max(1);
        let mut cells = vec![Cell::new(message).add_attribute(Attribute::Italic)];
        cells.extend((1..width).map(|_| Cell::new("")));
        table.add_row(cells);
        return table;
    }

    for row in rows {
        table.add_row(columns.iter().map(|column| {
            let value = row.get(column).unwrap_or(&Value::Null);
            value_cell(column, value)
        }));
    }
    table
}

/// Keys of the first object row, in the order serde_json keeps them.
fn inferred_columns(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .find_map(Value::as_object)
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default()
}

fn header_cell(column: &str, sort: Option<SortView<'_>>) -> Cell {
    match sort {
        Some(sort) if sort.field == column => {
            let arrow = match sort.direction {
                SortDirection::Asc => "▲",
                SortDirection::Desc => "▼",
            };
            Cell::new(format!("{column} {arrow}")).add_attribute(Attribute::Bold)
        }
        _ => Cell::new(column),
    }
}

fn value_cell(column: &str, value: &Value) -> Cell {
    if FLAG_COLUMNS.contains(&column) {
        if let Some(flags) = value.as_array() {
            return badge_cell(flags);
        }
    }
    Cell::new(plain_text(value))
}

/// Anomaly flags as `[NEGATIVE] [FROZEN]`, coloured by the worst one.
fn badge_cell(flags: &[Value]) -> Cell {
    let names: Vec<&str> = flags.iter().filter_map(Value::as_str).collect();
    if names.is_empty() {
        return Cell::new("");
    }
    let text = names
        .iter()
        .map(|name| format!("[{name}]"))
        .collect::<Vec<_>>()
        .join(" ");
    let color = names
        .iter()
        .map(|name| flag_color(name))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, color)| color)
        .unwrap_or(Color::Yellow);
    Cell::new(text).fg(color).add_attribute(Attribute::Bold)
}

fn flag_color(flag: &str) -> (u8, Color) {
    match flag.to_ascii_uppercase().as_str() {
        "NEGATIVE" => (0, Color::Red),
        "FROZEN" => (1, Color::Cyan),
        _ => (2, Color::Yellow),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

pub fn pager_line(pager: &PagerView<'_>) -> String {
    let mut controls = Vec::new();
    if pager.prev_enabled {
        controls.push("[p]rev");
    }
    if pager.next_enabled {
        controls.push("[n]ext");
    }
    let sizes = pager
        .page_sizes
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join("/");
    let mut line = format!(
        "Page {}/{} | {} | {} per page ({})",
        pager.page, pager.page_count, pager.range_label, pager.limit, sizes
    );
    if !controls.is_empty() {
        line.push_str(" | ");
        line.push_str(&controls.join(" "));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pager(page: u32, next_enabled: bool) -> PagerView<'static> {
        PagerView {
            page,
            limit: 20,
            total: 45,
            page_count: 3,
            page_sizes: &[10, 20, 50],
            prev_enabled: page > 1,
            next_enabled,
            range_label: "21–40 of 45".to_string(),
        }
    }

    #[test]
    fn columns_follow_first_row() {
        let rows = vec![json!({"room": "101", "debt": 12.5}), json!({"room": "102"})];
        let text = build_table(&[], &rows, None, None).to_string();

        assert!(text.contains("room"));
        assert!(text.contains("debt"));
        assert!(text.contains("12.5"));
        // Missing values render as a dash.
        assert!(text.contains('-'));
    }

    #[test]
    fn message_replaces_rows() {
        let columns = vec!["room".to_string(), "debt".to_string()];
        let text = build_table(&columns, &[], Some("No data"), None).to_string();

        assert!(text.contains("No data"));
        assert!(text.contains("room"));
    }

    #[test]
    fn sorted_column_is_marked() {
        let columns = vec!["room".to_string(), "debt".to_string()];
        let sort = SortView {
            field: "debt",
            direction: SortDirection::Desc,
        };
        let text = build_table(&columns, &[], Some("No data"), Some(sort)).to_string();

        assert!(text.contains("debt ▼"));
        assert!(!text.contains("room ▲"));
    }

    #[test]
    fn flags_render_as_badges() {
        let rows = vec![json!({"room": "7", "anomaly_flags": ["FROZEN", "NEGATIVE"]})];
        let columns = vec!["room".to_string(), "anomaly_flags".to_string()];
        let text = build_table(&columns, &rows, None, None).to_string();

        assert!(text.contains("[FROZEN] [NEGATIVE]"));
        assert_eq!(flag_color("negative"), (0, Color::Red));
    }

    #[test]
    fn pager_hides_disabled_controls() {
        let first = pager_line(&pager(1, true));
        assert!(first.contains("[n]ext"));
        assert!(!first.contains("[p]rev"));

        let last = pager_line(&pager(3, false));
        assert!(last.contains("[p]rev"));
        assert!(!last.contains("[n]ext"));
        assert!(last.starts_with("Page 3/3"));
    }
}
