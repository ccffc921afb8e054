use std::io::{self, IsTerminal, Write};

use chrono::Local;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Cell, Row, Table};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};

use super::results::CrawlSummary;
use super::types::{CaptureRecord, SkipRecord};
use super::ui_utils::human_size;

const TABLE_CHROME_ROWS: usize = 3;

fn header_row(labels: &[&'static str]) -> Row<'static> {
    Row::new(labels.to_vec()).style(
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    )
}

fn counter_cell(position: usize) -> Cell<'static> {
    Cell::from(position.to_string()).style(Style::default().add_modifier(Modifier::DIM))
}

pub fn captured_table(records: &[CaptureRecord]) -> Table<'static> {
    let rows = records.iter().enumerate().map(|(i, r)| {
        Row::new(vec![
            counter_cell(i + 1),
            Cell::from(r.index.to_string()),
            Cell::from(r.url.clone()).style(Style::default().fg(Color::Cyan)),
            Cell::from(r.filename.clone()),
            Cell::from(format!("{}x{}", r.width, r.height)),
            Cell::from(human_size(r.size)),
            Cell::from(r.captured_at.clone()),
        ])
    });

    Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Min(24),
            Constraint::Length(24),
            Constraint::Length(11),
            Constraint::Length(10),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&[
        "#", "index", "onion", "file", "dimensions", "size", "captured at",
    ]))
    .block(
        Block::default()
            .title(format!("Captured Onions ({})", records.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    )
    .column_spacing(1)
}

pub fn skipped_table(records: &[SkipRecord]) -> Table<'static> {
    let rows = records.iter().enumerate().map(|(i, r)| {
        Row::new(vec![
            counter_cell(i + 1),
            Cell::from(r.index.to_string()),
            Cell::from(r.url.clone()).style(Style::default().fg(Color::Cyan)),
            Cell::from(r.reason.clone()).style(Style::default().fg(Color::Yellow)),
            Cell::from(r.timestamp.clone()),
        ])
    });

    Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Min(24),
            Constraint::Min(24),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["#", "index", "onion", "reason", "timestamp"]))
    .block(
        Block::default()
            .title(format!("Skipped Onions ({})", records.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    )
    .column_spacing(1)
}

/// Rows needed to show both tables and the caption without clipping.
pub fn summary_height(summary: &CrawlSummary) -> usize {
    summary.captured.len() + summary.skipped.len() + 2 * TABLE_CHROME_ROWS + 1
}

pub fn draw_summary(f: &mut Frame, summary: &CrawlSummary, caption: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((summary.captured.len() + TABLE_CHROME_ROWS) as u16),
            Constraint::Length((summary.skipped.len() + TABLE_CHROME_ROWS) as u16),
            Constraint::Length(1),
        ])
        .split(f.area());

    f.render_widget(captured_table(&summary.captured), chunks[0]);
    f.render_widget(skipped_table(&summary.skipped), chunks[1]);
    f.render_widget(
        Line::styled(
            caption.to_string(),
            Style::default().add_modifier(Modifier::ITALIC),
        ),
        chunks[2],
    );
}

/// Prints the summary tables below the log output. Falls back to plain
/// lines when stdout is not a terminal or the tables would not fit.
pub fn render_summary(summary: &CrawlSummary) -> io::Result<()> {
    let caption = Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
    let height = summary_height(summary);
    let stdout = io::stdout();

    let fits = stdout.is_terminal()
        && crossterm::terminal::size()
            .map(|(_, rows)| height <= usize::from(rows))
            .unwrap_or(false);
    if !fits {
        return write_plain_summary(&mut stdout.lock(), summary, &caption);
    }

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(height as u16),
        },
    )?;
    terminal.draw(|f| draw_summary(f, summary, &caption))?;
    drop(terminal);
    println!();
    Ok(())
}

pub fn write_plain_summary(
    out: &mut impl Write,
    summary: &CrawlSummary,
    caption: &str,
) -> io::Result<()> {
    writeln!(out, "Captured Onions ({})", summary.captured.len())?;
    writeln!(out, "#\tindex\tonion\tfile\tdimensions\tsize\tcaptured at")?;
    for (i, r) in summary.captured.iter().enumerate() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}x{}\t{}\t{}",
            i + 1,
            r.index,
            r.url,
            r.filename,
            r.width,
            r.height,
            human_size(r.size),
            r.captured_at
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Skipped Onions ({})", summary.skipped.len())?;
    writeln!(out, "#\tindex\tonion\treason\ttimestamp")?;
    for (i, r) in summary.skipped.iter().enumerate() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            i + 1,
            r.index,
            r.url,
            r.reason,
            r.timestamp
        )?;
    }
    writeln!(out, "{caption}")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;

    use super::*;

    fn summary() -> CrawlSummary {
        CrawlSummary {
            captured: vec![
                CaptureRecord {
                    index: 1,
                    url: "http://onion1.onion".to_string(),
                    filename: "onion1.onion.png".to_string(),
                    width: 1366,
                    height: 768,
                    size: 2048,
                    captured_at: "12:00:00 PM".to_string(),
                },
                CaptureRecord {
                    index: 2,
                    url: "http://onion2.onion".to_string(),
                    filename: "onion2.onion.png".to_string(),
                    width: 1366,
                    height: 900,
                    size: 4096,
                    captured_at: "12:05:00 PM".to_string(),
                },
            ],
            skipped: vec![SkipRecord {
                index: 3,
                url: "http://onion3.onion".to_string(),
                reason: "Error message".to_string(),
                timestamp: "12:10:00 PM".to_string(),
            }],
        }
    }

    fn rendered_lines(summary: &CrawlSummary) -> Vec<String> {
        let width = 140u16;
        let height = summary_height(summary) as u16;
        let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("test terminal");
        terminal
            .draw(|f| draw_summary(f, summary, "Fri Oct 16 12:00:00 2026"))
            .expect("draws");
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(usize::from(width))
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect()
    }

    #[test]
    fn both_tables_show_every_record() {
        let lines = rendered_lines(&summary());
        let text = lines.join("\n");

        assert!(text.contains("Captured Onions (2)"));
        assert!(text.contains("Skipped Onions (1)"));
        assert!(text.contains("http://onion1.onion"));
        assert!(text.contains("http://onion2.onion"));
        assert!(text.contains("1366x900"));
        assert!(text.contains("Error message"));
        assert!(text.contains("12:10:00 PM"));
        assert!(lines.last().is_some_and(|l| l.starts_with("Fri Oct 16")));
    }

    #[test]
    fn skipped_rows_keep_their_discovery_index() {
        let lines = rendered_lines(&summary());
        let row = lines
            .iter()
            .find(|l| l.contains("http://onion3.onion"))
            .expect("skipped row rendered");
        let cells = row
            .trim_matches(|c| c == '│' || c == ' ')
            .split_whitespace()
            .collect::<Vec<_>>();

        assert_eq!(&cells[..3], &["1", "3", "http://onion3.onion"]);
    }

    #[test]
    fn plain_summary_lists_each_record_once() {
        let mut out = Vec::new();
        write_plain_summary(&mut out, &summary(), "caption").expect("written");
        let text = String::from_utf8(out).expect("utf8");

        assert_eq!(text.matches("http://onion").count(), 3);
        assert!(text.contains("2\t2\thttp://onion2.onion\tonion2.onion.png\t1366x900\t4.0 KB\t12:05:00 PM"));
        assert!(text.contains("1\t3\thttp://onion3.onion\tError message\t12:10:00 PM"));
        assert!(text.ends_with("caption\n"));
    }

    #[test]
    fn height_covers_both_tables_and_caption() {
        assert_eq!(summary_height(&summary()), 3 + 6 + 1);
        assert_eq!(summary_height(&CrawlSummary::default()), 7);
    }
}
