//! Task monitor view
//!
//! One table row per task across every bucket, a summary line on top and
//! key hints on the bottom.

use ratatui::{
    prelude::*,
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table},
};

use crate::app::App;
use crate::manager::{Bucket, ManagerSnapshot};
use crate::task::TaskSummary;
use crate::ui::Theme;

const HEADERS: [&str; 9] = ["ID", "BUCKET", "TITLE", "PROGRAM", "STAGE", "%", "RATE", "ETA", "STATUS"];

const KEY_HINTS: [(&str, &str); 6] = [
    ("↑↓", "select"),
    ("x", "terminate"),
    ("K", "kill"),
    ("d", "cancel"),
    ("+/-", "limit"),
    ("q", "quit"),
];

/// Render the whole monitor
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(Block::default().style(Theme::text()), frame.area());
    render_summary(frame, chunks[0], &app.snapshot);
    render_table(frame, chunks[1], app);
    render_footer(frame, chunks[2], app);
}

/// Bucket counts and the concurrency limit
pub fn summary_line(snapshot: &ManagerSnapshot) -> String {
    format!(
        " MEDIATUI  playing {}  queued {}  active {}/{}  postprocessing {}  done {}",
        snapshot.playing.len() + snapshot.to_play.len(),
        snapshot.to_download.len(),
        snapshot.active.len(),
        snapshot.max_concurrent_tasks,
        snapshot.postprocessing.len(),
        snapshot.done.len(),
    )
}

fn render_summary(frame: &mut Frame, area: Rect, snapshot: &ManagerSnapshot) {
    let line = Paragraph::new(summary_line(snapshot)).style(Theme::title());
    frame.render_widget(line, area);
}

/// Table cells for one task
pub fn row_cells(bucket: Bucket, task: &TaskSummary) -> [String; 9] {
    let progress = task.progress.clone().unwrap_or_default();
    let stage = match (task.stage, task.stages) {
        (Some(stage), Some(stages)) => format!("{}/{}", (stage + 1).min(stages), stages),
        _ => "-".to_string(),
    };
    let status = match &task.result {
        Some(result) => result.clone(),
        None => progress.status.clone().unwrap_or_else(|| "-".to_string()),
    };
    [
        task.id.to_string(),
        bucket.to_string(),
        task.title.clone(),
        task.program.clone().unwrap_or_else(|| "-".to_string()),
        stage,
        progress.format_percent(),
        progress.format_rate(),
        progress.format_eta(),
        status,
    ]
}

fn render_table(frame: &mut Frame, area: Rect, app: &App) {
    let rows = app.snapshot.rows();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Theme::border())
        .title(Span::styled(" TASKS ", Theme::title()));

    if rows.is_empty() {
        let empty = Paragraph::new("No tasks")
            .style(Theme::dimmed())
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    // borders and header
    let visible = area.height.saturating_sub(3) as usize;
    let offset = app.scroll_offset(visible);

    let table_rows: Vec<Row> = rows
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, (bucket, task))| {
            let cells = row_cells(*bucket, task);
            if i == app.selected {
                return Row::new(cells.to_vec()).style(Theme::list_item_selected());
            }
            let status_style = match &task.result {
                Some(result) => Theme::outcome(result),
                None => Theme::dimmed(),
            };
            let [id, bucket_name, title, program, stage, percent, rate, eta, status] = cells;
            Row::new(vec![
                Cell::from(id).style(Theme::dimmed()),
                Cell::from(bucket_name).style(Theme::bucket(*bucket)),
                Cell::from(title),
                Cell::from(program),
                Cell::from(stage),
                Cell::from(percent),
                Cell::from(rate),
                Cell::from(eta),
                Cell::from(status).style(status_style),
            ])
            .style(Theme::text())
        })
        .collect();

    let widths = [
        Constraint::Length(5),
        Constraint::Length(15),
        Constraint::Fill(3),
        Constraint::Length(12),
        Constraint::Length(6),
        Constraint::Length(7),
        Constraint::Length(11),
        Constraint::Length(9),
        Constraint::Fill(2),
    ];
    let table = Table::new(table_rows, widths)
        .header(Row::new(HEADERS.to_vec()).style(Theme::header()))
        .block(block);
    frame.render_widget(table, area);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let line = match &app.message {
        Some(message) => Line::from(Span::styled(format!(" {}", message), Theme::error())),
        None => {
            let mut spans = vec![Span::raw(" ")];
            for (key, desc) in KEY_HINTS {
                spans.push(Span::styled(key, Theme::keybind()));
                spans.push(Span::styled(format!(" {}  ", desc), Theme::keybind_desc()));
            }
            Line::from(spans)
        }
    };
    frame.render_widget(Paragraph::new(line).style(Theme::status_bar()), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Progress;
    use std::time::Duration;

    fn summary() -> TaskSummary {
        TaskSummary {
            id: 7,
            title: "Clip".into(),
            kind: "download",
            program: Some("yt-dlp".into()),
            pid: Some(1234),
            stage: Some(0),
            stages: Some(2),
            dest: None,
            progress: Some(Progress {
                percent: Some(42.0),
                rate: Some(2048.0),
                eta: Some(Duration::from_secs(90)),
                status: Some("downloading".into()),
                ..Default::default()
            }),
            result: None,
        }
    }

    #[test]
    fn test_row_cells_running_download() {
        let cells = row_cells(Bucket::Active, &summary());
        assert_eq!(cells[0], "7");
        assert_eq!(cells[1], Bucket::Active.to_string());
        assert_eq!(cells[3], "yt-dlp");
        assert_eq!(cells[4], "1/2");
        assert_eq!(cells[5], "42.0%");
        assert_eq!(cells[8], "downloading");
    }

    #[test]
    fn test_row_cells_result_overrides_status() {
        let mut task = summary();
        task.result = Some("exit 0".into());
        task.stage = Some(2);
        let cells = row_cells(Bucket::Done, &task);
        assert_eq!(cells[4], "2/2");
        assert_eq!(cells[8], "exit 0");
    }

    #[test]
    fn test_row_cells_play_task() {
        let mut task = summary();
        task.kind = "play";
        task.stage = None;
        task.stages = None;
        task.progress = None;
        task.program = None;
        let cells = row_cells(Bucket::ToPlay, &task);
        assert_eq!(cells[3], "-");
        assert_eq!(cells[4], "-");
        assert_eq!(cells[5], "-");
    }
}
