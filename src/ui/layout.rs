use crate::app::{App, AppView, Panel, PhaseView};
use crate::settings::SettingsField;
use beespeed::speedtest::TestPhase;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

const ACCENT: Color = Color::Rgb(100, 149, 237);
const DOWNLOAD: Color = Color::Rgb(134, 194, 156);
const DOWNLOAD_DIM: Color = Color::Rgb(80, 120, 90);
const UPLOAD: Color = Color::Rgb(147, 180, 220);
const UPLOAD_DIM: Color = Color::Rgb(90, 110, 140);
const LATENCY: Color = Color::Rgb(220, 180, 130);
const LATENCY_DIM: Color = Color::Rgb(130, 105, 80);
const FAILURE: Color = Color::Rgb(220, 110, 110);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

const SEPARATOR: &str = "  ·  ";

/// Everything a panel shows, whether compact or expanded.
struct Metric<'a> {
    title: &'static str,
    color: Color,
    dim: Color,
    headline: String,
    detail: String,
    progress: Option<f64>,
    samples: &'a [f64],
    unit: &'static str,
    format: fn(f64) -> String,
}

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(area);

    match app.view {
        AppView::Main => {
            draw_header(frame, chunks[0], app);
            if app.expanded {
                draw_expanded(frame, chunks[1], &metric(app, app.selected_panel));
            } else {
                let columns = Layout::horizontal([Constraint::Ratio(1, 3); 3]).split(chunks[1]);
                for (column, panel) in columns
                    .iter()
                    .zip([Panel::Download, Panel::Upload, Panel::Ping])
                {
                    let selected = app.selected_panel == panel;
                    draw_compact(frame, *column, &metric(app, panel), selected);
                }
            }
            draw_footer(frame, chunks[2], app);
        }
        AppView::Settings => draw_settings(frame, &chunks, app),
    }
}

fn metric(app: &App, panel: Panel) -> Metric<'_> {
    match panel {
        Panel::Download => transfer_metric("Download", DOWNLOAD, DOWNLOAD_DIM, &app.download, app),
        Panel::Upload => transfer_metric("Upload", UPLOAD, UPLOAD_DIM, &app.upload, app),
        Panel::Ping => {
            let latency = if app.result.ping_millis > 0.0 {
                app.result.ping_millis
            } else {
                app.ping_samples.last().copied().unwrap_or(0.0)
            };
            Metric {
                title: "Latency",
                color: LATENCY,
                dim: LATENCY_DIM,
                headline: format_millis(latency),
                detail: if app.result.ping_millis > 0.0 {
                    format!("jitter {}", format_millis(app.result.jitter_millis))
                } else {
                    "jitter —".to_string()
                },
                progress: None,
                samples: &app.ping_samples,
                unit: "ms",
                format: format_millis,
            }
        }
    }
}

fn transfer_metric<'a>(
    title: &'static str,
    color: Color,
    dim: Color,
    view: &'a PhaseView,
    app: &App,
) -> Metric<'a> {
    let detail = match view.result {
        Some(result) => format!("data used {}", result.data_used()),
        None if app.is_running() => format!("{} connections", app.settings.concurrency),
        None => String::new(),
    };
    Metric {
        title,
        color,
        dim,
        headline: format_speed(view.current_mbps()),
        detail,
        progress: Some(view.progress),
        samples: &view.samples,
        unit: "Mbps",
        format: format_speed,
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).split(inner);
    let top = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(rows[0]);

    frame.render_widget(
        Paragraph::new("beespeed")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        top[0],
    );

    let (status, color) = match (app.phase, &app.error) {
        (TestPhase::Complete, Some(_)) => ("Failed", FAILURE),
        (TestPhase::Idle, _) => ("Ready", TEXT_MUTED),
        (TestPhase::Ping, _) => ("Measuring latency...", LATENCY),
        (TestPhase::Download, _) => ("Testing download...", DOWNLOAD),
        (TestPhase::Upload, _) => ("Testing upload...", UPLOAD),
        (TestPhase::Complete, None) => ("Complete", ACCENT),
    };
    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        top[1],
    );
    frame.render_widget(
        Paragraph::new(phase_trail(app.phase)).alignment(Alignment::Right),
        top[2],
    );

    let target = Line::from(vec![
        Span::styled(app.server_label.as_str(), Style::default().fg(TEXT_SECONDARY)),
        Span::styled(SEPARATOR, Style::default().fg(TEXT_MUTED)),
        Span::styled(app.isp_label.as_str(), Style::default().fg(TEXT_MUTED)),
    ]);
    frame.render_widget(Paragraph::new(target), rows[1]);
}

fn phase_trail(phase: TestPhase) -> Line<'static> {
    let steps = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];
    let position = |p: TestPhase| match p {
        TestPhase::Idle => 0,
        TestPhase::Ping => 1,
        TestPhase::Download => 2,
        TestPhase::Upload => 3,
        TestPhase::Complete => 4,
    };

    let mut spans = Vec::new();
    for (i, (step, label)) in steps.into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
        let style = if step == phase {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if position(step) < position(phase) {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };
        spans.push(Span::styled(label, style));
    }
    Line::from(spans)
}

fn panel_block(metric: &Metric, active: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if active { BORDER_ACTIVE } else { BORDER }))
        .title(Span::styled(
            format!(" {} ", metric.title),
            Style::default().fg(if active { metric.color } else { TEXT_SECONDARY }),
        ))
}

fn draw_compact(frame: &mut Frame, area: Rect, metric: &Metric, selected: bool) {
    let block = panel_block(metric, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(metric.headline.as_str())
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        rows[0],
    );
    frame.render_widget(
        Paragraph::new(metric.detail.as_str())
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        rows[1],
    );
    if let Some(progress) = metric.progress {
        draw_progress_bar(frame, rows[2], progress, metric.color, metric.dim);
    }
    draw_trace(frame, rows[3], metric.samples, metric.color);
}

fn draw_expanded(frame: &mut Frame, area: Rect, metric: &Metric) {
    let block = panel_block(metric, true);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(4),
    ])
    .split(inner);

    let muted = Style::default().fg(TEXT_MUTED);
    let mut spans = vec![Span::styled(
        metric.headline.clone(),
        Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
    )];
    if !metric.detail.is_empty() {
        spans.push(Span::styled(SEPARATOR, muted));
        spans.push(Span::styled(
            metric.detail.clone(),
            Style::default().fg(TEXT_SECONDARY),
        ));
    }
    if let Some((avg, max, min)) = summary(metric.samples) {
        for (label, value) in [("avg", avg), ("max", max), ("min", min)] {
            spans.push(Span::styled(SEPARATOR, muted));
            spans.push(Span::styled(format!("{} {}", label, (metric.format)(value)), muted));
        }
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
        rows[0],
    );

    if let Some(progress) = metric.progress {
        draw_progress_bar(frame, rows[1], progress, metric.color, metric.dim);
    }
    draw_detailed_chart(frame, rows[2], metric.samples, metric.color, metric.unit);
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(width - filled), Style::default().fg(dim)),
        Span::raw(" "),
    ]);
    frame.render_widget(Paragraph::new(bar), area);
}

fn points(data: &[f64]) -> Vec<(f64, f64)> {
    data.iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect()
}

fn draw_trace(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    let Some((min, max)) = bounds(data) else {
        return;
    };
    if area.width < 4 || area.height < 2 {
        return;
    }

    let margin = (max - min).max(1.0) * 0.1;
    let points = points(data);
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);
    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([min - margin, max + margin]));
    frame.render_widget(chart, area);
}

fn draw_detailed_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: &str) {
    let (Some((min, max)), Some((avg, _, _))) = (bounds(data), summary(data)) else {
        return;
    };
    if area.width < 10 || area.height < 3 {
        return;
    }

    let margin = (max - min).max(0.1) * 0.1;
    let (y_min, y_max) = ((min - margin).max(0.0), max + margin);
    let points = points(data);
    let avg_line = [(0.0, avg), (data.len() as f64, avg)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&points),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(TEXT_MUTED))
            .data(&avg_line),
    ];
    let labels = vec![
        Span::styled(format!("{:.0}", y_min), Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("{:.0} {}", y_max, unit), Style::default().fg(TEXT_MUTED)),
    ];

    let chart = Chart::new(datasets)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([0.0, data.len() as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([y_min, y_max])
                .labels(labels),
        );
    frame.render_widget(chart, area);
}

fn draw_settings(frame: &mut Frame, chunks: &[Rect], app: &App) {
    let header = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header.inner(chunks[0]);
    frame.render_widget(header, chunks[0]);
    frame.render_widget(
        Paragraph::new("Settings")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    let content = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content);
    frame.render_widget(block, content);

    let settings = &app.settings;
    let entries = [
        (SettingsField::PingCount, "Ping samples", settings.ping_count.to_string()),
        (SettingsField::Duration, "Phase length", format!("{} s", settings.duration_secs)),
        (SettingsField::Concurrency, "Connections", settings.concurrency.to_string()),
    ];
    let rows = Layout::vertical([Constraint::Length(2); 3]).split(inner);
    for (row, (field, label, value)) in rows.iter().zip(entries) {
        draw_setting_row(frame, *row, label, &value, app.selected_setting == field);
    }

    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let columns = Layout::horizontal([Constraint::Length(16), Constraint::Min(10)]).split(area);
    let (label_style, value_text, value_style) = if selected {
        (
            Style::default().fg(ACCENT),
            format!("< {} >", value),
            Style::default().fg(TEXT_PRIMARY),
        )
    } else {
        (
            Style::default().fg(TEXT_SECONDARY),
            value.to_string(),
            Style::default().fg(TEXT_MUTED),
        )
    };
    frame.render_widget(Paragraph::new(format!(" {}", label)).style(label_style), columns[0]);
    frame.render_widget(Paragraph::new(value_text).style(value_style), columns[1]);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let footer = match &app.error {
        Some(message) if !app.is_running() => Paragraph::new(format!("error: {}", message))
            .style(Style::default().fg(FAILURE)),
        _ => {
            let help = if app.expanded {
                "esc close · q quit"
            } else if app.is_running() {
                "tab select · space expand · esc cancel · q quit"
            } else {
                "enter start · s settings · tab select · space expand · q quit"
            };
            Paragraph::new(help).style(Style::default().fg(TEXT_MUTED))
        }
    };
    frame.render_widget(footer.alignment(Alignment::Center), area);
}

fn bounds(data: &[f64]) -> Option<(f64, f64)> {
    let mut values = data.iter().copied().filter(|v| v.is_finite());
    let first = values.next()?;
    Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

/// `(avg, max, min)` of the finite samples.
fn summary(data: &[f64]) -> Option<(f64, f64, f64)> {
    let (min, max) = bounds(data)?;
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    let avg = finite.iter().sum::<f64>() / finite.len() as f64;
    Some((avg, max, min))
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}

fn format_millis(ms: f64) -> String {
    if ms > 0.0 {
        format!("{:.1} ms", ms)
    } else {
        "—".to_string()
    }
}
