use chrono::{DateTime, Local};
use minijinja::{context, AutoEscape, Environment};
use serde::Serialize;
use serde_json::Value;

use std::collections::HashMap;
use std::f64::consts::PI;

use log::*;

use crate::dashboard::snapshot::Snapshot;
use crate::Error;

const TEMPLATE_NAME: &str = "dashboard.html";
const TEMPLATE: &str = include_str!("templates/dashboard.html");

/// Served when the template itself cannot be rendered.
const BROKEN_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>YouTube Data Analysis Dashboard</title></head>\
<body><h1>YouTube Data Analysis Dashboard</h1>\
<p>The dashboard could not be rendered, see the dashboard log.</p></body></html>";

const PALETTE: [&str; 8] = [
    "#4c72b0", "#dd8452", "#55a868", "#c44e52", "#8172b3", "#937860", "#da8bc3", "#8c8c8c",
];

const EXAMPLE_VIDEOS: [(&str, u64); 5] = [
    ("Video 1", 1500),
    ("Video 2", 2300),
    ("Video 3", 1800),
    ("Video 4", 3200),
    ("Video 5", 2700),
];

#[derive(Debug, Serialize)]
pub struct Tick {
    pub x: f64,
    pub y: f64,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct Bar {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label_x: f64,
    pub label_y: f64,
    pub color: &'static str,
    pub label: String,
    pub value: u64,
}

/// Geometry of a bar chart, drawn by the `bar_chart` template macro.
#[derive(Debug, Serialize)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
    pub base: f64,
    pub end: f64,
    pub center: f64,
    pub center_plot: f64,
    pub middle: f64,
    pub x_label_y: f64,
    pub ticks: Vec<Tick>,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Serialize)]
pub struct Slice {
    /// `None` for a slice covering the whole pie.
    pub path: Option<String>,
    pub color: &'static str,
    pub label: String,
    pub count: usize,
    pub percent: String,
    pub text_x: f64,
    pub text_y: f64,
    pub legend_y: usize,
}

#[derive(Debug, Serialize)]
pub struct PieChart {
    pub title: String,
    pub cx: f64,
    pub cy: f64,
    pub r: f64,
    pub slices: Vec<Slice>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct Card {
    label: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct SnapshotView {
    cards: Vec<Card>,
    views: BarChart,
    sentiment: PieChart,
    entities: Table,
}

fn round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Top `n` videos by view count, ties kept in file order.
pub fn top_videos(snapshot: &Snapshot, n: usize) -> Vec<(String, u64)> {
    let mut videos: Vec<_> = snapshot
        .videos
        .iter()
        .map(|v| (v.title.clone(), v.view_count))
        .collect();
    videos.sort_by(|a, b| b.1.cmp(&a.1));
    videos.truncate(n);
    videos
}

/// Sentiment label counts, most frequent first.
pub fn sentiment_counts(snapshot: &Snapshot) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in &snapshot.analysis.sentiment_analysis {
        *counts.entry(row.label.as_str()).or_insert(0) += 1;
    }
    let mut counts: Vec<_> = counts
        .into_iter()
        .map(|(label, count)| (label.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

pub fn bar_chart(title: &str, x_label: &str, y_label: &str, bars: &[(String, u64)]) -> BarChart {
    let (width, height) = (720.0, 420.0);
    let (left, right, top, bottom) = (70.0, 20.0, 40.0, 110.0);
    let plot_w = width - left - right;
    let plot_h = height - top - bottom;
    let base = top + plot_h;
    let max = bars.iter().map(|b| b.1).max().unwrap_or(0).max(1) as f64;

    let ticks = (0..=4)
        .map(|step| Tick {
            x: left - 6.0,
            y: round(base - plot_h * step as f64 / 4.0 + 4.0),
            label: format!("{:.0}", max * step as f64 / 4.0),
        })
        .collect();

    let slot = plot_w / bars.len().max(1) as f64;
    let bars = bars
        .iter()
        .enumerate()
        .map(|(i, (label, value))| {
            let bar_h = plot_h * *value as f64 / max;
            Bar {
                x: round(left + slot * i as f64 + slot * 0.15),
                y: round(base - bar_h),
                width: round(slot * 0.7),
                height: round(bar_h),
                label_x: round(left + slot * (i as f64 + 0.5)),
                label_y: base + 14.0,
                color: PALETTE[i % PALETTE.len()],
                label: label.clone(),
                value: *value,
            }
        })
        .collect();

    BarChart {
        title: title.to_string(),
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        width,
        height,
        left,
        top,
        base,
        end: left + plot_w,
        center: width / 2.0,
        center_plot: left + plot_w / 2.0,
        middle: top + plot_h / 2.0,
        x_label_y: height - 8.0,
        ticks,
        bars,
    }
}

pub fn pie_chart(title: &str, counts: &[(String, usize)]) -> PieChart {
    let (cx, cy, r) = (220.0, 230.0, 160.0);
    let total: usize = counts.iter().map(|s| s.1).sum();

    let mut slices = Vec::with_capacity(counts.len());
    let mut angle = -PI / 2.0;
    for (i, (label, count)) in counts.iter().enumerate() {
        if total == 0 {
            break;
        }
        let share = *count as f64 / total as f64;
        let end = angle + share * 2.0 * PI;
        let path = if share >= 1.0 {
            None
        } else {
            Some(format!(
                "M {} {} L {:.2} {:.2} A {r} {r} 0 {} 1 {:.2} {:.2} Z",
                cx,
                cy,
                cx + r * angle.cos(),
                cy + r * angle.sin(),
                if share > 0.5 { 1 } else { 0 },
                cx + r * end.cos(),
                cy + r * end.sin(),
                r = r,
            ))
        };
        let middle = angle + share * PI;
        slices.push(Slice {
            path,
            color: PALETTE[i % PALETTE.len()],
            label: label.clone(),
            count: *count,
            percent: format!("{:.1}%", share * 100.0),
            text_x: round(cx + r * 0.65 * middle.cos()),
            text_y: round(cy + r * 0.65 * middle.sin()),
            legend_y: 80 + i * 24,
        });
        angle = end;
    }

    PieChart {
        title: title.to_string(),
        cx,
        cy,
        r,
        slices,
    }
}

/// Table over a list of records; columns are the keys in first seen order.
pub fn records_table(records: &[serde_json::Map<String, Value>]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| match record.get(column) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();

    Table { columns, rows }
}

fn snapshot_view(snapshot: &Snapshot, now: DateTime<Local>) -> SnapshotView {
    SnapshotView {
        cards: vec![
            Card {
                label: "Videos",
                value: snapshot.videos.len().to_string(),
            },
            Card {
                label: "Comments",
                value: snapshot.comments.len().to_string(),
            },
            Card {
                label: "Last refresh",
                value: now.format("%Y-%m-%d %H:%M").to_string(),
            },
        ],
        views: bar_chart(
            "Top 5 videos by views",
            "title",
            "viewCount",
            &top_videos(snapshot, 5),
        ),
        sentiment: pie_chart("Sentiment distribution", &sentiment_counts(snapshot)),
        entities: records_table(&snapshot.analysis.named_entities),
    }
}

fn example_chart() -> BarChart {
    let bars: Vec<(String, u64)> = EXAMPLE_VIDEOS
        .iter()
        .map(|(title, views)| (title.to_string(), *views))
        .collect();
    bar_chart("Example: views per video", "Video title", "Views", &bars)
}

fn environment() -> Result<Environment<'static>, Error> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.add_template(TEMPLATE_NAME, TEMPLATE)?;
    Ok(env)
}

fn try_render(loaded: &Result<Snapshot, Error>, now: DateTime<Local>) -> Result<String, Error> {
    let (error, snapshot) = match loaded {
        Ok(snapshot) if snapshot.has_data() => (None, Some(snapshot_view(snapshot, now))),
        Ok(_) => (None, None),
        Err(error) => (Some(error.to_string()), None),
    };
    let example = snapshot.is_none().then(example_chart);

    let env = environment()?;
    let page = env.get_template(TEMPLATE_NAME)?.render(context! {
        error => error,
        snapshot => snapshot,
        example => example,
    })?;
    Ok(page)
}

/// Whole dashboard page. Never fails: load errors become a banner followed by
/// the example chart.
pub fn render_page(loaded: &Result<Snapshot, Error>, now: DateTime<Local>) -> String {
    match try_render(loaded, now) {
        Ok(page) => page,
        Err(error) => {
            error!("{}", error);
            BROKEN_PAGE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::snapshot::{Analysis, SentimentRow, SnapshotFiles, Video};
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::PathBuf;

    fn snapshot() -> Snapshot {
        let views = [10, 700, 30, 700, 5, 90];
        Snapshot {
            files: SnapshotFiles {
                videos: PathBuf::from("v"),
                comments: PathBuf::from("c"),
                analysis: PathBuf::from("a"),
            },
            videos: views
                .iter()
                .enumerate()
                .map(|(i, v)| Video {
                    title: format!("clip <{}>", i),
                    view_count: *v,
                })
                .collect(),
            comments: vec![json!({"text": "nice"}), json!({"text": "meh"})],
            analysis: Analysis {
                sentiment_analysis: ["POSITIVE", "NEGATIVE", "POSITIVE"]
                    .iter()
                    .map(|l| SentimentRow { label: l.to_string() })
                    .collect(),
                named_entities: vec![
                    json!({"word": "Paris", "entity": "I-LOC"}).as_object().unwrap().clone(),
                    json!({"word": "Ada", "score": 0.9}).as_object().unwrap().clone(),
                ],
            },
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn top_five_sorted_by_views() {
        let top = top_videos(&snapshot(), 5);
        let views: Vec<_> = top.iter().map(|t| t.1).collect();
        assert_eq!(views, vec![700, 700, 90, 30, 10]);
        assert_eq!(top[0].0, "clip <1>");
        assert_eq!(top[1].0, "clip <3>");
    }

    #[test]
    fn counts_sentiment_labels() {
        assert_eq!(
            sentiment_counts(&snapshot()),
            vec![("POSITIVE".to_string(), 2), ("NEGATIVE".to_string(), 1)]
        );
    }

    #[test]
    fn table_uses_union_of_keys() {
        let table = records_table(&snapshot().analysis.named_entities);
        assert_eq!(table.columns, ["entity", "word", "score"]);
        assert_eq!(table.rows[0], ["I-LOC", "Paris", ""]);
        assert_eq!(table.rows[1], ["", "Ada", "0.9"]);

        let html = render_page(&Ok(snapshot()), noon());
        assert!(html.contains("<th>score</th>"));
        assert!(html.contains("<td>0.9</td>"));
    }

    #[test]
    fn tallest_bar_fills_the_plot() {
        let chart = bar_chart("t", "x", "y", &top_videos(&snapshot(), 5));
        assert_eq!(chart.bars.len(), 5);
        assert_eq!(chart.bars[0].y, chart.top);
        assert_eq!(chart.bars[0].height, chart.base - chart.top);
        assert_eq!(chart.ticks.last().unwrap().label, "700");
    }

    #[test]
    fn page_with_data() {
        let html = render_page(&Ok(snapshot()), noon());
        assert!(html.contains("2024-05-01 12:30"));
        assert!(html.contains("Top 5 videos by views"));
        assert!(html.contains("66.7%"));
        assert!(html.contains("33.3%"));
        assert!(html.contains("clip &lt;1&gt;"));
        assert!(!html.contains("clip <1>"));
        assert!(!html.contains("example visualization"));
    }

    #[test]
    fn markup_in_data_is_escaped_everywhere() {
        let mut hostile = snapshot();
        hostile.videos[1].title = "<script>alert(1)</script>".to_string();
        hostile.analysis.sentiment_analysis[0].label = "<b>POS</b>".to_string();
        hostile.analysis.named_entities[0]
            .insert("<img src=x>".to_string(), json!("\"quoted\""));

        let html = render_page(&Ok(hostile), noon());
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>POS</b>"));
        assert!(!html.contains("<img"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&quot;quoted&quot;"));
        // Chart markup itself is not escaped.
        assert!(html.contains("<svg class=\"chart\""));
        assert!(html.contains("<path d=\"M 220 230"));
    }

    #[test]
    fn load_error_falls_back_to_example() {
        let loaded = Err(Error::MissingSnapshot("videos", "data".to_string()));
        let html = render_page(&loaded, noon());
        assert!(html.contains("banner error"));
        assert!(html.contains("No videos file found in data"));
        assert!(html.contains("Example: views per video"));
        assert!(html.contains("How to generate data"));
        assert!(html.contains("<a href=\"http://localhost:5678\">"));
    }

    #[test]
    fn failed_render_task_shows_banner() {
        let loaded = Err(Error::RenderTask("task panicked".to_string()));
        let html = render_page(&loaded, noon());
        assert!(html.contains("Error loading data: Dashboard render task failed: task panicked"));
        assert!(html.contains("Example: views per video"));
    }

    #[test]
    fn empty_snapshot_shows_example() {
        let mut empty = snapshot();
        empty.videos.clear();
        let html = render_page(&Ok(empty), noon());
        assert!(html.contains("Example: views per video"));
        assert!(!html.contains("banner error"));
    }

    #[test]
    fn single_label_pie_is_a_circle() {
        let chart = pie_chart("x", &[("POSITIVE".to_string(), 4)]);
        assert_eq!(chart.slices.len(), 1);
        assert!(chart.slices[0].path.is_none());
        assert_eq!(chart.slices[0].percent, "100.0%");

        let mut one_label = snapshot();
        one_label.analysis.sentiment_analysis.truncate(1);
        let html = render_page(&Ok(one_label), noon());
        assert!(html.contains("<circle cx=\"220"));
        assert!(html.contains("100.0%"));
    }

    #[test]
    fn no_sentiment_rows() {
        assert!(pie_chart("x", &[]).slices.is_empty());
        let mut none = snapshot();
        none.analysis.sentiment_analysis.clear();
        assert!(render_page(&Ok(none), noon()).contains("No sentiment data"));
    }
}
