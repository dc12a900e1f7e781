//! HTTP request handlers.

use super::AppState;
use crate::health::{HealthState, NodeView, RunMode, ScheduleView};

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use chrono::{DateTime, Local, Utc};

// ============================================================================
// Templates (simple string replacement)
// ============================================================================

const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");
const STATUS_TEMPLATE: &str = include_str!("templates/status.html");
const CONFIG_TEMPLATE: &str = include_str!("templates/config.html");

/// Seconds between browser reloads of a page.
const REFRESH_SECONDS: &str = "900";

fn render_page(title: &str, content: &str) -> String {
    LAYOUT_TEMPLATE
        .replace("{{title}}", &escape(title))
        .replace("{{refresh}}", REFRESH_SECONDS)
        .replace("{{content}}", content)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// Status
// ============================================================================

pub async fn handle_status_page(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.state.snapshot().await;

    let rows: String = snapshot
        .nodes
        .iter()
        .map(status_row)
        .collect::<Vec<_>>()
        .join("\n");

    let content = STATUS_TEMPLATE
        .replace("{{schedule}}", &escape(&describe_schedule(&snapshot.schedule)))
        .replace("{{rows}}", &rows);

    Html(render_page(&state.config.http.title, &content))
}

pub async fn handle_status_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.state.snapshot().await)
}

fn status_row(node: &NodeView) -> String {
    let class = match node.state {
        HealthState::Healthy => "healthy",
        HealthState::Unhealthy => "unhealthy",
        HealthState::Pending => "pending",
    };
    let last_result = node
        .last_outcome
        .as_ref()
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "        <tr><td>{}</td><td>{}</td><td>{}</td>\
         <td><span class=\"status-indicator {}\"></span> {}</td>\
         <td>{}</td><td class=\"history\">{}</td><td>{}</td></tr>",
        escape(&node.name),
        escape(&node.peer),
        escape(&node.tuning),
        class,
        node.state,
        format_time(node.last_healthy),
        escape(&node.history_glyphs),
        escape(&last_result),
    )
}

fn describe_schedule(schedule: &ScheduleView) -> String {
    let passes = match schedule.max_passes {
        Some(max) => format!("pass {} of {}", schedule.pass, max),
        None => format!("pass {}", schedule.pass),
    };

    let activity = match schedule.mode {
        RunMode::Starting => "Starting up".to_string(),
        RunMode::Probing => match &schedule.current_node {
            Some(node) => format!("Probing {} ({})", node, passes),
            None => format!("Probing ({})", passes),
        },
        RunMode::Sleeping => format!(
            "Sleeping since {} after {}, next pass in {}s",
            format_time(schedule.sleep_started),
            passes,
            schedule.sleep_remaining_seconds.unwrap_or(0)
        ),
        RunMode::Finished => format!("Finished after {}", passes),
    };

    format!(
        "{}. Running since {}.",
        activity,
        format_time(Some(schedule.started))
    )
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "Never".to_string(),
    }
}

// ============================================================================
// Configuration
// ============================================================================

pub async fn handle_config_page(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = &state.config;
    let config_json = match serde_json::to_string_pretty(cfg.as_ref()) {
        Ok(json) => json,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let content = CONFIG_TEMPLATE
        .replace("{{rig_model}}", &cfg.rig.model.to_string())
        .replace("{{rig_port}}", &escape(&cfg.rig.port))
        .replace("{{rig_speed}}", &cfg.rig.speed.to_string())
        .replace("{{pat_call}}", &escape(&cfg.mail.pat_call))
        .replace("{{rx_aux_call}}", &escape(&cfg.mail.rx_aux_call))
        .replace("{{rf_transport}}", &escape(&cfg.mail.rf_transport))
        .replace("{{unhealthy_threshold}}", &cfg.health.unhealthy_threshold.to_string())
        .replace("{{window_size}}", &cfg.health.window_size.to_string())
        .replace("{{history_size}}", &cfg.health.history_size.to_string())
        .replace("{{retries}}", &cfg.poll.retries.to_string())
        .replace("{{retry_interval}}", &cfg.poll.retry_interval_seconds.to_string())
        .replace("{{next_pass_delay}}", &cfg.next_pass_delay.to_string())
        .replace("{{config_json}}", &escape(&config_json));

    let title = format!("{} Configuration", cfg.http.title);
    Html(render_page(&title, &content)).into_response()
}

pub async fn handle_config_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    // A radio mast
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e7d32"/>
        <path d="M50 30 L35 80 M50 30 L65 80 M40 62 L60 62" stroke="white" stroke-width="5" fill="none"/>
        <path d="M32 25 Q50 8 68 25" stroke="white" stroke-width="4" fill="none"/>
    </svg>"##;

    (
        [(axum::http::header::CONTENT_TYPE, "image/svg+xml")],
        svg
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
        assert_eq!(escape("K7HIL-10"), "K7HIL-10");
    }

    #[test]
    fn test_status_row() {
        let node = NodeView {
            name: "Hill<top>".to_string(),
            peer: "K7HIL-10".to_string(),
            tuning: "440.3500 MHz".to_string(),
            state: HealthState::Unhealthy,
            history: Vec::new(),
            history_glyphs: "++-".to_string(),
            last_healthy: None,
            last_checked: None,
            last_outcome: Some(ProbeOutcome::Unhealthy("probe not seen".to_string())),
        };
        let row = status_row(&node);
        assert!(row.contains("Hill&lt;top&gt;"));
        assert!(row.contains("status-indicator unhealthy"));
        assert!(row.contains("UNHEALTHY"));
        assert!(row.contains("Never"));
        assert!(row.contains("++-"));
        assert!(row.contains("unhealthy: probe not seen"));
    }

    #[test]
    fn test_describe_schedule() {
        let slept = Utc::now();
        let schedule = ScheduleView {
            mode: RunMode::Sleeping,
            pass: 2,
            max_passes: Some(10),
            started: Utc::now(),
            current_node: None,
            sleep_started: Some(slept),
            sleep_remaining_seconds: Some(42),
        };
        let text = describe_schedule(&schedule);
        let expected = format!(
            "Sleeping since {} after pass 2 of 10, next pass in 42s.",
            format_time(Some(slept))
        );
        assert!(text.starts_with(&expected), "{}", text);
    }
}
