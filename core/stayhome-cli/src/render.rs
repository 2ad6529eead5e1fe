//! Human-readable summaries of daemon responses.

use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::Value;
use stayhome_daemon_protocol::Method;
use std::collections::BTreeMap;

#[derive(Deserialize)]
struct WeeklyView {
    week_start: String,
    week_end: String,
    daily_hours: BTreeMap<String, f64>,
    weekly_total: f64,
    weekly_average: f64,
}

pub fn summary(method: Method, data: &Value) -> String {
    match method {
        Method::GetHealth => format!(
            "daemon {} (pid {}, v{})",
            text(&data["status"]),
            data["pid"],
            text(&data["version"])
        ),
        Method::GetStatus => status(data),
        Method::Refresh | Method::NetworkAvailable | Method::NetworkLost => report(data),
        Method::SetForeground => {
            let mode = if data["foreground"].as_bool().unwrap_or(false) {
                "foreground"
            } else {
                "background"
            };
            match &data["report"] {
                Value::Null => format!("daemon in {} mode", mode),
                report_data => format!("daemon in {} mode; {}", mode, report(report_data)),
            }
        }
        Method::RegisterHome | Method::UpdateHome | Method::DeleteUser => {
            let message = text(&data["status"]["message"]);
            match &data["report"] {
                Value::Null => message,
                report_data => format!("{}; {}", message, report(report_data)),
            }
        }
        Method::GetWeeklyStats => match serde_json::from_value::<WeeklyView>(data.clone()) {
            Ok(view) => weekly(&view),
            Err(err) => format!("unreadable weekly stats: {}", err),
        },
    }
}

fn status(data: &Value) -> String {
    let mut lines = Vec::new();
    if data["registered"].as_bool().unwrap_or(false) {
        lines.push(format!(
            "user {}: home {} ({}), matching {}",
            data["user_id"],
            text(&data["home_ssid"]),
            text(&data["home_bssid"]),
            text(&data["match_policy"])
        ));
    } else {
        lines.push("not registered".to_string());
    }

    let observation = &data["observation"];
    if observation["connected"].as_bool().unwrap_or(false) {
        lines.push(format!(
            "on {} ({}){}",
            text(&observation["ssid"]),
            text(&observation["bssid"]),
            if data["is_home"].as_bool().unwrap_or(false) {
                ", home"
            } else {
                ""
            }
        ));
    } else {
        lines.push("no Wi-Fi connection".to_string());
    }

    lines.push(belief(&data["belief"]));
    if let Some(at) = data["last_report"]["completed_at"].as_str().and_then(local_time) {
        lines.push(format!("last checked {}", at));
    }
    lines.join("\n")
}

fn report(data: &Value) -> String {
    let action = &data["action"];
    let what = match action["action"].as_str().unwrap_or("none") {
        "started" => format!("started session {}", action["log_id"]),
        "ended" => format!("ended session {}", action["log_id"]),
        "start_raced" => format!("session {} already open", action["log_id"]),
        "busy" => "another update in progress".to_string(),
        "start_failed" => format!("start failed ({}), will retry", text(&action["kind"])),
        "end_failed" => format!(
            "ending session {} failed ({}), will retry",
            action["log_id"],
            text(&action["kind"])
        ),
        _ => "no change".to_string(),
    };
    format!("{}; {}", what, belief(&data["belief"]))
}

fn belief(data: &Value) -> String {
    match data["state"].as_str() {
        Some("present") => format!("at home (session {})", data["log_id"]),
        _ => "away".to_string(),
    }
}

fn weekly(view: &WeeklyView) -> String {
    let mut lines = vec![format!("week {} .. {}", view.week_start, view.week_end)];
    for (day, hours) in &view.daily_hours {
        lines.push(format!("  {}  {:>5.1} h", day, hours));
    }
    lines.push(format!(
        "total {:.1} h, average {:.1} h/day",
        view.weekly_total, view.weekly_average
    ));
    lines.join("\n")
}

fn text(value: &Value) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}

fn local_time(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
}
