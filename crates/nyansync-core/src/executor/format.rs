//! Text helpers for run logs and the stored account summary

use crate::traits::{DeviceGroup, TrafficStatistic, UserInfo};
use jiff::Timestamp;
use std::net::Ipv4Addr;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Multi-line account summary
pub fn format_user_info(info: &UserInfo) -> Vec<String> {
    let expires = match info.expire {
        ms if ms > 0 => Timestamp::from_millisecond(ms)
            .map(|ts| ts.strftime("%Y/%m/%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| format!("invalid ({})", ms)),
        _ => "never".to_string(),
    };

    vec![
        format!("Username: {}", or_unknown(info.username.as_deref())),
        format!("Group: {}", or_unknown(info.group_name.as_deref())),
        format!("Plan: {}", or_unknown(info.plan_name.as_deref())),
        format!("Expires: {}", expires),
        format!("Renewal price: {}", display_amount(info.renew_price.as_ref())),
        format!(
            "Traffic: {:.2} GiB / {:.2} GiB",
            info.traffic_used / GIB,
            info.traffic_enable.unwrap_or(0.0) / GIB
        ),
        format!("Max rules: {}", info.max_rules),
        format!("Speed limit: {} Mbps", (info.speed_limit / 1_000_000.0 * 8.0).round() as i64),
        format!("Balance: {}", display_amount(info.balance.as_ref())),
    ]
}

/// Today's and yesterday's traffic
pub fn format_traffic(stat: &TrafficStatistic) -> Vec<String> {
    vec![
        format!("Traffic today: {}", format_bytes(stat.traffic_today)),
        format!("Traffic yesterday: {}", format_bytes(stat.traffic_yesterday)),
    ]
}

/// Human-readable byte count (KiB, MiB or GiB, two decimals)
pub fn format_bytes(bytes: f64) -> String {
    if bytes < MIB {
        format!("{:.2} KiB", bytes / KIB)
    } else if bytes < GIB {
        format!("{:.2} MiB", bytes / MIB)
    } else {
        format!("{:.2} GiB", bytes / GIB)
    }
}

/// First valid IPv4 address appearing in free-form text
///
/// `connect_host` values look like `1.2.3.4`, `hk.example.com,1.2.3.4` or
/// `1.2.3.4:443`.
pub fn first_ipv4(text: &str) -> Option<Ipv4Addr> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter_map(|token| {
            let octets: Vec<&str> = token.trim_matches('.').split('.').take(4).collect();
            if octets.len() == 4 {
                octets.join(".").parse().ok()
            } else {
                None
            }
        })
        .next()
}

/// Address to publish: first IPv4 of the primary inbound device group
pub fn primary_inbound_ip(groups: &[DeviceGroup], primary_id: i64) -> Result<Ipv4Addr, String> {
    let group = groups
        .iter()
        .find(|g| g.id == primary_id)
        .ok_or_else(|| format!("device group {} not found", primary_id))?;

    let host = group
        .connect_host
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| format!("device group {} has no connect_host", primary_id))?;

    first_ipv4(host).ok_or_else(|| {
        format!(
            "device group {} connect_host '{}' contains no IPv4 address",
            primary_id, host
        )
    })
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("unknown")
}

fn display_amount(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "0".to_string(),
        Some(other) => other.to_string(),
    }
}
