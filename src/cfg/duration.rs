//! 人性化时长格式
//!
//! 配置里的刷新间隔、缓存过期时间等统一写成 `"30s"`、`"1m30s"`、`"500ms"`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub use serde_with::{serde_as, DeserializeAs, SerializeAs};

/// 配合 `#[serde_as(as = "HumanDur")]` / `#[serde_as(as = "Option<HumanDur>")]` 使用
pub struct HumanDur;

impl SerializeAs<Duration> for HumanDur {
    fn serialize_as<S>(source: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*source))
    }
}

impl<'de> DeserializeAs<'de, Duration> for HumanDur {
    fn deserialize_as<D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

fn unit_nanos(unit: &str) -> Option<f64> {
    let nanos = match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        "d" => 86400.0 * 1e9,
        _ => return None,
    };
    Some(nanos)
}

/// `"1h30m"` -> Duration
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("empty duration"));
    }

    let mut total_nanos = 0f64;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(anyhow!("expected number in duration: {}", s));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| anyhow!("invalid number in duration: {}", s))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let scale =
            unit_nanos(unit).ok_or_else(|| anyhow!("unknown duration unit '{}' in {}", unit, s))?;
        rest = &rest[unit_end..];

        total_nanos += value * scale;
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Duration -> `"1h30m"`，不足一秒的部分用最大的整除单位表示
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let nanos = duration.subsec_nanos();
    if nanos != 0 {
        let total_nanos = duration.as_nanos();
        return if total_nanos % 1_000_000 == 0 {
            format!("{}ms", total_nanos / 1_000_000)
        } else if total_nanos % 1_000 == 0 {
            format!("{}us", total_nanos / 1_000)
        } else {
            format!("{}ns", total_nanos)
        };
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// garde 自定义规则：配置了的时长必须大于 0
pub fn positive_duration(value: &Option<Duration>, _context: &()) -> garde::Result {
    match value {
        Some(duration) if duration.is_zero() => Err(garde::Error::new("duration must be positive")),
        _ => Ok(()),
    }
}
