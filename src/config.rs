use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{FixedOffset, NaiveTime};

use crate::cutoff::CutoffPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub utc_offset: FixedOffset,
    pub cutoff_time: NaiveTime,
    pub tick_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_path: env::var("CANTEEN_DB_PATH")
                .unwrap_or_else(|_| "canteen.db".into())
                .into(),
            utc_offset: parse_offset(
                &env::var("CANTEEN_UTC_OFFSET").unwrap_or_else(|_| "+05:30".into()),
            )?,
            cutoff_time: NaiveTime::parse_from_str(
                &env::var("CANTEEN_CUTOFF").unwrap_or_else(|_| "21:00".into()),
                "%H:%M",
            )
            .map_err(|e| anyhow::anyhow!("CANTEEN_CUTOFF must look like 21:00: {e}"))?,
            tick_interval: parse_tick_ms(
                &env::var("CANTEEN_TICK_MS").unwrap_or_else(|_| "1000".into()),
            )?,
        })
    }

    pub fn cutoff_policy(&self) -> CutoffPolicy {
        CutoffPolicy::new(self.utc_offset, self.cutoff_time)
    }
}

pub fn parse_tick_ms(raw: &str) -> anyhow::Result<Duration> {
    let millis: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("CANTEEN_TICK_MS must be a whole number of milliseconds, got {raw:?}"))?;
    if millis == 0 {
        anyhow::bail!("CANTEEN_TICK_MS must be greater than zero");
    }
    Ok(Duration::from_millis(millis))
}

/// Parse "+05:30", "-04:00" or "Z".
pub fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow::anyhow!("bad UTC offset"));
    }

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        anyhow::bail!("UTC offset must start with + or -: {raw}");
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse()?;
    let minutes: i32 = minutes.parse()?;
    if !(0..60).contains(&minutes) {
        anyhow::bail!("UTC offset minutes out of range: {raw}");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("UTC offset out of range: {raw}"))
}
