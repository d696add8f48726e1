//! Day-by-day, page-by-page walk of the telephony call log.

use crate::call::{deduplicate, CallRecord, RawCall};
use crate::error::{validation_error, Error};
use crate::gateway::telephony::TelephonyClient;
use chrono::NaiveDate;
use log::*;
use serde::Serialize;
use service::config::Config;
use std::time::Duration;
use telephony_auth::token::TokenSource;

/// Safety cap on pages requested for a single day.
pub const MAX_PAGES_PER_DAY: u32 = 1000;

/// Inclusive range of UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if end < start {
            return Err(validation_error(&format!(
                "invalid date range: end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Every day in the range, in chronological order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_size: u32,
    /// Seconds; calls shorter than this are dropped after dedup.
    pub min_duration: u64,
    pub inter_day_delay: Duration,
    pub max_pages_per_day: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: 500,
            min_duration: 0,
            inter_day_delay: Duration::from_secs(1),
            max_pages_per_day: MAX_PAGES_PER_DAY,
        }
    }
}

impl From<&Config> for FetchSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            min_duration: config.min_duration_secs,
            inter_day_delay: config.inter_day_delay(),
            max_pages_per_day: MAX_PAGES_PER_DAY,
        }
    }
}

/// What happened while fetching one day.
#[derive(Debug, Clone, Serialize)]
pub struct DayResult {
    pub date: String,
    pub success: bool,
    pub calls_found: usize,
    pub pages: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub calls: Vec<CallRecord>,
    pub days: Vec<DayResult>,
    /// Normalized records across all successful days, before dedup.
    pub total_raw: usize,
    pub duplicates_removed: usize,
    pub filtered_short: usize,
    /// Raw entries that matched none of the known shapes.
    pub unparseable: usize,
}

struct DayCalls {
    calls: Vec<CallRecord>,
    pages: u32,
    unparseable: usize,
}

/// Fetch, normalize, deduplicate and duration-filter every call in `range`.
///
/// A failing day is recorded in [`FetchOutcome::days`] with zero calls and does
/// not stop the walk. Only an invalid page size or a token that cannot be
/// obtained up front fails the whole operation.
pub async fn fetch_calls<S: TokenSource>(
    client: &TelephonyClient<S>,
    range: &DateRange,
    settings: &FetchSettings,
    on_day: &(dyn Fn(&DayResult) + Sync),
) -> Result<FetchOutcome, Error> {
    if settings.page_size == 0 {
        return Err(validation_error("page size must be at least 1"));
    }
    client.authenticate().await?;

    let mut collected = Vec::new();
    let mut days = Vec::new();
    let mut unparseable = 0;

    for (index, day) in range.days().enumerate() {
        if index > 0 && !settings.inter_day_delay.is_zero() {
            tokio::time::sleep(settings.inter_day_delay).await;
        }

        let result = match fetch_day(client, day, settings).await {
            Ok(day_calls) => {
                info!(
                    "{day}: {} call(s) over {} page(s)",
                    day_calls.calls.len(),
                    day_calls.pages
                );
                unparseable += day_calls.unparseable;
                let result = DayResult {
                    date: day.to_string(),
                    success: true,
                    calls_found: day_calls.calls.len(),
                    pages: day_calls.pages,
                    error: None,
                };
                collected.extend(day_calls.calls);
                result
            }
            Err(e) => {
                warn!("{day}: fetching calls failed: {e}");
                DayResult {
                    date: day.to_string(),
                    success: false,
                    calls_found: 0,
                    pages: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        on_day(&result);
        days.push(result);
    }

    let total_raw = collected.len();
    let unique = deduplicate(collected);
    let duplicates_removed = total_raw - unique.len();

    let before_filter = unique.len();
    let calls: Vec<CallRecord> = unique
        .into_iter()
        .filter(|call| call.duration >= settings.min_duration)
        .collect();
    let filtered_short = before_filter - calls.len();

    info!(
        "Fetched {} call(s): {total_raw} raw, {duplicates_removed} duplicate(s), {filtered_short} too short",
        calls.len()
    );

    Ok(FetchOutcome {
        calls,
        days,
        total_raw,
        duplicates_removed,
        filtered_short,
        unparseable,
    })
}

async fn fetch_day<S: TokenSource>(
    client: &TelephonyClient<S>,
    day: NaiveDate,
    settings: &FetchSettings,
) -> Result<DayCalls, Error> {
    let mut day_calls = DayCalls {
        calls: Vec::new(),
        pages: 0,
        unparseable: 0,
    };

    loop {
        let page_number = day_calls.pages + 1;
        let page = client
            .fetch_call_page(day, page_number, settings.page_size, settings.min_duration)
            .await?;
        day_calls.pages = page_number;

        for entry in &page.result {
            match RawCall::from_value(entry) {
                Ok(raw) => day_calls.calls.push(raw.normalize()),
                Err(e) => {
                    debug!("{day}: skipping unparseable call entry: {e}");
                    day_calls.unparseable += 1;
                }
            }
        }

        if !page.has_more(settings.page_size) {
            break;
        }
        if page_number >= settings.max_pages_per_day {
            warn!("{day}: stopping after {page_number} pages");
            break;
        }
    }

    Ok(day_calls)
}
