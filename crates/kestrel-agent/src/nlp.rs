//! Deterministic natural-language parsing for the reminder/weather fallback.
//!
//! When the model refuses to call a required tool, the loop falls back to
//! these parsers to build the tool arguments itself. Everything here is
//! plain regex over lowercase text — no model involvement — covering
//! English, Indonesian, Malay, Thai, and Chinese phrasing.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

// ─────────────────────────────────────────────
// Relative / absolute time
// ─────────────────────────────────────────────

/// (pattern, milliseconds per unit). Order matters: Indonesian and Malay
/// unit words must match before the English `min`/`sec` prefixes do.
static RELATIVE_PATTERNS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    let specs: &[(&str, i64)] = &[
        // Indonesian
        (r"(?i)(\d+)\s*menit", 60_000),
        (r"(?i)(\d+)\s*jam", 3_600_000),
        (r"(?i)(\d+)\s*detik", 1_000),
        (r"(?i)(\d+)\s*hari", 86_400_000),
        // Malay
        (r"(?i)(\d+)\s*minit", 60_000),
        (r"(?i)(\d+)\s*saat", 1_000),
        // English
        (r"(?i)(?:in\s+)?(\d+)\s*min(?:ute)?s?", 60_000),
        (r"(?i)(?:in\s+)?(\d+)\s*hours?", 3_600_000),
        (r"(?i)(?:in\s+)?(\d+)\s*sec(?:ond)?s?", 1_000),
        (r"(?i)(?:in\s+)?(\d+)\s*days?", 86_400_000),
        // Thai
        (r"(\d+)\s*นาที", 60_000),
        (r"(\d+)\s*ชั่วโมง", 3_600_000),
        (r"(\d+)\s*วินาที", 1_000),
        (r"(\d+)\s*วัน", 86_400_000),
        // Chinese
        (r"(\d+)\s*分钟(?:后)?", 60_000),
        (r"(\d+)\s*(?:小时|小時)(?:后)?", 3_600_000),
        (r"(\d+)\s*秒(?:后)?", 1_000),
        (r"(\d+)\s*天(?:后)?", 86_400_000),
    ];
    specs
        .iter()
        .map(|(p, ms)| (Regex::new(p).unwrap(), *ms))
        .collect()
});

/// Parse a relative time phrase ("5 menit", "in 2 hours", "3 分钟后") into a
/// millisecond offset from now.
pub fn parse_relative_time_ms(text: &str) -> Option<i64> {
    for (re, unit_ms) in RELATIVE_PATTERNS.iter() {
        if let Some(caps) = re.captures(text) {
            let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
            return Some(amount * unit_ms);
        }
    }
    None
}

/// Parse an ISO-8601 or `YYYY-MM-DD HH:MM` string into epoch milliseconds
/// (interpreted in local time when no offset is present).
pub fn parse_absolute_time_ms(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&value.replace("Z", "+00:00")) {
            return Some(dt.timestamp_millis());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
            return local_millis(naive);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
            return local_millis(naive);
        }
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
        return local_millis(naive);
    }
    None
}

fn local_millis(naive: NaiveDateTime) -> Option<i64> {
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}

/// Parse `HH`, `HH:MM`, or `HH.MM` into (hour, minute).
pub fn parse_time_token(token: &str) -> Option<(u32, u32)> {
    let raw = token.trim();
    if raw.is_empty() {
        return None;
    }

    let normalized = raw.replace('.', ":");
    let (hour, minute) = match normalized.split_once(':') {
        Some((h, m)) => (h.parse().ok()?, m.parse().ok()?),
        None => (normalized.parse().ok()?, 0),
    };

    if hour <= 23 && minute <= 59 {
        Some((hour, minute))
    } else {
        None
    }
}

// ─────────────────────────────────────────────
// Weather location
// ─────────────────────────────────────────────

static LOCATION_AFTER_PREP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:di|in)\s+([a-zA-Z][\w\s\-,'\.]{1,80})").unwrap());

static LOCATION_TIME_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(right now|hari ini|today|saat ini|sekarang|now|right|berapa|how much)\b")
        .unwrap()
});

static WEATHER_CHATTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tolong|please|cek|check|semak|cuaca|weather|suhu|temperature|forecast|prakiraan|ramalan|hari ini|today|right now|sekarang|now|dong|ya|esok|berapa|how much|what is|what's|saat ini|right)\b|天气|气温|温度|预报|今天|现在|怎么样|如何|请|อากาศ|อุณหภูมิ|พยากรณ์|วันนี้|ตอนนี้|ช่วย|หน่อย|ครับ|ค่ะ",
    )
    .unwrap()
});

static LOCATION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:kota|city|kabupaten|regency|district|county|municipality|province|provinsi)\b$")
        .unwrap()
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn tidy_location(value: &str) -> String {
    let cleaned = LOCATION_SUFFIX.replace_all(value.trim_matches(trim_set), "");
    let collapsed = MULTI_SPACE.replace_all(cleaned.trim_matches(trim_set), " ");
    collapsed.trim_matches(trim_set).to_string()
}

fn trim_set(c: char) -> bool {
    matches!(c, ' ' | '.' | ',' | '!' | '?' | ':' | ';')
}

fn capitalize_words(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the probable location from a weather question.
///
/// Tries the phrase after "di"/"in" first, then falls back to whatever
/// survives stripping weather chatter from the whole message. May return
/// `None` when nothing plausible remains.
pub fn extract_weather_location(question: &str) -> Option<String> {
    let text = question.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = LOCATION_AFTER_PREP.captures(text) {
        let candidate = caps.get(1).unwrap().as_str();
        let candidate = LOCATION_TIME_WORDS.replace_all(candidate, "");
        let candidate = tidy_location(&candidate);
        if !candidate.is_empty() {
            return Some(capitalize_words(&candidate));
        }
    }

    let candidate = WEATHER_CHATTER.replace_all(text, " ");
    let candidate = tidy_location(&candidate);
    if candidate.is_empty() {
        None
    } else {
        Some(capitalize_words(&candidate))
    }
}

// ─────────────────────────────────────────────
// Reminder message
// ─────────────────────────────────────────────

static REMINDER_LEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(tolong|please)\s+").unwrap());

static REMINDER_IMPERATIVES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(remind(?: me)?(?: to)?|ingatkan(?: saya)?(?: untuk)?|buat(?:kan)? pengingat|pengingat|set(?: sekarang)?)\b",
    )
    .unwrap()
});

static REMINDER_RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:dalam|in)?\s*\d+\s*(menit|jam|detik|hari|min(?:ute)?s?|hours?|sec(?:ond)?s?|days?)\b(?:\s+lagi)?",
    )
    .unwrap()
});

static REMINDER_INTERVAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap|tiap|every)\s+\d+\s*(detik|menit|jam|hari|sec(?:ond)?s?|min(?:ute)?s?|hours?|days?)\b(?:\s+sekali)?",
    )
    .unwrap()
});

static REMINDER_DAILY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap\s+hari|tiap\s+hari|every\s+day|daily)\b(?:\s*(?:jam|pukul|at))?\s*\d{1,2}(?::\d{2})?",
    )
    .unwrap()
});

static REMINDER_WEEKLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap|tiap|every)\s+(?:senin|selasa|rabu|kamis|jumat|sabtu|minggu|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b(?:\s*(?:jam|pukul|at))?\s*\d{1,2}(?::\d{2})?",
    )
    .unwrap()
});

static REMINDER_TRAILERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(lagi|from now|sekarang|now)\b").unwrap());

/// Extract the reminder payload text: strip imperatives and temporal
/// markers, cap at 180 characters, default to "Reminder".
pub fn extract_reminder_message(question: &str) -> String {
    let text = question.trim();
    if text.is_empty() {
        return "Reminder".to_string();
    }

    let text = REMINDER_LEAD.replace(text, "");
    let text = REMINDER_IMPERATIVES.replace_all(&text, " ");
    let text = REMINDER_RELATIVE.replace_all(&text, " ");
    let text = REMINDER_INTERVAL.replace_all(&text, " ");
    let text = REMINDER_DAILY.replace_all(&text, " ");
    let text = REMINDER_WEEKLY.replace_all(&text, " ");
    let text = REMINDER_TRAILERS.replace_all(&text, " ");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = text.trim_matches(trim_set);

    if text.is_empty() {
        return "Reminder".to_string();
    }
    if text.chars().count() > 180 {
        let capped: String = text.chars().take(180).collect();
        capped.trim_end().to_string()
    } else {
        text.to_string()
    }
}

// ─────────────────────────────────────────────
// Recurring schedules
// ─────────────────────────────────────────────

/// A recurring schedule extracted from natural language. Exactly one of
/// `every_seconds` / `cron_expr` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub every_seconds: Option<u64>,
    pub cron_expr: Option<String>,
}

static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap|tiap|every)\s+(\d+)\s*(detik|menit|jam|hari|sec(?:ond)?s?|min(?:ute)?s?|hours?|days?)\b",
    )
    .unwrap()
});

static DAILY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap\s+hari|tiap\s+hari|every\s+day|daily)\b(?:\s*(?:jam|pukul|at))?\s*(\d{1,2})(?::(\d{2}))?",
    )
    .unwrap()
});

static WEEKLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:setiap|tiap|every)\s+(senin|selasa|rabu|kamis|jumat|sabtu|minggu|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b(?:\s*(?:jam|pukul|at))?\s*(\d{1,2})(?::(\d{2}))?",
    )
    .unwrap()
});

fn weekday_number(name: &str) -> Option<u32> {
    match name {
        "minggu" | "sunday" => Some(0),
        "senin" | "monday" => Some(1),
        "selasa" | "tuesday" => Some(2),
        "rabu" | "wednesday" => Some(3),
        "kamis" | "thursday" => Some(4),
        "jumat" | "friday" => Some(5),
        "sabtu" | "saturday" => Some(6),
        _ => None,
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    let unit = unit.to_lowercase();
    if unit.starts_with("detik") || unit.starts_with("sec") {
        Some(1)
    } else if unit.starts_with("menit") || unit.starts_with("min") {
        Some(60)
    } else if unit.starts_with("jam") || unit.starts_with("hour") {
        Some(3_600)
    } else if unit.starts_with("hari") || unit.starts_with("day") {
        Some(86_400)
    } else {
        None
    }
}

/// Extract a recurring schedule: `every N unit` → interval seconds,
/// `every day at HH[:MM]` → daily cron, weekday + time → weekly cron.
pub fn extract_recurring_schedule(question: &str) -> Option<RecurringSchedule> {
    let text = question.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = INTERVAL_RE.captures(text) {
        let amount: u64 = caps.get(1).unwrap().as_str().parse().ok()?;
        if amount > 0 {
            if let Some(mult) = unit_seconds(caps.get(2).unwrap().as_str()) {
                return Some(RecurringSchedule {
                    every_seconds: Some(amount * mult),
                    cron_expr: None,
                });
            }
        }
    }

    if let Some(caps) = DAILY_RE.captures(text) {
        let hour: u32 = caps.get(1).unwrap().as_str().parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
        if hour <= 23 && minute <= 59 {
            return Some(RecurringSchedule {
                every_seconds: None,
                cron_expr: Some(format!("{minute} {hour} * * *")),
            });
        }
    }

    if let Some(caps) = WEEKLY_RE.captures(text) {
        let day = weekday_number(&caps.get(1).unwrap().as_str().to_lowercase())?;
        let hour: u32 = caps.get(2).unwrap().as_str().parse().ok()?;
        let minute: u32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
        if hour <= 23 && minute <= 59 {
            return Some(RecurringSchedule {
                every_seconds: None,
                cron_expr: Some(format!("{minute} {hour} * * {day}")),
            });
        }
    }

    None
}

// ─────────────────────────────────────────────
// Cycle schedules (work/off shift blocks)
// ─────────────────────────────────────────────

/// One concrete scheduled firing inside a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleEvent {
    /// Local naive ISO timestamp (`YYYY-MM-DDTHH:MM:SS`).
    pub start_at: String,
    pub message: String,
}

/// A repeating work/off cycle: `period_days` is the full cycle length, and
/// `events` are the concrete firings for the first period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleSchedule {
    pub period_days: u32,
    pub events: Vec<CycleEvent>,
}

static CYCLE_CONNECTORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:setelah itu|setelahnya|lalu|kemudian|dan besoknya|besoknya|terus)\b|[,;]")
        .unwrap()
});

static DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s*hari\b").unwrap());

static TIME_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2}(?:[:.]\d{2})?)\s*(?:-|sampai|hingga|to)\s*(\d{1,2}(?:[:.]\d{2})?)")
        .unwrap()
});

static TIME_SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:jam|pukul|at)\s*(\d{1,2}(?:[:.]\d{2})?)").unwrap());

static TIME_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}(?:[:.]\d{2})?)\b").unwrap());

static LABEL_RANGE_STRIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:jam|pukul|at)?\s*\d{1,2}(?:[:.]\d{2})?\s*(?:-|sampai|hingga|to)\s*\d{1,2}(?:[:.]\d{2})?",
    )
    .unwrap()
});

static LABEL_TIME_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:jam|pukul|at)\s*\d{1,2}(?:[:.]\d{2})?\b").unwrap());

static LABEL_DURATION_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:selama|for)\s*\d+\s*hari\b").unwrap());

static LABEL_KEYWORD_STRIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:ingatkan saya|ingatkan|jadwalkan|masuk|shift|kerja|hari ini|besok|tomorrow|lusa|berulang|repeat|terus)\b",
    )
    .unwrap()
});

static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap());
static DMY_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2})[/-](\d{2})[/-](\d{4})\b").unwrap());

#[derive(Debug)]
enum Segment {
    Work {
        days: u32,
        label: String,
        start: (u32, u32),
        end: Option<(u32, u32)>,
    },
    Off {
        days: u32,
    },
}

/// Resolve the cycle anchor date (local midnight) from hints in the text:
/// explicit ISO / DD-MM-YYYY dates, `lusa` (day after tomorrow), `besok` /
/// `tomorrow`, else today.
pub fn extract_cycle_anchor_date(question: &str, now: DateTime<Local>) -> DateTime<Local> {
    let lowered = question.to_lowercase();
    let midnight = |date: NaiveDate| {
        Local
            .from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
            .single()
            .unwrap_or(now)
    };

    if let Some(caps) = ISO_DATE_RE.captures(&lowered) {
        if let Ok(date) = NaiveDate::parse_from_str(caps.get(1).unwrap().as_str(), "%Y-%m-%d") {
            return midnight(date);
        }
    }
    if let Some(caps) = DMY_DATE_RE.captures(&lowered) {
        let day: u32 = caps.get(1).unwrap().as_str().parse().unwrap_or(1);
        let month: u32 = caps.get(2).unwrap().as_str().parse().unwrap_or(1);
        let year: i32 = caps.get(3).unwrap().as_str().parse().unwrap_or(now.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return midnight(date);
        }
    }

    let today = now.date_naive();
    if lowered.contains("lusa") {
        return midnight(today.checked_add_days(Days::new(2)).unwrap_or(today));
    }
    if lowered.contains("besok") || lowered.contains("tomorrow") {
        return midnight(today.checked_add_days(Days::new(1)).unwrap_or(today));
    }
    midnight(today)
}

/// Extract a composite work/off cycle ("masuk malam jam 00:00-08:00 selama
/// 3 hari, setelah itu libur 1 hari, ..., berulang").
pub fn extract_cycle_schedule(question: &str, now: DateTime<Local>) -> Option<CycleSchedule> {
    let text = question.trim();
    if text.is_empty() {
        return None;
    }

    let lowered = text.to_lowercase();
    if !lowered.contains("selama") {
        return None;
    }
    if !["libur", "berulang", "repeat", "cycle", "siklus"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        return None;
    }

    let chunks: Vec<&str> = CYCLE_CONNECTORS
        .split(text)
        .map(|c| c.trim_matches(trim_set))
        .filter(|c| !c.is_empty())
        .collect();
    if chunks.is_empty() {
        return None;
    }

    let mut segments: Vec<Segment> = Vec::new();
    for chunk in chunks {
        let chunk_lower = chunk.to_lowercase();

        if chunk_lower.contains("libur") {
            let days = DAYS_RE
                .captures(chunk)
                .and_then(|c| c.get(1).unwrap().as_str().parse().ok())
                .unwrap_or(1);
            if days > 0 {
                segments.push(Segment::Off { days });
            }
            continue;
        }

        let Some(days) = DAYS_RE
            .captures(chunk)
            .and_then(|c| c.get(1).unwrap().as_str().parse::<u32>().ok())
        else {
            continue;
        };
        if days == 0 {
            continue;
        }

        let (start, end) = if let Some(caps) = TIME_RANGE_RE.captures(chunk) {
            (
                parse_time_token(caps.get(1).unwrap().as_str()),
                parse_time_token(caps.get(2).unwrap().as_str()),
            )
        } else if let Some(caps) = TIME_SINGLE_RE.captures(chunk) {
            (parse_time_token(caps.get(1).unwrap().as_str()), None)
        } else if let Some(caps) = TIME_BARE_RE.captures(chunk) {
            (parse_time_token(caps.get(1).unwrap().as_str()), None)
        } else {
            (None, None)
        };

        let Some(start) = start else { continue };

        let label = LABEL_RANGE_STRIP.replace_all(chunk, " ");
        let label = LABEL_TIME_STRIP.replace_all(&label, " ");
        let label = LABEL_DURATION_STRIP.replace_all(&label, " ");
        let label = LABEL_KEYWORD_STRIP.replace_all(&label, " ");
        let label = MULTI_SPACE.replace_all(&label, " ");
        let label = label.trim_matches(trim_set);
        let label = if label.is_empty() {
            "Reminder".to_string()
        } else {
            label.to_string()
        };

        segments.push(Segment::Work {
            days,
            label,
            start,
            end,
        });
    }

    if segments.is_empty() {
        return None;
    }

    let period_days: u32 = segments
        .iter()
        .map(|s| match s {
            Segment::Work { days, .. } | Segment::Off { days } => *days,
        })
        .sum();
    if period_days < 2 {
        return None;
    }
    if !segments.iter().any(|s| matches!(s, Segment::Work { .. })) {
        return None;
    }

    let anchor = extract_cycle_anchor_date(text, now);
    let mut events: Vec<CycleEvent> = Vec::new();
    let mut day_offset: u64 = 0;

    for segment in &segments {
        match segment {
            Segment::Off { days } => day_offset += *days as u64,
            Segment::Work {
                days,
                label,
                start,
                end,
            } => {
                let (start_h, start_m) = *start;
                for idx in 0..*days as u64 {
                    let run_date = anchor
                        .date_naive()
                        .checked_add_days(Days::new(day_offset + idx))?;
                    let start_dt = run_date.and_hms_opt(start_h, start_m, 0)?;

                    match end {
                        Some((end_h, end_m)) => {
                            let mut end_dt = run_date.and_hms_opt(*end_h, *end_m, 0)?;
                            if end_dt <= start_dt {
                                end_dt = run_date
                                    .checked_add_days(Days::new(1))?
                                    .and_hms_opt(*end_h, *end_m, 0)?;
                            }
                            let window = format!(
                                "{start_h:02}:{start_m:02}-{end_h:02}:{end_m:02}",
                                end_h = end_h,
                                end_m = end_m
                            );
                            events.push(CycleEvent {
                                start_at: start_dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
                                message: format!("{label} mulai ({window})"),
                            });
                            events.push(CycleEvent {
                                start_at: end_dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
                                message: format!("{label} selesai ({window})"),
                            });
                        }
                        None => {
                            events.push(CycleEvent {
                                start_at: start_dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
                                message: label.clone(),
                            });
                        }
                    }
                }
                day_offset += *days as u64;
            }
        }
    }

    if events.is_empty() {
        return None;
    }

    Some(CycleSchedule {
        period_days,
        events,
    })
}

// ─────────────────────────────────────────────
// Titles and group ids
// ─────────────────────────────────────────────

static EXPLICIT_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:judul|title|nama jadwal|schedule name)\b\s*[:=]?\s*["']?([^"',;\n]+)"#)
        .unwrap()
});

static NEW_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:ubah judul|rename to|rename|judul baru|new title)\b(?:\s+grp_[a-z0-9_-]+)?\s*(?:jadi|to)\s*["']?([^"',;\n]+)"#,
    )
    .unwrap()
});

static NEW_TITLE_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:ubah judul|rename to|rename|judul baru|new title)\b\s*[:=]\s*["']?([^"',;\n]+)"#,
    )
    .unwrap()
});

static NON_SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Extract an explicit schedule title ("judul: Piket Malam").
pub fn extract_explicit_schedule_title(question: &str) -> Option<String> {
    let caps = EXPLICIT_TITLE_RE.captures(question.trim())?;
    let title = MULTI_SPACE.replace_all(caps.get(1).unwrap().as_str(), " ");
    let title = title.trim_matches(trim_set);
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Extract the rename target ("ubah judul jadi Shift Baru").
pub fn extract_new_schedule_title(question: &str) -> Option<String> {
    let text = question.trim();
    let caps = NEW_TITLE_RE
        .captures(text)
        .or_else(|| NEW_TITLE_ASSIGN_RE.captures(text))?;
    let title = MULTI_SPACE.replace_all(caps.get(1).unwrap().as_str(), " ");
    let title = title.trim_matches(trim_set);
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Make `base_title` unique against `existing` titles (case-insensitive),
/// appending " (2)", " (3)", ... as needed.
pub fn make_unique_schedule_title<'a, I>(base_title: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let base = MULTI_SPACE.replace_all(base_title.trim(), " ").to_string();
    let base = if base.is_empty() {
        "Schedule".to_string()
    } else {
        base
    };

    let existing_lower: Vec<String> = existing
        .into_iter()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();

    if !existing_lower.contains(&base.to_lowercase()) {
        return base;
    }

    let mut idx = 2;
    loop {
        let candidate = format!("{base} ({idx})");
        if !existing_lower.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        idx += 1;
    }
}

/// Build a stable-ish group id from a title slug plus a timestamp suffix.
pub fn build_group_id(title: &str, now_ms: i64) -> String {
    let slug = NON_SLUG_RE
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    let slug = if slug.is_empty() {
        "schedule".to_string()
    } else {
        slug.chars().take(24).collect()
    };
    format!("grp_{slug}_{:06}", now_ms.rem_euclid(1_000_000))
}

/// Build a human-friendly unique title for a cycle schedule.
pub fn build_cycle_title<'a, I>(question: &str, period_days: u32, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(explicit) = extract_explicit_schedule_title(question) {
        return make_unique_schedule_title(&explicit, existing);
    }

    let lowered = question.to_lowercase();
    let base = if ["shift", "pagi", "sore", "malam", "masuk"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        format!("Shift Cycle {period_days} Hari")
    } else {
        format!("Reminder Cycle {period_days} Hari")
    };
    make_unique_schedule_title(&base, existing)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2026, 3, 10)
                    .unwrap()
                    .and_hms_opt(9, 30, 0)
                    .unwrap(),
            )
            .single()
            .unwrap()
    }

    // ── Relative / absolute time ──

    #[test]
    fn test_relative_indonesian() {
        assert_eq!(parse_relative_time_ms("ingatkan 2 menit lagi makan"), Some(120_000));
        assert_eq!(parse_relative_time_ms("3 jam lagi"), Some(10_800_000));
        assert_eq!(parse_relative_time_ms("45 detik"), Some(45_000));
    }

    #[test]
    fn test_relative_english() {
        assert_eq!(parse_relative_time_ms("in 30 minutes"), Some(1_800_000));
        assert_eq!(parse_relative_time_ms("remind me in 2 hours"), Some(7_200_000));
        assert_eq!(parse_relative_time_ms("in 10 secs"), Some(10_000));
    }

    #[test]
    fn test_relative_malay_thai_chinese() {
        assert_eq!(parse_relative_time_ms("5 minit lagi"), Some(300_000));
        assert_eq!(parse_relative_time_ms("อีก 10 นาที"), Some(600_000));
        assert_eq!(parse_relative_time_ms("15 分钟后提醒我"), Some(900_000));
    }

    #[test]
    fn test_relative_none() {
        assert_eq!(parse_relative_time_ms("no time words here"), None);
    }

    #[test]
    fn test_absolute_time_formats() {
        assert!(parse_absolute_time_ms("2026-05-01T08:30:00Z").is_some());
        assert!(parse_absolute_time_ms("2026-05-01T08:30:00+07:00").is_some());
        assert!(parse_absolute_time_ms("2026-05-01 08:30").is_some());
        assert!(parse_absolute_time_ms("not a date").is_none());
    }

    #[test]
    fn test_parse_time_token() {
        assert_eq!(parse_time_token("08:30"), Some((8, 30)));
        assert_eq!(parse_time_token("8.15"), Some((8, 15)));
        assert_eq!(parse_time_token("23"), Some((23, 0)));
        assert_eq!(parse_time_token("24:00"), None);
        assert_eq!(parse_time_token("12:75"), None);
        assert_eq!(parse_time_token(""), None);
    }

    // ── Weather location ──

    #[test]
    fn test_weather_location_after_di() {
        assert_eq!(
            extract_weather_location("berapa suhu di Cilacap sekarang").as_deref(),
            Some("Cilacap")
        );
    }

    #[test]
    fn test_weather_location_after_in() {
        assert_eq!(
            extract_weather_location("what's the weather in new york right now").as_deref(),
            Some("New York")
        );
    }

    #[test]
    fn test_weather_location_residual() {
        assert_eq!(
            extract_weather_location("cuaca jakarta hari ini dong").as_deref(),
            Some("Jakarta")
        );
    }

    #[test]
    fn test_weather_location_strips_admin_suffix() {
        assert_eq!(
            extract_weather_location("cuaca di bandung kota").as_deref(),
            Some("Bandung")
        );
    }

    #[test]
    fn test_weather_location_empty() {
        assert_eq!(extract_weather_location("cuaca hari ini"), None);
        assert_eq!(extract_weather_location(""), None);
    }

    // ── Reminder message ──

    #[test]
    fn test_reminder_message_strips_markers() {
        assert_eq!(extract_reminder_message("ingatkan 2 menit lagi makan"), "makan");
        assert_eq!(
            extract_reminder_message("remind me to stretch in 30 minutes"),
            "stretch"
        );
        assert_eq!(
            extract_reminder_message("tolong ingatkan saya untuk minum obat 1 jam lagi"),
            "minum obat"
        );
    }

    #[test]
    fn test_reminder_message_defaults() {
        assert_eq!(extract_reminder_message(""), "Reminder");
        assert_eq!(extract_reminder_message("ingatkan 5 menit lagi"), "Reminder");
    }

    #[test]
    fn test_reminder_message_caps_at_180() {
        let long = format!("remind me to {}", "x".repeat(400));
        assert!(extract_reminder_message(&long).chars().count() <= 180);
    }

    // ── Recurring schedules ──

    #[test]
    fn test_interval_schedule() {
        let schedule = extract_recurring_schedule("cek server setiap 5 menit").unwrap();
        assert_eq!(schedule.every_seconds, Some(300));
        assert!(schedule.cron_expr.is_none());

        let schedule = extract_recurring_schedule("every 2 hours ping me").unwrap();
        assert_eq!(schedule.every_seconds, Some(7_200));
    }

    #[test]
    fn test_daily_schedule() {
        let schedule = extract_recurring_schedule("setiap hari jam 07:30 sarapan").unwrap();
        assert_eq!(schedule.cron_expr.as_deref(), Some("30 7 * * *"));

        let schedule = extract_recurring_schedule("every day at 9").unwrap();
        assert_eq!(schedule.cron_expr.as_deref(), Some("0 9 * * *"));
    }

    #[test]
    fn test_weekly_schedule() {
        let schedule = extract_recurring_schedule("setiap senin jam 08:00 standup").unwrap();
        assert_eq!(schedule.cron_expr.as_deref(), Some("0 8 * * 1"));

        let schedule = extract_recurring_schedule("every friday at 17:30").unwrap();
        assert_eq!(schedule.cron_expr.as_deref(), Some("30 17 * * 5"));
    }

    #[test]
    fn test_no_recurring_schedule() {
        assert!(extract_recurring_schedule("just a plain sentence").is_none());
    }

    // ── Cycle schedules ──

    const SHIFT_CYCLE: &str = "ingatkan hari ini masuk malam jam 00:00-08:00 selama 3 hari, \
         setelah itu libur 1 hari, masuk sore jam 16:00-00:00 selama 3 hari, \
         setelah itu libur 1 hari, masuk pagi jam 08:00-16:00 selama 3 hari, \
         setelah itu libur 1 hari, berulang terus";

    #[test]
    fn test_cycle_schedule_shift_pattern() {
        let cycle = extract_cycle_schedule(SHIFT_CYCLE, fixed_now()).unwrap();
        assert_eq!(cycle.period_days, 12);
        // 9 work days, each with a start and an end event.
        assert_eq!(cycle.events.len(), 18);

        // First event: night shift start at today's midnight.
        assert_eq!(cycle.events[0].start_at, "2026-03-10T00:00:00");
        assert!(cycle.events[0].message.contains("mulai"));
        assert!(cycle.events[0].message.contains("00:00-08:00"));
        assert_eq!(cycle.events[1].start_at, "2026-03-10T08:00:00");
        assert!(cycle.events[1].message.contains("selesai"));
    }

    #[test]
    fn test_cycle_overnight_end_rolls_to_next_day() {
        let cycle = extract_cycle_schedule(SHIFT_CYCLE, fixed_now()).unwrap();
        // Evening shift days start at offset 4 (3 work + 1 off).
        let evening_start = &cycle.events[6];
        assert_eq!(evening_start.start_at, "2026-03-14T16:00:00");
        let evening_end = &cycle.events[7];
        assert_eq!(evening_end.start_at, "2026-03-15T00:00:00");
    }

    #[test]
    fn test_cycle_anchor_tomorrow() {
        let text = "mulai besok masuk jam 08:00 selama 2 hari, libur 1 hari, berulang";
        let cycle = extract_cycle_schedule(text, fixed_now()).unwrap();
        assert_eq!(cycle.period_days, 3);
        assert!(cycle.events[0].start_at.starts_with("2026-03-11"));
    }

    #[test]
    fn test_cycle_anchor_explicit_iso_date() {
        let now = fixed_now();
        let anchor = extract_cycle_anchor_date("mulai 2026-04-01 masuk pagi", now);
        assert_eq!(anchor.date_naive().to_string(), "2026-04-01");
    }

    #[test]
    fn test_cycle_anchor_dmy_and_lusa() {
        let now = fixed_now();
        let anchor = extract_cycle_anchor_date("jadwal 01-04-2026", now);
        assert_eq!(anchor.date_naive().to_string(), "2026-04-01");
        let anchor = extract_cycle_anchor_date("mulai lusa", now);
        assert_eq!(anchor.date_naive().to_string(), "2026-03-12");
    }

    #[test]
    fn test_cycle_requires_selama_and_repeat_marker() {
        assert!(extract_cycle_schedule("masuk jam 8 selama 3 hari", fixed_now()).is_none());
        assert!(extract_cycle_schedule("libur 1 hari berulang", fixed_now()).is_none());
    }

    #[test]
    fn test_cycle_start_only_events() {
        let text = "masuk jam 07:00 selama 2 hari, setelah itu libur 2 hari, berulang";
        let cycle = extract_cycle_schedule(text, fixed_now()).unwrap();
        assert_eq!(cycle.period_days, 4);
        assert_eq!(cycle.events.len(), 2);
        assert!(!cycle.events[0].message.contains("mulai"));
    }

    // ── Titles and group ids ──

    #[test]
    fn test_explicit_title() {
        assert_eq!(
            extract_explicit_schedule_title("buat jadwal judul: Piket Malam tiap hari").as_deref(),
            Some("Piket Malam tiap hari")
        );
        assert!(extract_explicit_schedule_title("no title here").is_none());
    }

    #[test]
    fn test_new_title() {
        assert_eq!(
            extract_new_schedule_title("ubah judul grp_abc_123 jadi Piket Baru").as_deref(),
            Some("Piket Baru")
        );
        assert_eq!(
            extract_new_schedule_title("rename to Night Watch").as_deref(),
            Some("Night Watch")
        );
    }

    #[test]
    fn test_unique_title_suffixing() {
        let existing = ["Shift Cycle 12 Hari", "Shift Cycle 12 Hari (2)"];
        let title = make_unique_schedule_title("Shift Cycle 12 Hari", existing.iter().copied());
        assert_eq!(title, "Shift Cycle 12 Hari (3)");
    }

    #[test]
    fn test_unique_title_untouched_when_free() {
        let title = make_unique_schedule_title("Fresh Title", [].iter().copied());
        assert_eq!(title, "Fresh Title");
    }

    #[test]
    fn test_group_id_shape() {
        let id = build_group_id("Shift Cycle 12 Hari", 1_771_234_567_890);
        assert!(id.starts_with("grp_shift-cycle-12-hari_"));
        assert_eq!(id.len(), "grp_shift-cycle-12-hari_".len() + 6);
    }

    #[test]
    fn test_group_id_empty_title() {
        let id = build_group_id("!!!", 42);
        assert!(id.starts_with("grp_schedule_"));
    }

    #[test]
    fn test_cycle_title_shift_detection() {
        let title = build_cycle_title(SHIFT_CYCLE, 12, [].iter().copied());
        assert_eq!(title, "Shift Cycle 12 Hari");
        let title = build_cycle_title("minum vitamin selama 3 hari, libur 1 hari, berulang", 4, [].iter().copied());
        assert_eq!(title, "Reminder Cycle 4 Hari");
    }
}
