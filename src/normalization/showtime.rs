use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Normalized text stored for listings that are always showing.
pub const ONGOING_MARKER: &str = "ongoing";

/// Case-insensitive substrings that mean "no fixed date".
const ONGOING_SENTINELS: &[&str] = &["now playing", "ongoing", "daily"];

/// Last minute of the day; minutes-since-midnight never exceed this.
pub const LAST_MINUTE: u16 = 24 * 60 - 1;

static ISO_DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})").expect("static regex"));
static PAREN_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(([^)]*)\)").expect("static regex"));
static TIME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?:\s*([AaPp])\.?\s*[Mm]\.?)?$").expect("static regex")
});
// "Mon Oct 6", "Oct 6", "Sat, October 11 (7:00 PM)"
static LEGACY_MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]+,?\s+)?([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:\s*\(([^)]*)\))?\s*$")
        .expect("static regex")
});
// "Friday 10, October", "10 October"
static LEGACY_DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]+,?\s+)?(\d{1,2}),?\s+([A-Za-z]{3,9})(?:\s*\(([^)]*)\))?\s*$")
        .expect("static regex")
});

/// One entry of the per-showing list inside the parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Minutes since midnight, `0..=1439`.
    At(u16),
    /// Token that is not a recognizable clock time; kept verbatim.
    Note(String),
}

/// Structured form of a showtime string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Showtime {
    Dated { date: NaiveDate, slots: Vec<Slot> },
    /// Unbounded availability ("Now Playing", "Daily", ...).
    Ongoing,
    /// Text matching no known grammar. Stored as-is; time filtering skips it.
    Unparsed(String),
}

impl Showtime {
    /// Parse a showtime string using the canonical grammar only.
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Some(m) = ISO_DATE_PREFIX.captures(text) {
            if let Ok(date) = NaiveDate::parse_from_str(&m[1], "%Y-%m-%d") {
                let rest = &text[m[0].len()..];
                let slots = PAREN_GROUP
                    .captures(rest)
                    .map(|c| parse_slots(&c[1]))
                    .unwrap_or_default();
                return Showtime::Dated { date, slots };
            }
        }
        if is_ongoing(text) {
            return Showtime::Ongoing;
        }
        Showtime::Unparsed(text.to_string())
    }

    /// Parse with the legacy short-date fallback ("Mon Oct 6", "Friday 10, October").
    ///
    /// `reference` anchors the missing year: the year of `reference` is used,
    /// rolling forward one year when that would land more than 180 days in
    /// the past.
    pub fn parse_with_reference(raw: &str, reference: NaiveDate) -> Self {
        match Self::parse(raw) {
            Showtime::Unparsed(text) => legacy_parse(&text, reference).unwrap_or(Showtime::Unparsed(text)),
            parsed => parsed,
        }
    }

    /// Canonical text form: `YYYY-MM-DD (HH:MM, HH:MM)`, `ongoing`, or the verbatim text.
    pub fn normalized(&self) -> String {
        self.to_string()
    }

    /// Parsed clock times in minutes since midnight, in listing order.
    pub fn times(&self) -> Vec<u16> {
        match self {
            Showtime::Dated { slots, .. } => slots
                .iter()
                .filter_map(|s| match s {
                    Slot::At(m) => Some(*m),
                    Slot::Note(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Showtime::Dated { date, .. } => Some(*date),
            _ => None,
        }
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self, Showtime::Ongoing)
    }

    pub fn is_parsed(&self) -> bool {
        !matches!(self, Showtime::Unparsed(_))
    }

    /// Whether the listing is showing on `day`. Ongoing listings match every day.
    pub fn is_showing_on(&self, day: NaiveDate) -> bool {
        match self {
            Showtime::Dated { date, .. } => *date == day,
            Showtime::Ongoing => true,
            Showtime::Unparsed(_) => false,
        }
    }

    /// Whether there is a showing on `day` starting within `[from, to]` minutes.
    ///
    /// A dated listing without any clock times counts as all-day.
    pub fn has_showing_between(&self, day: NaiveDate, from: u16, to: u16) -> bool {
        match self {
            Showtime::Dated { date, .. } if *date != day => false,
            Showtime::Dated { .. } => {
                let times = self.times();
                times.is_empty() || times.iter().any(|t| (from..=to).contains(t))
            }
            Showtime::Ongoing => true,
            Showtime::Unparsed(_) => false,
        }
    }
}

impl fmt::Display for Showtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Showtime::Dated { date, slots } => {
                write!(f, "{}", date.format("%Y-%m-%d"))?;
                if !slots.is_empty() {
                    let parts: Vec<String> = slots
                        .iter()
                        .map(|s| match s {
                            Slot::At(m) => format!("{:02}:{:02}", m / 60, m % 60),
                            Slot::Note(n) => n.clone(),
                        })
                        .collect();
                    write!(f, " ({})", parts.join(", "))?;
                }
                Ok(())
            }
            Showtime::Ongoing => f.write_str(ONGOING_MARKER),
            Showtime::Unparsed(text) => f.write_str(text),
        }
    }
}

fn is_ongoing(text: &str) -> bool {
    let lc = text.to_ascii_lowercase();
    ONGOING_SENTINELS.iter().any(|s| lc.contains(s))
}

fn parse_slots(inner: &str) -> Vec<Slot> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match parse_clock(t) {
            Some(m) => Slot::At(m),
            None => Slot::Note(t.to_string()),
        })
        .collect()
}

/// Parse `H:MM`, `HH:MM` (24-hour) or `H:MM AM|PM` (12-hour, case-insensitive)
/// into minutes since midnight.
pub fn parse_clock(token: &str) -> Option<u16> {
    let caps = TIME_TOKEN.captures(token.trim())?;
    let hour: u16 = caps[1].parse().ok()?;
    let minute: u16 = caps[2].parse().ok()?;
    if minute > 59 {
        return None;
    }
    let hour = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (meridiem.as_str(), hour) {
                ("p", 12) => 12,
                ("p", h) => h + 12,
                (_, 12) => 0,
                (_, h) => h,
            }
        }
        None if hour > 23 => return None,
        None => hour,
    };
    let total = hour * 60 + minute;
    (total <= LAST_MINUTE).then_some(total)
}

/// Resolve a day header without a year ("Mon Oct 6", "Friday 10, October")
/// against `reference`, with the same rollover rule as `parse_with_reference`.
pub fn resolve_short_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    legacy_parse(text.trim(), reference)?.date()
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lc = name.to_ascii_lowercase();
    if lc.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| lc.starts_with(m))
        .map(|idx| idx as u32 + 1)
}

fn legacy_parse(text: &str, reference: NaiveDate) -> Option<Showtime> {
    let (month, day, times) = if let Some(c) = LEGACY_MONTH_DAY.captures(text) {
        (
            month_from_name(&c[1])?,
            c[2].parse::<u32>().ok()?,
            c.get(3).map(|m| m.as_str().to_string()),
        )
    } else if let Some(c) = LEGACY_DAY_MONTH.captures(text) {
        (
            month_from_name(&c[2])?,
            c[1].parse::<u32>().ok()?,
            c.get(3).map(|m| m.as_str().to_string()),
        )
    } else {
        return None;
    };

    // Headers carry no year: pick the one that lands within half a year of `reference`.
    let mut date = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
    if (reference - date).num_days() > 180 {
        date = NaiveDate::from_ymd_opt(reference.year() + 1, month, day)?;
    } else if (date - reference).num_days() > 180 {
        date = NaiveDate::from_ymd_opt(reference.year() - 1, month, day)?;
    }
    Some(Showtime::Dated {
        date,
        slots: times.as_deref().map(parse_slots).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_iso_date_with_24h_times() {
        let st = Showtime::parse("2024-10-12 (18:15, 20:45)");
        assert_eq!(st.date(), Some(ymd(2024, 10, 12)));
        assert_eq!(st.times(), vec![1095, 1245]);
        assert_eq!(st.normalized(), "2024-10-12 (18:15, 20:45)");
    }

    #[test]
    fn parses_12h_times_and_normalizes_to_24h() {
        let st = Showtime::parse("2024-10-12 (6:30 PM, 9:00 PM)");
        assert_eq!(st.times(), vec![1110, 1260]);
        assert_eq!(st.normalized(), "2024-10-12 (18:30, 21:00)");
    }

    #[test]
    fn twelve_hour_edge_hours() {
        assert_eq!(parse_clock("12:00 PM"), Some(720));
        assert_eq!(parse_clock("12:05 am"), Some(5));
        assert_eq!(parse_clock("11:59 PM"), Some(1439));
        assert_eq!(parse_clock("1:00 pm"), Some(780));
        assert_eq!(parse_clock("7:00am"), Some(420));
        assert_eq!(parse_clock("0:00"), Some(0));
        assert_eq!(parse_clock("23:59"), Some(1439));
    }

    #[test]
    fn rejects_out_of_range_clock_values() {
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("13:00 PM"), None);
        assert_eq!(parse_clock("0:30 AM"), None);
        assert_eq!(parse_clock("9:75"), None);
        assert_eq!(parse_clock("noon"), None);
    }

    #[test]
    fn date_without_parentheses_has_no_slots() {
        let st = Showtime::parse("2025-01-03");
        assert_eq!(st, Showtime::Dated { date: ymd(2025, 1, 3), slots: vec![] });
        assert_eq!(st.normalized(), "2025-01-03");
    }

    #[test]
    fn keeps_unrecognized_slot_tokens_verbatim() {
        let st = Showtime::parse("2024-10-12 (7:00 PM, Sold Out)");
        assert_eq!(st.times(), vec![1140]);
        assert_eq!(st.normalized(), "2024-10-12 (19:00, Sold Out)");
    }

    #[test]
    fn ongoing_sentinels_are_case_insensitive() {
        for raw in ["Now Playing", "NOW PLAYING!", "Ongoing run", "Screening daily"] {
            assert_eq!(Showtime::parse(raw), Showtime::Ongoing, "{raw}");
        }
        assert_eq!(Showtime::parse("Now Playing").normalized(), ONGOING_MARKER);
    }

    #[test]
    fn ongoing_matches_any_date_and_time_window() {
        let st = Showtime::parse("Now Playing");
        assert!(st.is_showing_on(ymd(1999, 1, 1)));
        assert!(st.is_showing_on(ymd(2030, 6, 15)));
        assert!(st.has_showing_between(ymd(2030, 6, 15), 0, 10));
    }

    #[test]
    fn unparsed_text_is_kept_and_never_matches() {
        let st = Showtime::parse("  Check website for showtimes ");
        assert_eq!(st, Showtime::Unparsed("Check website for showtimes".into()));
        assert!(!st.is_parsed());
        assert!(!st.is_showing_on(ymd(2025, 1, 1)));
        assert!(!st.has_showing_between(ymd(2025, 1, 1), 0, LAST_MINUTE));
    }

    #[test]
    fn invalid_iso_date_falls_through() {
        assert!(matches!(Showtime::parse("2024-13-40 (18:00)"), Showtime::Unparsed(_)));
    }

    #[test]
    fn time_window_filter() {
        let st = Showtime::parse("2024-10-12 (18:15, 20:45)");
        let day = ymd(2024, 10, 12);
        assert!(st.has_showing_between(day, 18 * 60, 19 * 60));
        assert!(!st.has_showing_between(day, 12 * 60, 18 * 60));
        assert!(!st.has_showing_between(ymd(2024, 10, 13), 0, LAST_MINUTE));
    }

    #[test]
    fn normalized_text_reparses_to_same_value() {
        for raw in ["2024-10-12 (6:30 PM, 21:00)", "Daily", "Jan 5-12"] {
            let first = Showtime::parse(raw);
            assert_eq!(Showtime::parse(&first.normalized()), first);
        }
    }

    #[test]
    fn legacy_month_day_uses_reference_year() {
        let st = Showtime::parse_with_reference("Mon Oct 6 (7:00 PM)", ymd(2025, 10, 1));
        assert_eq!(st.date(), Some(ymd(2025, 10, 6)));
        assert_eq!(st.times(), vec![1140]);
    }

    #[test]
    fn legacy_day_month_and_year_rollover() {
        let st = Showtime::parse_with_reference("Friday 10, October", ymd(2025, 9, 30));
        assert_eq!(st.date(), Some(ymd(2025, 10, 10)));

        let st = Showtime::parse_with_reference("Sat Jan 3", ymd(2025, 12, 20));
        assert_eq!(st.date(), Some(ymd(2026, 1, 3)));
    }

    #[test]
    fn resolves_day_headers() {
        let reference = ymd(2025, 10, 1);
        assert_eq!(resolve_short_date("Mon Oct 6", reference), Some(ymd(2025, 10, 6)));
        assert_eq!(resolve_short_date(" Friday 10, October ", reference), Some(ymd(2025, 10, 10)));
        assert_eq!(resolve_short_date("Jan 3", ymd(2025, 12, 20)), Some(ymd(2026, 1, 3)));
        assert_eq!(resolve_short_date("Coming Soon", reference), None);
    }

    #[test]
    fn day_headers_roll_back_across_new_year() {
        assert_eq!(resolve_short_date("Sun Dec 28", ymd(2026, 1, 2)), Some(ymd(2025, 12, 28)));
        assert_eq!(resolve_short_date("Wednesday 31, December", ymd(2026, 1, 2)), Some(ymd(2025, 12, 31)));
        // Within half a year ahead stays in the current year.
        assert_eq!(resolve_short_date("Jun 30", ymd(2026, 1, 2)), Some(ymd(2026, 6, 30)));
    }

    #[test]
    fn legacy_path_leaves_ranges_unparsed() {
        let st = Showtime::parse_with_reference("Jan 5-12", ymd(2025, 1, 1));
        assert_eq!(st, Showtime::Unparsed("Jan 5-12".into()));
    }
}
