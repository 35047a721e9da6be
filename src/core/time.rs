use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Resolve local midnight of `date` in `zone`.
///
/// Zones that skip midnight on a DST change start the day at the first
/// valid local instant after it.
fn local_midnight(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    for hour in 0..24 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(local) = zone.from_local_datetime(&naive).earliest() {
            return local.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Start of the local day (in `zone`) that contains `instant`.
pub fn start_of_local_day(instant: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    local_midnight(instant.with_timezone(&zone).date_naive(), zone)
}

/// Start of the local day following the one that contains `instant`.
pub fn next_local_day(instant: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    let date = instant.with_timezone(&zone).date_naive();
    match date.succ_opt() {
        Some(next) => local_midnight(next, zone),
        None => instant + Duration::days(1),
    }
}

/// Last millisecond of the local day that contains `instant`.
pub fn end_of_local_day(instant: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    next_local_day(instant, zone) - Duration::milliseconds(1)
}

/// Convert epoch milliseconds into a UTC instant.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}
