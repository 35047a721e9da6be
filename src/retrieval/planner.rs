use chrono::{DateTime, Duration, Utc};

use crate::core::time;
use crate::core::types::{BucketWidth, Resource, ResourceKey, TimeRange};
use crate::observability::metrics as obs;
use crate::storage::cache::BucketCache;

// ---------------------------------------------------------------------------
// Bucket walking
// ---------------------------------------------------------------------------

/// Bucket starts covering `range` for `resource`, in order.
///
/// Video walks one hour at a time from the exact start instant. Station
/// data snaps outward to local-day boundaries in the resource's zone and
/// never goes past the day containing `now`.
pub fn bucket_starts(resource: &Resource, range: &TimeRange, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    if range.is_empty() {
        return Vec::new();
    }
    match resource.bucket_width() {
        BucketWidth::Hour => {
            let mut starts = Vec::new();
            let mut cursor = range.start;
            while cursor < range.stop {
                starts.push(cursor);
                cursor += Duration::hours(1);
            }
            starts
        }
        BucketWidth::Day => {
            let zone = resource.time_zone;
            let first = time::start_of_local_day(range.start, zone);
            let requested_last = time::start_of_local_day(range.stop - Duration::milliseconds(1), zone);
            let last = requested_last.min(time::start_of_local_day(now, zone));
            let mut starts = Vec::new();
            let mut cursor = first;
            while cursor <= last {
                starts.push(cursor);
                cursor = time::next_local_day(cursor, zone);
            }
            starts
        }
    }
}

// ---------------------------------------------------------------------------
// Gap planning
// ---------------------------------------------------------------------------

/// One step of a retrieval plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bucket served straight from the cache.
    Hit(ResourceKey),
    /// Maximal run of consecutive buckets needing one backend request.
    Gap { buckets: Vec<DateTime<Utc>> },
}

impl Segment {
    pub fn bucket_count(&self) -> usize {
        match self {
            Segment::Hit(_) => 1,
            Segment::Gap { buckets } => buckets.len(),
        }
    }
}

/// Request range `[first start, end of last bucket)` of a gap.
pub fn gap_range(resource: &Resource, buckets: &[DateTime<Utc>]) -> Option<TimeRange> {
    let first = *buckets.first()?;
    let last = *buckets.last()?;
    let stop = resource.bucket_width().bucket_end(last, resource.time_zone);
    Some(TimeRange::new(first, stop))
}

/// Classify every bucket of `range` as hit or miss against `cache` and
/// coalesce consecutive misses into single gaps.
pub fn plan(resource: &Resource, range: &TimeRange, cache: &BucketCache, now: DateTime<Utc>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pending: Vec<DateTime<Utc>> = Vec::new();
    let mut hits = 0usize;

    for start in bucket_starts(resource, range, now) {
        let key = ResourceKey::new(resource.id, start);
        if cache.is_current(&key, resource, now) {
            if !pending.is_empty() {
                segments.push(Segment::Gap {
                    buckets: std::mem::take(&mut pending),
                });
            }
            segments.push(Segment::Hit(key));
            hits += 1;
        } else {
            pending.push(start);
        }
    }
    if !pending.is_empty() {
        segments.push(Segment::Gap { buckets: pending });
    }

    let total: usize = segments.iter().map(Segment::bucket_count).sum();
    obs::inc_cache_hits(cache.name(), hits);
    obs::inc_cache_misses(cache.name(), total - hits);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::TimeZone;

    use crate::catalog::tests::resource;
    use crate::core::types::{FileFormat, ResourceKind};
    use crate::storage::instance::{Content, ResourceInstance};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fill(cache: &BucketCache, resource: &Resource, start: DateTime<Utc>) {
        let end = start + Duration::hours(1) - Duration::milliseconds(1);
        let instance = ResourceInstance {
            resource_id: resource.id,
            kind: Some(resource.kind),
            format: FileFormat::Avi,
            start,
            end,
            label: "clip".to_string(),
            stamped_at: start,
            path: None,
            content: Content::Video(Bytes::from_static(b"x")),
        };
        cache.put(ResourceKey::new(resource.id, start), Arc::new(instance), end);
    }

    #[test]
    fn test_video_bucket_count_rounds_up() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let start = t0() + Duration::minutes(10);
        let range = TimeRange::new(start, start + Duration::minutes(150));
        let starts = bucket_starts(&camera, &range, t0() + Duration::days(1));
        assert_eq!(
            starts,
            vec![start, start + Duration::hours(1), start + Duration::hours(2)]
        );
    }

    #[test]
    fn test_empty_range_has_no_buckets() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let range = TimeRange::new(t0(), t0());
        assert!(bucket_starts(&camera, &range, t0()).is_empty());
        let reversed = TimeRange::new(t0() + Duration::hours(1), t0());
        assert!(plan(&camera, &reversed, &BucketCache::new("avi"), t0()).is_empty());
    }

    #[test]
    fn test_station_range_snaps_to_local_days() {
        let mut station = resource(3, ResourceKind::WeatherStation);
        station.time_zone = chrono_tz::America::New_York;
        // 2024-01-01 12:00 EST .. 2024-01-03 01:00 EST
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap(),
        );
        let starts = bucket_starts(&station, &range, t0() + Duration::days(30));
        assert_eq!(
            starts,
            vec![
                Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_station_range_is_capped_at_today() {
        let station = resource(3, ResourceKind::WeatherStation);
        let range = TimeRange::new(t0(), t0() + Duration::days(10));
        let now = t0() + Duration::days(2) + Duration::hours(6);
        let starts = bucket_starts(&station, &range, now);
        assert_eq!(starts.len(), 3);
        assert_eq!(*starts.last().unwrap(), t0() + Duration::days(2));
    }

    #[test]
    fn test_consecutive_misses_form_one_gap() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let cache = BucketCache::new("avi");
        for h in [0, 1, 6] {
            fill(&cache, &camera, t0() + Duration::hours(h));
        }
        let range = TimeRange::new(t0(), t0() + Duration::hours(7));

        let segments = plan(&camera, &range, &cache, t0() + Duration::days(1));

        let gap: Vec<_> = (2..=5).map(|h| t0() + Duration::hours(h)).collect();
        assert_eq!(
            segments,
            vec![
                Segment::Hit(ResourceKey::new(camera.id, t0())),
                Segment::Hit(ResourceKey::new(camera.id, t0() + Duration::hours(1))),
                Segment::Gap { buckets: gap.clone() },
                Segment::Hit(ResourceKey::new(camera.id, t0() + Duration::hours(6))),
            ]
        );
        assert_eq!(
            gap_range(&camera, &gap),
            Some(TimeRange::new(t0() + Duration::hours(2), t0() + Duration::hours(6)))
        );
    }

    #[test]
    fn test_cold_cache_is_one_gap() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let range = TimeRange::new(t0(), t0() + Duration::hours(3));
        let segments = plan(&camera, &range, &BucketCache::new("avi"), t0() + Duration::days(1));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].bucket_count(), 3);
    }
}
