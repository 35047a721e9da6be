use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::core::types::{BucketWidth, Resource};
use crate::storage::instance::{Content, ResourceInstance};

/// Outcome for one expected bucket after aligning a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Filled(ResourceInstance),
    Missing,
}

impl Slot {
    pub fn is_filled(&self) -> bool {
        matches!(self, Slot::Filled(_))
    }
}

/// Walk the expected buckets in lock-step with the returned instances.
///
/// An instance fills a bucket when its start lies within `tolerance` of the
/// bucket start (anywhere inside the local day for station buckets).
/// Instances starting before the bucket under consideration are dropped,
/// buckets the server skipped or never reached come back `Missing`, and so
/// does a video bucket whose payload is empty. The result has exactly one
/// slot per expected bucket.
pub fn reconcile(
    resource: &Resource,
    buckets: &[DateTime<Utc>],
    mut returned: Vec<ResourceInstance>,
    tolerance: Duration,
) -> Vec<Slot> {
    returned.sort_by_key(|i| i.start);
    let mut queue: VecDeque<ResourceInstance> = returned.into();
    let width = resource.bucket_width();
    let mut slots = Vec::with_capacity(buckets.len());

    for &bucket in buckets {
        let lower = bucket - tolerance;
        let upper = match width {
            BucketWidth::Hour => bucket + tolerance + Duration::milliseconds(1),
            BucketWidth::Day => width.bucket_end(bucket, resource.time_zone),
        };

        while queue.front().is_some_and(|i| i.start < lower) {
            if let Some(dropped) = queue.pop_front() {
                debug!(resource_id = %resource.id, start = %dropped.start, %bucket, "dropping unaligned instance");
            }
        }

        let fits = queue.front().is_some_and(|i| i.start < upper);
        let slot = match fits.then(|| queue.pop_front()).flatten() {
            Some(instance) if !is_storable(&instance) => {
                debug!(resource_id = %resource.id, %bucket, "instance carries no usable payload");
                Slot::Missing
            }
            Some(instance) => Slot::Filled(instance),
            None => Slot::Missing,
        };
        slots.push(slot);
    }

    if !queue.is_empty() {
        debug!(resource_id = %resource.id, extra = queue.len(), "backend returned instances past the requested buckets");
    }
    slots
}

/// Empty video and headerless station tables are treated as absent.
fn is_storable(instance: &ResourceInstance) -> bool {
    match &instance.content {
        Content::Video(data) => !data.is_empty(),
        Content::Station(table) => table.has_header(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;

    use crate::catalog::tests::resource;
    use crate::core::types::{FileFormat, ResourceKind};
    use crate::storage::instance::StationTable;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn hours(n: i64) -> Vec<DateTime<Utc>> {
        (0..n).map(|h| t0() + Duration::hours(h)).collect()
    }

    fn clip(start: DateTime<Utc>, data: &'static [u8]) -> ResourceInstance {
        ResourceInstance {
            resource_id: crate::core::types::ResourceId::new(7),
            kind: None,
            format: FileFormat::Avi,
            start,
            end: start + Duration::hours(1) - Duration::milliseconds(1),
            label: "clip".to_string(),
            stamped_at: start,
            path: None,
            content: Content::Video(Bytes::from_static(data)),
        }
    }

    fn filled_starts(slots: &[Slot]) -> Vec<Option<DateTime<Utc>>> {
        slots
            .iter()
            .map(|s| match s {
                Slot::Filled(i) => Some(i.start),
                Slot::Missing => None,
            })
            .collect()
    }

    #[test]
    fn test_skipped_bucket_becomes_missing() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let returned = vec![clip(t0(), b"a"), clip(t0() + Duration::hours(2), b"c")];
        let slots = reconcile(&camera, &hours(3), returned, Duration::seconds(5));
        assert_eq!(
            filled_starts(&slots),
            vec![Some(t0()), None, Some(t0() + Duration::hours(2))]
        );
    }

    #[test]
    fn test_starts_within_tolerance_are_accepted() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let returned = vec![
            clip(t0() + Duration::seconds(4), b"a"),
            clip(t0() + Duration::hours(1) - Duration::seconds(5), b"b"),
        ];
        let slots = reconcile(&camera, &hours(2), returned, Duration::seconds(5));
        assert!(slots.iter().all(Slot::is_filled));
    }

    #[test]
    fn test_out_of_tolerance_instance_waits_for_its_bucket() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let returned = vec![clip(t0() + Duration::seconds(6), b"a")];
        let slots = reconcile(&camera, &hours(2), returned, Duration::seconds(5));
        assert_eq!(slots, vec![Slot::Missing, Slot::Missing]);
    }

    #[test]
    fn test_unordered_response_is_sorted_first() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let returned = vec![clip(t0() + Duration::hours(1), b"b"), clip(t0(), b"a")];
        let slots = reconcile(&camera, &hours(2), returned, Duration::seconds(5));
        assert_eq!(
            filled_starts(&slots),
            vec![Some(t0()), Some(t0() + Duration::hours(1))]
        );
    }

    #[test]
    fn test_short_and_empty_responses_fill_trailing_buckets() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let slots = reconcile(&camera, &hours(3), vec![clip(t0(), b"a")], Duration::seconds(5));
        assert_eq!(filled_starts(&slots), vec![Some(t0()), None, None]);

        let slots = reconcile(&camera, &hours(4), Vec::new(), Duration::seconds(5));
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|s| !s.is_filled()));
    }

    #[test]
    fn test_empty_video_payload_is_missing() {
        let camera = resource(7, ResourceKind::WeatherCamera);
        let slots = reconcile(&camera, &hours(1), vec![clip(t0(), b"")], Duration::seconds(5));
        assert_eq!(slots, vec![Slot::Missing]);
    }

    #[test]
    fn test_station_instance_anywhere_in_day_fills_it() {
        let station = resource(3, ResourceKind::WeatherStation);
        let days = vec![t0(), t0() + Duration::days(1)];
        let reading = ResourceInstance {
            resource_id: station.id,
            kind: None,
            format: FileFormat::Csv,
            start: t0() + Duration::days(1) + Duration::hours(3),
            end: t0() + Duration::days(1) + Duration::hours(9),
            label: "KSTATION".to_string(),
            stamped_at: t0(),
            path: None,
            content: Content::Station(StationTable {
                header: vec!["time".into(), "temp".into()],
                rows: Vec::new(),
            }),
        };
        let slots = reconcile(&station, &days, vec![reading], Duration::seconds(5));
        assert_eq!(slots[0], Slot::Missing);
        assert!(slots[1].is_filled());
    }

    #[test]
    fn test_headerless_station_table_is_missing() {
        let station = resource(3, ResourceKind::WeatherStation);
        let reading = ResourceInstance {
            resource_id: station.id,
            kind: None,
            format: FileFormat::Csv,
            start: t0(),
            end: t0() + Duration::hours(9),
            label: "KSTATION".to_string(),
            stamped_at: t0(),
            path: None,
            content: Content::Station(StationTable::default()),
        };
        let slots = reconcile(&station, &[t0()], vec![reading], Duration::seconds(5));
        assert_eq!(slots, vec![Slot::Missing]);
    }
}
