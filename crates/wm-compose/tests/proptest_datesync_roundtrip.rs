//! Property-based tests for zoned/local date conversion.
//!
//! 1. `zoned_to_local(local_to_zoned(x))` returns `x` for every catalog offset
//! 2. An edit followed by a resync leaves the local value untouched
//! 3. Changing the offset keeps the local digits and moves the zoned instant
//! 4. An empty local value always empties the zoned value

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use wm_compose::datesync::{local_to_zoned, zoned_to_local};
use wm_compose::{DateSync, available_timezones};
use wm_reactive::Observable;

const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Strategies ──────────────────────────────────────────────────────────

fn datetime_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (1971i32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_filter_map(
        "valid datetime",
        |(y, mo, d, h, mi, s)| NaiveDate::from_ymd_opt(y, mo, d)?.and_hms_opt(h, mi, s),
    )
}

fn local_strategy() -> impl Strategy<Value = String> {
    datetime_strategy().prop_map(|dt| dt.format(FORMAT).to_string())
}

fn offset_strategy() -> impl Strategy<Value = String> {
    let values: Vec<String> = available_timezones().into_iter().map(|tz| tz.value).collect();
    prop::sample::select(values)
}

// ═══════════════════════════════════════════════════════════════════════
// 1. Conversion round trip
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn conversion_round_trips(local in local_strategy(), offset in offset_strategy()) {
        let zoned = local_to_zoned(&local, &offset, FORMAT).unwrap();
        let back = zoned_to_local(&zoned, &offset, FORMAT).unwrap();
        prop_assert_eq!(back, local);
    }

    #[test]
    fn utc_offset_is_identity(local in local_strategy()) {
        prop_assert_eq!(local_to_zoned(&local, "+00:00", FORMAT).unwrap(), local);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 2-4. Live binding
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn resync_after_edit_is_stable(local in local_strategy(), offset in offset_strategy()) {
        let sync = DateSync::new(Observable::new(offset.clone()), FORMAT);
        sync.edit_local(local.clone());
        let version = sync.local().version();

        sync.resync_local();
        prop_assert_eq!(sync.local().get(), local.clone());
        prop_assert_eq!(sync.local().version(), version);
        prop_assert_eq!(sync.zoned().get(), local_to_zoned(&local, &offset, FORMAT).unwrap());
    }

    #[test]
    fn offset_change_keeps_local_digits(
        local in local_strategy(),
        first in offset_strategy(),
        second in offset_strategy(),
    ) {
        let offset = Observable::new(first);
        let sync = DateSync::new(offset.clone(), FORMAT);
        sync.edit_local(local.clone());

        offset.set(second.clone());
        prop_assert_eq!(sync.local().get(), local.clone());
        prop_assert_eq!(sync.zoned().get(), local_to_zoned(&local, &second, FORMAT).unwrap());
    }

    #[test]
    fn empty_local_empties_zoned(local in local_strategy(), offset in offset_strategy()) {
        let sync = DateSync::new(Observable::new(offset), FORMAT);
        sync.edit_local(local);
        prop_assert!(!sync.zoned().get().is_empty());

        sync.edit_local("");
        prop_assert_eq!(sync.zoned().get(), String::new());
    }
}
