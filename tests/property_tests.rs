use ab_lift::cleaning::OutlierFilter;
use ab_lift::data::{Dataset, Group, ImpressionDay, ImpressionHour, Snapshot, UserRecord};
use ab_lift::estimation::LiftSummary;
use ab_lift::stats::two_proportion_test;
use proptest::prelude::*;

fn arb_record() -> impl Strategy<Value = (bool, bool, u32, u8, u8)> {
    (
        any::<bool>(),
        any::<bool>(),
        prop_oneof![9 => 0u32..60, 1 => 0u32..100_000],
        1u8..=7,
        0u8..24,
    )
}

fn arb_dataset() -> impl Strategy<Value = Dataset> {
    prop::collection::vec(arb_record(), 0..300).prop_map(|rows| {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(i, (treated, converted, impressions, day, hour))| {
                UserRecord::new(
                    format!("u{}", i),
                    if treated { Group::Treatment } else { Group::Control },
                    converted,
                    impressions,
                    ImpressionDay::new(day).unwrap(),
                    ImpressionHour::new(hour).unwrap(),
                )
            })
            .collect();
        Dataset::from_records(Snapshot::Raw, records)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Group split is a partition of the dataset
    #[test]
    fn prop_split_is_partition(dataset in arb_dataset()) {
        let split = dataset.split_by_group();
        prop_assert_eq!(split.control().len() + split.treatment().len(), dataset.len());
        prop_assert!(split.control().iter().all(|r| r.is_control()));
        prop_assert!(split.treatment().iter().all(|r| r.is_treatment()));
    }

    /// Cleaning never grows the data and cleaning twice changes nothing
    #[test]
    fn prop_filter_idempotent_and_shrinking(
        dataset in arb_dataset(),
        sigma in 0.5f64..5.0,
        minimum in 0u32..5,
    ) {
        let filter = OutlierFilter::new(sigma, minimum);
        let (once, report) = filter.clean(&dataset);
        prop_assert!(once.len() <= dataset.len());
        prop_assert_eq!(report.removed(), report.removed_by_sigma + report.removed_by_minimum);

        let (twice, _) = filter.clean(&once);
        prop_assert_eq!(once, twice);
    }

    /// Swapping arms negates the statistic and keeps the p-value
    #[test]
    fn prop_proportion_test_symmetric(
        nc in 1usize..5_000,
        nt in 1usize..5_000,
        fc in 0.0f64..1.0,
        ft in 0.0f64..1.0,
    ) {
        let xc = (fc * nc as f64) as usize;
        let xt = (ft * nt as f64) as usize;
        let forward = two_proportion_test((xc, nc), (xt, nt), 0.95);
        let swapped = two_proportion_test((xt, nt), (xc, nc), 0.95);

        match (forward, swapped) {
            (Ok(f), Ok(s)) => {
                prop_assert!((f.statistic + s.statistic).abs() < 1e-9);
                prop_assert!((f.p_value - s.p_value).abs() < 1e-9);
                prop_assert!((0.0..=1.0).contains(&f.p_value));
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "only one direction failed"),
        }
    }

    /// Relative lift is finite or reported undefined, never infinite or NaN
    #[test]
    fn prop_relative_lift_never_infinite(dataset in arb_dataset()) {
        if let Ok(lift) = LiftSummary::from_dataset(&dataset) {
            match lift.relative_lift.value() {
                Some(ratio) => prop_assert!(ratio.is_finite()),
                None => prop_assert_eq!(lift.control.rate, 0.0),
            }
            prop_assert!(lift.absolute_lift.is_finite());
        }
    }
}
