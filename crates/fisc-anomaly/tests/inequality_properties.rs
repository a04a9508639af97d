use fisc_anomaly::{atkinson, gini, theil, IndexValue};
use proptest::prelude::*;

fn arb_positive() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(1.0f64..1e9, 2..200)
}

proptest! {
    #[test]
    fn test_indices_stay_in_range(values in arb_positive(), epsilon in 0.1f64..3.0) {
        let g = gini(&values).value().unwrap();
        prop_assert!((0.0..=1.0).contains(&g));
        let t = theil(&values).value().unwrap();
        prop_assert!(t >= 0.0);
        prop_assert!(t <= (values.len() as f64).ln() + 1e-9);
        let a = atkinson(&values, epsilon).value().unwrap();
        prop_assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_gini_is_scale_and_order_invariant(values in arb_positive(), scale in 0.01f64..1000.0) {
        let g = gini(&values).value().unwrap();
        let scaled: Vec<f64> = values.iter().map(|v| v * scale).collect();
        let mut reversed = values.clone();
        reversed.reverse();
        prop_assert!((gini(&scaled).value().unwrap() - g).abs() < 1e-9);
        prop_assert!((gini(&reversed).value().unwrap() - g).abs() < 1e-9);
    }

    #[test]
    fn test_equal_values_have_no_inequality(value in 1.0f64..1e9, n in 2usize..100) {
        let values = vec![value; n];
        prop_assert!(gini(&values).value().unwrap().abs() < 1e-9);
        prop_assert!(theil(&values).value().unwrap().abs() < 1e-9);
        prop_assert!(atkinson(&values, 0.5).value().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_zero_only_blocks_log_based_indices(mut values in arb_positive()) {
        values[0] = 0.0;
        prop_assert!(gini(&values).value().is_some());
        prop_assert!(atkinson(&values, 0.5).value().is_some());
        prop_assert!(matches!(theil(&values), IndexValue::InsufficientData(_)));
        prop_assert!(matches!(atkinson(&values, 1.0), IndexValue::InsufficientData(_)));
    }
}
