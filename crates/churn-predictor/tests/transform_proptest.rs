//! Property-based tests for the feature transform.
//!
//! Records are generated from the fixture schema's domains; encoding must
//! not depend on the order fields were supplied in and must be repeatable.

use std::sync::OnceLock;

use proptest::prelude::*;
use proptest::strategy::ValueTree;

use churn_predictor::testing::sample_artifacts;
use churn_predictor::{
    Domain, FeatureTransform, FieldType, FieldValue, MEAN_EVE_MINUTES, MeanOffset, RawRecord,
};

fn transform() -> &'static FeatureTransform {
    static TRANSFORM: OnceLock<FeatureTransform> = OnceLock::new();
    TRANSFORM.get_or_init(|| {
        let (schema, encoder) = sample_artifacts().unwrap();
        FeatureTransform::new(schema, encoder, Some(MeanOffset::default())).unwrap()
    })
}

/// Strategy for a valid record, as `(field, value)` pairs in schema order.
fn arb_fields() -> impl Strategy<Value = Vec<(String, FieldValue)>> {
    let schema = transform().schema();
    let strategies: Vec<BoxedStrategy<(String, FieldValue)>> = schema
        .input_fields()
        .map(|field| {
            let name = field.name.clone();
            let value: BoxedStrategy<FieldValue> = match (&field.domain, field.field_type) {
                (Domain::Categories(c), _) => proptest::sample::select(c.clone())
                    .prop_map(FieldValue::Category)
                    .boxed(),
                (Domain::Range { min, max }, FieldType::Integer) => (*min as i64..=*max as i64)
                    .prop_map(FieldValue::Int)
                    .boxed(),
                (Domain::Range { min, max }, _) => (*min..=*max).prop_map(FieldValue::Float).boxed(),
            };
            value.prop_map(move |v| (name.clone(), v)).boxed()
        })
        .collect();
    strategies
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn field_order_does_not_change_output(
        (fields, shuffled) in arb_fields().prop_flat_map(|fields| {
            let shuffled = Just(fields.clone()).prop_shuffle();
            (Just(fields), shuffled)
        })
    ) {
        let t = transform();
        let ordered: RawRecord = fields.into_iter().collect();
        let permuted: RawRecord = shuffled.into_iter().collect();
        prop_assert_eq!(t.transform(&ordered).unwrap(), t.transform(&permuted).unwrap());
    }

    #[test]
    fn transform_is_deterministic_and_well_formed(fields in arb_fields()) {
        let t = transform();
        let record: RawRecord = fields.into_iter().collect();
        let first = t.transform(&record).unwrap();
        let second = t.transform(&record).unwrap();
        prop_assert_eq!(&first, &second);

        prop_assert_eq!(first.columns(), t.schema().column_order_out());
        prop_assert!(first.values().iter().all(|v| v.is_finite()));

        // Exactly one indicator per non-dropped category group.
        for group in ["state_code_", "promotions_offered_", "area_code_area_code_"] {
            let hot: f32 = first
                .columns()
                .iter()
                .zip(first.values())
                .filter(|(c, _)| c.starts_with(group))
                .map(|(_, v)| *v)
                .sum();
            prop_assert_eq!(hot, 1.0);
        }

        let eve = record.get("total_eve_minutes").and_then(FieldValue::as_f64).unwrap();
        let encoded = first.get("total_eve_minutes").unwrap();
        prop_assert!((encoded - (MEAN_EVE_MINUTES - eve) as f32).abs() < 1e-3);
    }
}

#[test]
fn generator_covers_every_input_field() {
    let expected = transform().schema().input_fields().count();
    let mut runner = proptest::test_runner::TestRunner::deterministic();
    let fields = arb_fields().new_tree(&mut runner).unwrap().current();
    assert_eq!(fields.len(), expected);
}
