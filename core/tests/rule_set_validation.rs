//! Rule set loading: band validation, variant shape, variant selection.

mod common;

use common::*;
use compcalc_core::{
    error::CalcError,
    rule_set::{validate_bands, ComponentConfig, MatrixLookupConfig, RuleSet, Variant},
};
use std::collections::BTreeMap;

fn single_variant(components: Vec<compcalc_core::rule_set::Component>) -> RuleSet {
    RuleSet {
        id:   "rs".into(),
        name: "rs".into(),
        variants: vec![Variant {
            id:          "only".into(),
            name:        "Only".into(),
            eligibility: None,
            default:     true,
            components,
        }],
    }
}

#[test]
fn retail_rule_set_validates_and_sorts_by_ordinal() {
    let mut rs = retail_rule_set();
    rs.variants[1].components.reverse();
    let rs = rs.validated().expect("valid rule set");
    let ordinals: Vec<u32> = rs.variants[1].components.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert_eq!(rs.component_count(), 5);
}

#[test]
fn descending_bands_are_rejected() {
    let bands = vec![band(50.0, Some(100.0)), band(0.0, Some(50.0))];
    let err = validate_bands("c", &bands).unwrap_err();
    assert!(matches!(err, CalcError::NonMonotonicBands { .. }), "{err}");
}

#[test]
fn overlapping_and_inverted_bands_are_rejected() {
    let overlapping = vec![band(0.0, Some(60.0)), band(50.0, Some(100.0))];
    assert!(matches!(
        validate_bands("c", &overlapping),
        Err(CalcError::NonMonotonicBands { .. })
    ));

    let inverted = vec![band(10.0, Some(5.0))];
    assert!(matches!(validate_bands("c", &inverted), Err(CalcError::NonMonotonicBands { .. })));

    let open_middle = vec![band(0.0, None), band(10.0, Some(20.0))];
    assert!(matches!(
        validate_bands("c", &open_middle),
        Err(CalcError::NonMonotonicBands { .. })
    ));
}

#[test]
fn gapped_bands_are_accepted() {
    let gapped = vec![band(0.0, Some(10.0)), band(20.0, None)];
    assert!(validate_bands("c", &gapped).is_ok());
}

#[test]
fn empty_band_table_is_a_configuration_error() {
    let empty: Vec<compcalc_core::rule_set::Band> = Vec::new();
    assert!(matches!(
        validate_bands("c", &empty),
        Err(CalcError::InvalidConfiguration { .. })
    ));
}

#[test]
fn non_monotonic_tiers_fail_the_whole_rule_set() {
    let mut tiers = attainment_tiers("attainment");
    if let ComponentConfig::TierLookup(c) = &mut tiers {
        c.tiers.swap(1, 2);
    }
    let err = single_variant(vec![component("t", 1, tiers)]).validated().unwrap_err();
    assert!(matches!(err, CalcError::NonMonotonicBands { ref component_id, .. } if component_id == "t"));
}

#[test]
fn variant_without_components_is_rejected() {
    let err = single_variant(Vec::new()).validated().unwrap_err();
    assert!(matches!(err, CalcError::EmptyComponents { .. }));
}

#[test]
fn rule_set_without_variants_is_rejected() {
    let rs = RuleSet { id: "rs".into(), name: "rs".into(), variants: Vec::new() };
    assert!(matches!(rs.validated(), Err(CalcError::NoVariants { .. })));
}

#[test]
fn duplicate_ordinals_are_rejected() {
    let rs = single_variant(vec![
        component("a", 1, attainment_tiers("x")),
        component("b", 1, attainment_tiers("y")),
    ]);
    assert!(matches!(rs.validated(), Err(CalcError::DuplicateOrdinal { ordinal: 1, .. })));
}

#[test]
fn grid_dimensions_must_match_bands() {
    let mut matrix = optical_matrix();
    if let ComponentConfig::MatrixLookup(c) = &mut matrix {
        c.grids.get_mut("certified").unwrap().pop();
    }
    let err = single_variant(vec![component("m", 1, matrix)]).validated().unwrap_err();
    assert!(matches!(err, CalcError::InvalidConfiguration { .. }), "{err}");

    let mut matrix = optical_matrix();
    if let ComponentConfig::MatrixLookup(c) = &mut matrix {
        c.grids.get_mut("non_certified").unwrap()[2].push(1.0);
    }
    assert!(single_variant(vec![component("m", 1, matrix)]).validated().is_err());
}

#[test]
fn default_grid_must_exist() {
    let config = ComponentConfig::MatrixLookup(MatrixLookupConfig {
        row_metric:     "r".into(),
        column_metric:  "c".into(),
        row_bands:      vec![band(0.0, None)],
        column_bands:   vec![band(0.0, None)],
        grids:          BTreeMap::from([("a".to_string(), vec![vec![1.0]])]),
        grid_attribute: None,
        default_grid:   Some("missing".into()),
    });
    assert!(single_variant(vec![component("m", 1, config)]).validated().is_err());
}

#[test]
fn negative_rates_are_rejected() {
    let config = ComponentConfig::FlatPercentage(compcalc_core::rule_set::FlatPercentageConfig {
        metric: "m".into(),
        rate:   -0.01,
    });
    assert!(matches!(
        single_variant(vec![component("f", 1, config)]).validated(),
        Err(CalcError::InvalidConfiguration { .. })
    ));
}

#[test]
fn variant_selection_prefers_eligibility_then_default() {
    let rs = retail_rule_set().validated().unwrap();
    let certified = BTreeMap::from([("certification".to_string(), "certified".to_string())]);
    let other = BTreeMap::from([("certification".to_string(), "pending".to_string())]);

    assert_eq!(rs.variant_for(&certified).map(|v| v.id.as_str()), Some("certified"));
    assert_eq!(rs.variant_for(&other).map(|v| v.id.as_str()), Some("standard"));
    assert_eq!(rs.variant_for(&BTreeMap::new()).map(|v| v.id.as_str()), Some("standard"));
}

#[test]
fn first_variant_applies_without_a_default() {
    let mut rs = retail_rule_set();
    rs.variants[1].default = false;
    assert_eq!(rs.variant_index_for(&BTreeMap::new()), Some(0));
}

#[test]
fn rule_sets_round_trip_through_json_with_type_tags() {
    let rs = retail_rule_set();
    let json = serde_json::to_value(&rs).unwrap();
    let tag = &json["variants"][0]["components"][0]["config"]["type"];
    assert_eq!(tag, "matrix_lookup");
    let back: RuleSet = serde_json::from_value(json).unwrap();
    assert_eq!(back, rs);
}
