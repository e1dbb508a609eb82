//! End-to-end tests of the dilution adjustment pipeline.

use approx::assert_relative_eq;
use ndarray::{Array1, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use simex::adjust::{self, CorrectionMethod, SummaryStatistics};
use simex::data::AdjustmentInput;
use simex::interval;
use simex::profile::ProfileLikelihood;
use simex::simulate;

fn reference_input() -> AdjustmentInput {
    AdjustmentInput::new(
        array![1.0, 2.0, 3.0, 4.0, 5.0],
        Array1::from_elem(5, 0.1),
        array![2.1, 3.9, 6.2, 7.8, 10.1],
        None,
    )
    .unwrap()
}

#[test]
fn reference_scenario_matches_closed_form_ols() {
    let input = reference_input();
    let table = simulate::simulate(&input, &[0.5, 1.0], 500, 20240317).unwrap();

    let lambdas: Vec<f64> = table.rows().iter().map(|r| r.lambda).collect();
    assert_eq!(lambdas, vec![0.0, 0.5, 1.0]);

    // Closed-form OLS of y on x: Sxy / Sxx = 19.9 / 10.
    assert_relative_eq!(table.sentinel().slope, 1.99, epsilon = 1e-10);
    for row in table.rows() {
        assert!(row.variance > 0.0);
    }
}

#[test]
fn identical_seeds_reproduce_the_reference_table() {
    let input = reference_input();
    let first = simulate::simulate(&input, &[0.5, 1.0], 500, 7).unwrap();
    let second = simulate::simulate(&input, &[0.5, 1.0], 500, 7).unwrap();
    assert_eq!(first, second);
}

#[test]
fn interval_brackets_the_estimate_on_the_reference_scenario() {
    let input = reference_input();
    let table = simulate::simulate(&input, &[0.5, 1.0], 500, 99).unwrap();
    let profile = ProfileLikelihood::new(&table, input.variance_ratio()).unwrap();
    let maximum = profile.maximize().unwrap();
    let ci = interval::likelihood_ratio_interval(&profile, &maximum).unwrap();
    assert!(ci.lower <= ci.slope && ci.slope <= ci.upper);
}

/// Synthetic summary statistics where the subsequent trait loads on the true
/// incidence effects with slope 0.5 and the observed incidence effects carry
/// known measurement error.
fn diluted_stats(n: usize, seed: u64) -> SummaryStatistics {
    let mut rng = StdRng::seed_from_u64(seed);
    let truth: Array1<f64> = Array1::from_iter((0..n).map(|_| {
        let z: f64 = rng.sample(StandardNormal);
        z
    }));
    let observed = truth.mapv(|t| {
        let z: f64 = rng.sample(StandardNormal);
        t + 0.5 * z
    });
    let subsequent = truth.mapv(|t| {
        let z: f64 = rng.sample(StandardNormal);
        0.5 * t + 0.05 * z
    });
    SummaryStatistics::new(
        observed,
        Array1::from_elem(n, 0.5),
        subsequent,
        Array1::from_elem(n, 0.05),
    )
    .unwrap()
}

#[test]
fn simex_adjustment_runs_end_to_end() {
    let stats = diluted_stats(500, 1234);
    let method = CorrectionMethod::Simex {
        multipliers: vec![0.5, 1.0, 1.5, 2.0],
        replicates: 200,
        seed: 4321,
    };
    let adjusted = adjust::adjust(&stats, None, &method).unwrap();

    let correction = &adjusted.correction;
    assert!(
        correction.slope > 0.35 && correction.slope < 0.65,
        "corrected slope {} should sit near the generating slope 0.5",
        correction.slope
    );
    let ci = correction.interval.expect("simulation method reports an interval");
    assert!(ci.lower <= correction.slope && correction.slope <= ci.upper);
    assert!(correction.variance >= 0.0);

    let table = correction.table.as_ref().expect("simulation method reports the table");
    assert_eq!(table.len(), 5);
    // Injected noise can only attenuate: later rows shrink towards zero.
    assert!(table.rows()[4].slope.abs() < table.sentinel().slope.abs());

    assert_eq!(adjusted.effects.len(), stats.len());
    assert_eq!(adjusted.standard_errors.len(), stats.len());
    assert_eq!(adjusted.p_values.len(), stats.len());
    assert!(adjusted.p_values.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn simex_and_closed_form_corrections_agree_on_well_behaved_data() {
    let stats = diluted_stats(500, 555);
    let simex = adjust::adjust(
        &stats,
        None,
        &CorrectionMethod::Simex {
            multipliers: vec![0.5, 1.0, 1.5, 2.0],
            replicates: 200,
            seed: 1,
        },
    )
    .unwrap();
    let cwls = adjust::adjust(&stats, None, &CorrectionMethod::CorrectedWeightedLeastSquares)
        .unwrap();
    assert_relative_eq!(
        simex.correction.slope,
        cwls.correction.slope,
        epsilon = 0.1
    );
}

#[test]
fn adjusted_statistics_serialize_to_json() {
    let stats = diluted_stats(100, 9);
    let adjusted = adjust::adjust(&stats, None, &CorrectionMethod::HedgesOlkin).unwrap();
    let json = serde_json::to_string(&adjusted).unwrap();
    assert!(json.contains("\"slope\""));
    assert!(json.contains("\"p_values\""));
}

#[test]
fn estimate_table_csv_round_trip_through_the_public_surface() {
    let input = reference_input();
    let table = simulate::simulate(&input, &[0.5, 1.0], 50, 3).unwrap();
    let mut buffer = Vec::new();
    table.write_csv(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.starts_with("Lambda,Coefficient,Variance\n"));
    assert_eq!(text.lines().count(), 4);
}
