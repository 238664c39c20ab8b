//! Randomized invariants for the battery optimizer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spiral_core::{
    slice_waypoint_count, BatteryOptimizer, GeoPoint, HeightBounds, NoopObserver, PathBuilder,
    PlanError, PlannerConfig,
};

#[test]
fn optimizer_output_always_fits_budget() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut accepted = 0;

    for _ in 0..300 {
        let config = PlannerConfig {
            midpoints_per_segment: rng.random_range(0..=5),
            ..PlannerConfig::default()
        };
        let batteries = rng.random_range(1..=8u32);
        let minutes = rng.random_range(0.5..45.0);
        let lat = rng.random_range(-70.0..70.0);
        let lon = rng.random_range(-180.0..180.0);

        let optimizer = BatteryOptimizer::new(&config, &NoopObserver);
        match optimizer.optimize_spiral_for_battery(minutes, batteries, lat, lon) {
            Ok(result) => {
                accepted += 1;
                let p = result.parameters;
                let share = config.planning_budget() / batteries as usize;
                assert!(p.r_hold_ft > p.r0_ft && p.r0_ft > 0.0);
                assert!(result.estimated_waypoints <= share);
                assert!(slice_waypoint_count(p.bounces, config.midpoints_per_segment) * batteries as usize
                    <= config.planning_budget());
                assert!((result.estimated_minutes - minutes).abs() / minutes < 1e-6);

                let builder = PathBuilder::new(
                    GeoPoint::new(lat, lon),
                    HeightBounds::new(100.0, 250.0),
                    config.midpoints_per_segment,
                )
                .unwrap();
                let slice = builder.build_slice(batteries - 1, &p).unwrap();
                assert_eq!(slice.len(), result.estimated_waypoints);
            }
            Err(PlanError::BudgetExceeded { required, available }) => {
                assert!(required > available);
            }
            Err(PlanError::InvalidRequest(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(accepted > 100, "only {accepted} requests accepted");
}

#[test]
fn longer_flights_never_lose_bounces() {
    let config = PlannerConfig::default();
    let optimizer = BatteryOptimizer::new(&config, &NoopObserver);
    let mut previous = (0, 0.0);
    for minutes in [4.0, 8.0, 16.0, 32.0] {
        let result = optimizer
            .optimize_spiral_for_battery(minutes, 2, 51.4779, -0.0015)
            .unwrap();
        assert!(result.parameters.bounces >= previous.0);
        assert!(result.estimated_length_ft > previous.1);
        previous = (result.parameters.bounces, result.estimated_length_ft);
    }
}
