use proptest::prelude::*;
use strategies::cascade::{cascade_probability, cluster_positions, PriceCluster};
use strategies::regime::{build_transition_matrix, stability, NUM_STATES};
use strategies::stress::{adequacy_score, simulate_scenario, EntityState, SCENARIOS};

proptest! {
    /// Every transition-matrix row sums to 1 (±1e-9) or exactly 0.
    #[test]
    fn transition_rows_sum_to_one_or_zero(states in prop::collection::vec(0usize..NUM_STATES, 0..200)) {
        let matrix = build_transition_matrix(&states, NUM_STATES);
        for row in &matrix {
            let sum: f64 = row.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9 || sum == 0.0, "row sum was {}", sum);
        }
        let s = stability(&matrix);
        prop_assert!((0.0..=1.0).contains(&s));
    }

    /// Cascade probability is a probability for any cluster/pattern mix.
    #[test]
    fn cascade_probability_is_bounded(
        cluster_specs in prop::collection::vec((1.0f64..1_000_000.0, 1usize..50, 0.1f64..1_000_000.0), 0..20),
        pattern_sizes in prop::collection::vec(1usize..100, 0..20),
        avg_concentration in 0.0f64..=1.0,
        min_cascade_size in 1usize..10,
    ) {
        let clusters: Vec<PriceCluster> = cluster_specs
            .into_iter()
            .map(|(anchor_price, position_count, total_size)| PriceCluster {
                anchor_price,
                position_count,
                total_size,
            })
            .collect();
        let p = cascade_probability(&clusters, &pattern_sizes, avg_concentration, min_cascade_size);
        prop_assert!((0.0..=1.0).contains(&p), "probability was {}", p);
    }

    /// Clustering preserves every positively-priced position exactly once.
    #[test]
    fn clustering_partitions_positions(
        positions in prop::collection::vec((1.0f64..100_000.0, 0.1f64..10_000.0), 0..100),
        proximity in 0.001f64..0.1,
    ) {
        let clusters = cluster_positions(&positions, proximity);
        let clustered: usize = clusters.iter().map(|c| c.position_count).sum();
        prop_assert_eq!(clustered, positions.len());
    }

    /// Stress outcomes stay in unit ranges for any plausible entity state.
    #[test]
    fn stress_scores_are_bounded(
        total_exposure in 0.0f64..1e12,
        leverage_utilization in 0.0f64..=1.0,
        concentration_risk in 0.0f64..=1.0,
        position_count in 0.0f64..100_000.0,
        balance in 0.0f64..1e12,
        volatility in 0.0f64..10.0,
        liquidity_ratio in 0.0f64..5.0,
        horizon in 1.0f64..720.0,
    ) {
        let state = EntityState {
            total_exposure,
            leverage_utilization,
            concentration_risk,
            position_count,
            balance,
            volatility,
            liquidity_ratio,
        };
        let outcomes: Vec<_> = SCENARIOS
            .iter()
            .map(|s| simulate_scenario(s, &state, horizon))
            .collect();
        for outcome in &outcomes {
            prop_assert!((0.0..=1.0).contains(&outcome.drawdown));
            prop_assert!((0.0..=1.0).contains(&outcome.survivability));
            prop_assert!((0.0..=1.0).contains(&outcome.loss_ratio));
            prop_assert!((0.0..=1.0).contains(&outcome.system_impact));
            prop_assert!(outcome.recovery_time >= 0.0);
        }
        let adequacy = adequacy_score(&outcomes);
        prop_assert!((0.0..=1.0).contains(&adequacy));
    }
}
