//! Behavioural properties of the decision engine and sizer.

use assert_matches::assert_matches;
use rstest::rstest;

use probtrader::config::{SizingConfig, StrategyConfig};
use probtrader::risk::{PositionSizer, RewardRiskEstimator};
use probtrader::strategy::{Action, BarInput, DecisionEngine, EngineState, Phase, Reason};
use probtrader::Error;

fn sizer() -> PositionSizer {
    PositionSizer::new(&SizingConfig { min_ratio: 0.05, max_ratio: 0.3, adjust_unit: 50.0, target_vol: 0.015 }).unwrap()
}

fn engine(min_hold_bars: u32) -> DecisionEngine {
    let cfg = StrategyConfig {
        threshold_long: 0.6,
        threshold_short: 0.6,
        take_profit: 0.02,
        stop_loss: 0.01,
        min_hold_bars,
        add_threshold: 0.15,
        max_rebalance_ratio: 0.3,
        min_adjust_amount: 10.0,
        reward_risk: 2.5,
    };
    DecisionEngine::new(sizer(), cfg).unwrap()
}

fn bar(price: f64, long_prob: f64, short_prob: f64) -> BarInput {
    BarInput { price, equity: 1000.0, long_prob, short_prob, money_flow_ratio: 5.0, volatility: 0.01 }
}

#[test]
fn reference_scenario_opens_about_point_nine_units() {
    let mut engine = engine(8);
    let d = engine.on_bar(&bar(100.0, 0.70, 0.20)).unwrap();
    assert_eq!(d.action, Action::Open);
    assert!((d.target_ratio - 0.09).abs() < 0.005);
    assert!((d.delta_qty - 0.9).abs() < 0.05);
    assert_eq!(engine.get_state().hold_bars, 0);
}

#[rstest]
#[case(0.0)]
#[case(0.3)]
#[case(0.5)]
#[case(0.51)]
#[case(0.75)]
#[case(0.99)]
#[case(1.0)]
fn target_ratio_is_bounded(#[case] prob: f64) {
    let s = sizer();
    for vol in [0.0, 0.005, 0.02, 0.5] {
        for mfr in [0.0, 2.5, 5.0] {
            let r = s.calculate_target_ratio(prob, mfr, vol, 2.5);
            assert!((0.0..=0.3).contains(&r), "ratio {r} out of bounds");
            if prob <= 0.5 {
                assert_eq!(r, 0.0);
            }
        }
    }
}

#[rstest]
#[case(0.5)]
#[case(1.0)]
#[case(2.5)]
fn kelly_is_monotone_in_probability(#[case] rr: f64) {
    let s = sizer();
    let mut prev = 0.0;
    for i in 0..=100 {
        let k = s.kelly_fraction(i as f64 / 100.0, rr);
        assert!((0.0..=1.0).contains(&k));
        assert!(k >= prev);
        prev = k;
    }
}

#[test]
fn reward_risk_defaults_on_one_sided_history() {
    let mut est = RewardRiskEstimator::new(20, 1.0);
    est.batch_update(&[0.01; 30]);
    assert_eq!(est.estimate(), 1.0);
    est.batch_update(&[-0.01; 30]);
    assert_eq!(est.estimate(), 1.0);
}

#[test]
fn holding_window_only_yields_hold_until_exit() {
    let mut engine = engine(5);
    engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
    for price in [100.2, 99.5, 100.4] {
        let d = engine.on_bar(&bar(price, 0.1, 0.9)).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_matches!(d.reason, Reason::MinHold { .. });
        assert_eq!(engine.phase(), Phase::Holding);
    }
    let d = engine.on_bar(&bar(98.9, 0.9, 0.1)).unwrap();
    assert_eq!(d.action, Action::Close);
    assert_eq!(d.reason, Reason::StopLoss);
}

#[test]
fn take_profit_ignores_signal() {
    let mut engine = engine(0);
    engine.set_state(-1.0, 100.0, Some(10)).unwrap();
    let d = engine.on_bar(&bar(97.0, 0.1, 0.95)).unwrap();
    assert_eq!(d.action, Action::Close);
    assert_eq!(d.reason, Reason::TakeProfit);
    assert_eq!(d.delta_qty, 1.0);
}

#[test]
fn reversal_takes_two_bars() {
    let mut engine = engine(1);
    engine.set_state(1.0, 100.0, Some(3)).unwrap();

    let close = engine.on_bar(&bar(100.0, 0.1, 0.8)).unwrap();
    assert_eq!(close.action, Action::Close);
    assert_eq!(close.reason, Reason::ReverseClose);
    assert_eq!(engine.get_state(), EngineState::default());

    let open = engine.on_bar(&bar(100.0, 0.1, 0.8)).unwrap();
    assert_eq!(open.action, Action::Open);
    assert!(open.delta_qty < 0.0);
}

#[rstest]
#[case(2.0, 105.0, 0)]
#[case(-0.37, 12.5, 4)]
#[case(0.0, 0.0, 9)]
fn set_state_then_get_state(#[case] position: f64, #[case] entry: f64, #[case] hold: u32) {
    let mut engine = engine(8);
    engine.set_state(position, entry, Some(hold)).unwrap();
    assert_eq!(engine.get_state(), EngineState { position, entry_price: entry, hold_bars: hold });
}

#[test]
fn invalid_sizer_bounds_are_rejected() {
    let bad = SizingConfig { min_ratio: 0.4, max_ratio: 0.3, adjust_unit: 50.0, target_vol: 0.015 };
    assert_matches!(PositionSizer::new(&bad), Err(Error::ConfigError(_)));
}

#[test]
fn out_of_range_probability_is_rejected() {
    let mut engine = engine(8);
    assert_matches!(engine.on_bar(&bar(100.0, 0.7, -0.1)), Err(Error::InvalidInput(_)));
    assert_eq!(engine.get_state(), EngineState::default());
}
