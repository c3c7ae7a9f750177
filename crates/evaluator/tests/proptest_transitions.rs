use common::{TransitionKind, Zone};
use evaluator::classify;
use proptest::prelude::*;

fn levels() -> impl Strategy<Value = (f64, f64)> {
    (1.0f64..99.0).prop_flat_map(|oversold| (Just(oversold), (oversold + 0.5)..=100.0))
        .prop_map(|(os, ob)| (ob, os))
}

proptest! {
    /// Two readings in the same zone never fire.
    #[test]
    fn same_zone_never_fires(
        (ob, os) in levels(),
        a in 0.0f64..=100.0,
        b in 0.0f64..=100.0,
    ) {
        prop_assume!(Zone::classify(a, ob, os) == Zone::classify(b, ob, os));
        prop_assert_eq!(classify(Some(a), b, ob, os), TransitionKind::None);
    }

    /// Any change of zone fires something.
    #[test]
    fn zone_change_always_fires(
        (ob, os) in levels(),
        a in 0.0f64..=100.0,
        b in 0.0f64..=100.0,
    ) {
        prop_assume!(Zone::classify(a, ob, os) != Zone::classify(b, ob, os));
        prop_assert!(classify(Some(a), b, ob, os).is_trigger());
    }

    /// The kind names the zone the value lands in, or the one it left.
    #[test]
    fn kind_agrees_with_zones(
        (ob, os) in levels(),
        a in 0.0f64..=100.0,
        b in 0.0f64..=100.0,
    ) {
        let from = Zone::classify(a, ob, os);
        let to = Zone::classify(b, ob, os);
        match classify(Some(a), b, ob, os) {
            TransitionKind::CrossoverOverbought => prop_assert_eq!(to, Zone::Overbought),
            TransitionKind::CrossoverOversold => prop_assert_eq!(to, Zone::Oversold),
            TransitionKind::ExitOverbought => prop_assert_eq!(from, Zone::Overbought),
            TransitionKind::ExitOversold => prop_assert_eq!(from, Zone::Oversold),
            TransitionKind::None => prop_assert_eq!(from, to),
        }
    }

    /// No previous reading, no edge.
    #[test]
    fn first_reading_never_fires((ob, os) in levels(), v in 0.0f64..=100.0) {
        prop_assert_eq!(classify(None, v, ob, os), TransitionKind::None);
    }
}
