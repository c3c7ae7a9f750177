use common::TransitionKind;

/// Edge-triggered classification of a move from `previous` to `value`.
///
/// Staying on one side of a threshold never fires; only the step that crosses
/// it does. Without a previous value there is no edge.
pub fn classify(
    previous: Option<f64>,
    value: f64,
    overbought_level: f64,
    oversold_level: f64,
) -> TransitionKind {
    let Some(prev) = previous else {
        return TransitionKind::None;
    };

    if prev < overbought_level && value >= overbought_level {
        TransitionKind::CrossoverOverbought
    } else if prev > oversold_level && value <= oversold_level {
        TransitionKind::CrossoverOversold
    } else if prev >= overbought_level && value < overbought_level {
        TransitionKind::ExitOverbought
    } else if prev <= oversold_level && value > oversold_level {
        TransitionKind::ExitOversold
    } else {
        TransitionKind::None
    }
}
