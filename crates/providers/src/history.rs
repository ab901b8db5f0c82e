use crate::traits::HistoryTurn;

/// Bound the history sent with a request.
///
/// Keeps the last `limit` turns, then drops the oldest until the combined
/// message length fits `char_budget`. The most recent turn is always kept,
/// even when it alone exceeds the budget.
pub fn clamp_history(turns: &[HistoryTurn], limit: usize, char_budget: usize) -> Vec<HistoryTurn> {
    let recent = &turns[turns.len().saturating_sub(limit)..];
    let lengths: Vec<usize> = recent.iter().map(|t| t.message.chars().count()).collect();

    let mut total: usize = lengths.iter().sum();
    let mut start = 0;
    while total > char_budget && recent.len() - start > 1 {
        total -= lengths[start];
        start += 1;
    }
    recent[start..].to_vec()
}
