//! Per-user session state, history loading and retention trimming.

use ember_common::{Turn, UserId};
use ember_memory::HistoryStore;

/// Rows fetched per history query.
const PAGE_SIZE: usize = 50;

/// In-memory conversation of one user.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) turns: Vec<Turn>,
    pub(crate) loaded: bool,
    /// Turns of a finished round whose write to durable history failed.
    pub(crate) pending: Vec<Turn>,
}

impl Session {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// True while a finished round still waits to be written.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn rounds(&self) -> usize {
        count_user_turns(&self.turns)
    }
}

pub fn count_user_turns(turns: &[Turn]) -> usize {
    turns.iter().filter(|t| t.is_user()).count()
}

/// Drop the oldest turns so at most `max_rounds` user turns remain.
///
/// The cut lands on the oldest kept user turn. Nothing is trimmed when the
/// bound is not reached or `max_rounds <= 0`.
pub fn trim_to_rounds(turns: &mut Vec<Turn>, max_rounds: i64) {
    if max_rounds <= 0 {
        return;
    }
    let max = max_rounds as usize;

    let mut rounds = 0;
    for i in (0..turns.len()).rev() {
        if turns[i].is_user() {
            rounds += 1;
            if rounds == max {
                turns.drain(..i);
                return;
            }
        }
    }
}

/// Load the most recent `max_rounds` user rounds of history, oldest first.
///
/// Pages newest-first and stops at the `max_rounds`-th user turn; with
/// `max_rounds <= 0` the whole history is loaded. An undecodable record ends
/// the load there, keeping the newer turns from their oldest user turn on.
pub async fn load_history<S: HistoryStore + ?Sized>(
    store: &S,
    user_id: UserId,
    max_rounds: i64,
) -> anyhow::Result<Vec<Turn>> {
    let limit = (max_rounds > 0).then_some(max_rounds as usize);
    let mut newest_first = Vec::new();
    let mut rounds = 0;
    let mut offset = 0;
    let mut queries = 0;
    let mut corrupt = false;

    'pages: loop {
        let page = store.history_page(user_id, offset, PAGE_SIZE).await?;
        queries += 1;
        if page.is_empty() {
            break;
        }
        offset += page.len();

        for record in page {
            let turn = match record.turn() {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        record_id = record.id,
                        error = %e,
                        "Undecodable history record, ignoring it and everything older"
                    );
                    corrupt = true;
                    break 'pages;
                }
            };
            let is_user = turn.is_user();
            newest_first.push(turn);
            if is_user {
                rounds += 1;
                if limit.is_some_and(|max| rounds >= max) {
                    break 'pages;
                }
            }
        }
    }

    newest_first.reverse();

    // Without the older context, start from a complete round.
    if corrupt {
        let first_user = newest_first
            .iter()
            .position(Turn::is_user)
            .unwrap_or(newest_first.len());
        newest_first.drain(..first_user);
    }

    tracing::info!(
        user_id,
        queries,
        loaded_messages = newest_first.len(),
        max_rounds,
        rounds_in_memory = count_user_turns(&newest_first),
        "Session history loaded"
    );

    Ok(newest_first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_memory::SqliteStore;
    use tempfile::TempDir;

    fn round(n: usize) -> Vec<Turn> {
        vec![
            Turn::system(format!("Current time: t{n}")),
            Turn::user(format!("u{n}")),
            Turn::assistant(format!("a{n}"), vec![]),
        ]
    }

    fn rounds(count: usize) -> Vec<Turn> {
        (1..=count).flat_map(round).collect()
    }

    #[test]
    fn trim_keeps_last_rounds_from_user_turn() {
        let mut turns = rounds(3);
        trim_to_rounds(&mut turns, 2);

        assert_eq!(count_user_turns(&turns), 2);
        assert_eq!(turns[0], Turn::user("u2"));
        assert_eq!(turns.last(), Some(&Turn::assistant("a3", vec![])));
        assert_eq!(turns.len(), 5);
    }

    #[test]
    fn trim_below_bound_is_noop() {
        let mut turns = rounds(2);
        trim_to_rounds(&mut turns, 3);
        assert_eq!(turns, rounds(2));
    }

    #[test]
    fn trim_non_positive_means_unlimited() {
        for max in [0, -1] {
            let mut turns = rounds(5);
            trim_to_rounds(&mut turns, max);
            assert_eq!(turns.len(), 15);
        }
    }

    #[test]
    fn trim_exactly_at_bound_drops_leading_context() {
        let mut turns = rounds(2);
        trim_to_rounds(&mut turns, 2);
        assert_eq!(turns[0], Turn::user("u1"));
        assert_eq!(count_user_turns(&turns), 2);
    }

    #[tokio::test]
    async fn load_stops_at_retention_window() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("ember.db")).unwrap();
        store.append_history(1, &rounds(4)).await.unwrap();

        let loaded = load_history(&store, 1, 2).await.unwrap();
        assert_eq!(count_user_turns(&loaded), 2);
        assert_eq!(loaded[0], Turn::user("u3"));
        assert_eq!(loaded.last(), Some(&Turn::assistant("a4", vec![])));
    }

    #[tokio::test]
    async fn load_pages_through_everything_when_unlimited() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("ember.db")).unwrap();
        // 40 rounds = 120 rows, three pages
        let all = rounds(40);
        store.append_history(1, &all).await.unwrap();

        let loaded = load_history(&store, 1, 0).await.unwrap();
        assert_eq!(loaded, all);
    }

    #[tokio::test]
    async fn load_empty_history() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("ember.db")).unwrap();
        assert!(load_history(&store, 1, 20).await.unwrap().is_empty());
    }
}
