use std::collections::VecDeque;

/// The most recent explicit page requests, oldest first.
#[derive(Debug, Clone)]
pub struct NavigationHistory {
    limit: usize,
    requests: VecDeque<usize>,
}

impl NavigationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            requests: VecDeque::with_capacity(limit),
        }
    }

    pub fn push(&mut self, index: usize) {
        if self.limit == 0 {
            return;
        }
        self.requests.push_back(index);
        while self.requests.len() > self.limit {
            self.requests.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.requests.iter().copied().collect()
    }
}

/// Maps recent requests to the pages most likely to be requested next.
pub trait NavigationPredictor {
    fn predict(&self, history: &[usize], count: usize) -> Vec<usize>;
}

/// Extrapolates the dominant step between consecutive requests.
///
/// The step seen most often wins; ties go to the most recent one. With no
/// usable step (fewer than two requests, or only repeats) the pages right
/// after the last request are predicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepPredictor;

impl StepPredictor {
    fn dominant_step(history: &[usize]) -> Option<i64> {
        let mut counts: Vec<(i64, usize, usize)> = Vec::new();
        for (position, pair) in history.windows(2).enumerate() {
            let step = pair[1] as i64 - pair[0] as i64;
            if step == 0 {
                continue;
            }
            match counts.iter_mut().find(|(s, _, _)| *s == step) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = position;
                }
                None => counts.push((step, 1, position)),
            }
        }
        counts
            .into_iter()
            .max_by_key(|&(_, seen, last)| (seen, last))
            .map(|(step, _, _)| step)
    }
}

impl NavigationPredictor for StepPredictor {
    fn predict(&self, history: &[usize], count: usize) -> Vec<usize> {
        let Some(&last) = history.last() else {
            return Vec::new();
        };
        let step = Self::dominant_step(history).unwrap_or(1);
        let mut predicted = Vec::with_capacity(count);
        let mut cursor = last as i64;
        for _ in 0..count {
            cursor += step;
            if cursor < 0 {
                break;
            }
            let page = cursor as usize;
            if !predicted.contains(&page) {
                predicted.push(page);
            }
        }
        predicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_most_recent_requests() {
        let mut history = NavigationHistory::new(5);
        for page in [2, 3, 4] {
            history.push(page);
        }
        history.push(5);
        history.push(6);
        assert_eq!(history.to_vec(), vec![2, 3, 4, 5, 6]);
        history.push(7);
        assert_eq!(history.to_vec(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn zero_sized_history_records_nothing() {
        let mut history = NavigationHistory::new(0);
        history.push(1);
        assert!(history.is_empty());
    }

    #[test]
    fn predicts_forward_reading() {
        let predicted = StepPredictor.predict(&[2, 3, 4], 3);
        assert_eq!(predicted, vec![5, 6, 7]);
    }

    #[test]
    fn predicts_spread_turns_backwards() {
        let predicted = StepPredictor.predict(&[12, 10, 8], 5);
        assert_eq!(predicted, vec![6, 4, 2, 0]);
    }

    #[test]
    fn dominant_step_beats_a_single_jump() {
        let predicted = StepPredictor.predict(&[2, 4, 6, 20, 22], 2);
        assert_eq!(predicted, vec![24, 26]);
    }

    #[test]
    fn single_request_predicts_following_pages() {
        assert_eq!(StepPredictor.predict(&[9], 2), vec![10, 11]);
        assert!(StepPredictor.predict(&[], 4).is_empty());
    }
}
