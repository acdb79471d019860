use crate::error::{BenchError, Result};

/// A contiguous run of one request's sequences placed in a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledGroup {
    /// Index into the submitted request list
    pub request_id: usize,
    /// Index of the first sequence of the request in this group
    pub first_seq: usize,
    pub num_seqs: usize,
}

/// Sequences processed together, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingStep {
    pub groups: Vec<ScheduledGroup>,
    pub num_seqs: usize,
    /// Prompt tokens prefilled by the step, counted once per group
    pub num_batched_tokens: usize,
}

/// Packs requests into steps bounded by a sequence count and a prompt-token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    max_num_seqs: usize,
    max_num_batched_tokens: usize,
}

impl Scheduler {
    pub fn new(max_num_seqs: usize, max_num_batched_tokens: usize) -> Self {
        Self {
            max_num_seqs,
            max_num_batched_tokens,
        }
    }

    /// Split requests with the given prompt lengths into steps. Each request
    /// needs `seqs_per_request` sequences; when they do not fit in one step
    /// they continue in the next.
    pub fn schedule(&self, prompt_lens: &[usize], seqs_per_request: usize) -> Result<Vec<SchedulingStep>> {
        if self.max_num_seqs == 0 {
            return Err(BenchError::config("max_num_seqs", "Must be at least 1"));
        }

        let mut steps = Vec::new();
        let mut current = SchedulingStep::default();

        for (request_id, &prompt_len) in prompt_lens.iter().enumerate() {
            if prompt_len > self.max_num_batched_tokens {
                return Err(BenchError::processing(format!(
                    "Prompt {} has {} tokens, exceeding max_num_batched_tokens ({})",
                    request_id, prompt_len, self.max_num_batched_tokens
                )));
            }

            let mut first_seq = 0;
            while first_seq < seqs_per_request {
                let seqs_full = current.num_seqs == self.max_num_seqs;
                let tokens_full = current.num_batched_tokens + prompt_len > self.max_num_batched_tokens;
                if !current.groups.is_empty() && (seqs_full || tokens_full) {
                    steps.push(std::mem::take(&mut current));
                }

                let num_seqs = (seqs_per_request - first_seq).min(self.max_num_seqs - current.num_seqs);
                current.groups.push(ScheduledGroup {
                    request_id,
                    first_seq,
                    num_seqs,
                });
                current.num_seqs += num_seqs;
                current.num_batched_tokens += prompt_len;
                first_seq += num_seqs;
            }
        }

        if !current.groups.is_empty() {
            steps.push(current);
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request_ids(step: &SchedulingStep) -> Vec<usize> {
        step.groups.iter().map(|g| g.request_id).collect()
    }

    #[test]
    fn test_single_step_when_everything_fits() {
        let scheduler = Scheduler::new(8, 2048);
        let steps = scheduler.schedule(&[6, 9, 7, 7], 1).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(request_ids(&steps[0]), vec![0, 1, 2, 3]);
        assert_eq!(steps[0].num_seqs, 4);
        assert_eq!(steps[0].num_batched_tokens, 29);
    }

    #[test]
    fn test_split_by_sequence_limit() {
        let scheduler = Scheduler::new(1, 2048);
        let steps = scheduler.schedule(&[6, 9, 7, 7], 1).unwrap();
        assert_eq!(steps.len(), 4);
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(request_ids(step), vec![i]);
        }

        // three completions per request, room for two requests per step
        let scheduler = Scheduler::new(6, 2048);
        let steps = scheduler.schedule(&[6, 9, 7, 7], 3).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.num_seqs == 6));
    }

    #[test]
    fn test_request_sequences_continue_in_next_step() {
        // n = 3 with room for two sequences per step
        let scheduler = Scheduler::new(2, 2048);
        let steps = scheduler.schedule(&[5, 4], 3).unwrap();

        let groups: Vec<Vec<ScheduledGroup>> = steps.iter().map(|s| s.groups.clone()).collect();
        assert_eq!(
            groups,
            vec![
                vec![ScheduledGroup { request_id: 0, first_seq: 0, num_seqs: 2 }],
                vec![
                    ScheduledGroup { request_id: 0, first_seq: 2, num_seqs: 1 },
                    ScheduledGroup { request_id: 1, first_seq: 0, num_seqs: 1 },
                ],
                vec![ScheduledGroup { request_id: 1, first_seq: 1, num_seqs: 2 }],
            ]
        );
        assert!(steps.iter().all(|s| s.num_seqs <= 2));
        assert_eq!(steps[1].num_batched_tokens, 9);
    }

    #[test]
    fn test_split_by_token_budget() {
        let scheduler = Scheduler::new(8, 16);
        let steps = scheduler.schedule(&[6, 9, 7, 7], 1).unwrap();
        let ids: Vec<Vec<usize>> = steps.iter().map(request_ids).collect();
        assert_eq!(ids, vec![vec![0, 1], vec![2, 3]]);
        assert!(steps.iter().all(|s| s.num_batched_tokens <= 16));
    }

    #[test]
    fn test_order_preserved() {
        let scheduler = Scheduler::new(3, 100);
        let lens = [10, 50, 40, 5, 5, 90, 1];
        for seqs_per_request in [1, 2, 5] {
            let steps = scheduler.schedule(&lens, seqs_per_request).unwrap();
            let mut seen: Vec<(usize, usize)> = Vec::new();
            for step in &steps {
                assert!(step.num_seqs <= 3);
                assert!(step.num_batched_tokens <= 100);
                for group in &step.groups {
                    seen.extend((group.first_seq..group.first_seq + group.num_seqs).map(|s| (group.request_id, s)));
                }
            }
            let expected: Vec<(usize, usize)> = (0..lens.len())
                .flat_map(|r| (0..seqs_per_request).map(move |s| (r, s)))
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_oversized_prompt_rejected() {
        let scheduler = Scheduler::new(8, 16);
        assert!(scheduler.schedule(&[4, 17], 1).is_err());
    }

    #[test]
    fn test_empty_input() {
        let scheduler = Scheduler::new(8, 16);
        assert!(scheduler.schedule(&[], 1).unwrap().is_empty());
    }
}
