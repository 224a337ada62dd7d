/// One unit of work: `len` consecutive message ids starting at `start_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    /// Position in the plan, 0-based
    pub index: u64,
    /// First message id, ids start at 1
    pub start_id: u64,
    pub len: u64,
    /// Logical worker the batch belongs to, 0-based
    pub worker_id: u32,
}

impl BatchSpec {
    /// Last message id covered by the batch (inclusive).
    pub fn end_id(&self) -> u64 {
        self.start_id + self.len - 1
    }
}

/// Deterministic split of a run into batches.
///
/// Messages are first shared between workers (`total / workers`, plus one for
/// the first `total % workers` workers), then each share is cut into batches
/// of `batch_size` with a shorter final batch for the remainder. Ids are
/// assigned consecutively from 1 across workers, so every id in
/// `1..=total` appears in exactly one batch.
#[derive(Debug, Clone)]
pub struct WorkPlan {
    batches: Vec<BatchSpec>,
    total_messages: u64,
}

impl WorkPlan {
    pub fn new(total_messages: u64, workers: u32, batch_size: u64) -> Self {
        let mut batches = Vec::new();
        if workers == 0 || batch_size == 0 {
            return Self {
                batches,
                total_messages: 0,
            };
        }

        let mut next_id = 1u64;
        let mut index = 0u64;
        for worker_id in 0..workers {
            let mut remaining = worker_share(total_messages, workers, worker_id);
            while remaining > 0 {
                let len = remaining.min(batch_size);
                batches.push(BatchSpec {
                    index,
                    start_id: next_id,
                    len,
                    worker_id,
                });
                index += 1;
                next_id += len;
                remaining -= len;
            }
        }

        Self {
            batches,
            total_messages,
        }
    }

    pub fn batches(&self) -> &[BatchSpec] {
        &self.batches
    }

    pub fn total_batches(&self) -> u64 {
        self.batches.len() as u64
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }
}

/// Messages assigned to `worker_idx` when `total` is spread over `workers`.
pub fn worker_share(total: u64, workers: u32, worker_idx: u32) -> u64 {
    if workers == 0 {
        return 0;
    }
    let base = total / workers as u64;
    let rem = total % workers as u64;
    if (worker_idx as u64) < rem {
        base.saturating_add(1)
    } else {
        base
    }
}
