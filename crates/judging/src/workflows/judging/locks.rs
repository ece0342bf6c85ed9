use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::domain::{Stage, SubmissionId};

/// One mutex per (submission, stage) so scoring, conflict detection and advancement for a key
/// run one at a time while unrelated keys proceed in parallel.
#[derive(Debug, Default)]
pub(crate) struct StageLocks {
    table: Mutex<HashMap<(SubmissionId, Stage), Arc<Mutex<()>>>>,
}

impl StageLocks {
    pub(crate) fn handle(&self, submission_id: &SubmissionId, stage: Stage) -> Arc<Mutex<()>> {
        let mut guard = self.table.lock().expect("lock table poisoned");
        guard
            .entry((submission_id.clone(), stage))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_mutex() {
        let locks = StageLocks::default();
        let id = SubmissionId("sub-1".to_string());
        let first = locks.handle(&id, Stage::Triage);
        let second = locks.handle(&id, Stage::Triage);
        let other = locks.handle(&id, Stage::Preliminary);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
