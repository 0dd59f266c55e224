use layerstore::{Entity, PersistenceStack, RecordId, Repository, SaveOutcome, StackConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    record_id: RecordId,
    label: String,
}

impl Entity for Entry {
    const KIND: &'static str = "entry";

    fn blank(id: RecordId) -> Self {
        Self {
            record_id: id,
            label: String::new(),
        }
    }

    fn record_id(&self) -> RecordId {
        self.record_id
    }
}

#[test]
fn concurrent_temporary_saves_lose_no_updates() {
    let stack = PersistenceStack::open(StackConfig::in_memory()).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let stack = &stack;
            scope.spawn(move || {
                let entries = Repository::<Entry>::try_new(stack).unwrap();
                let temp = stack.temporary_context().unwrap();
                let (_, receipt) = entries
                    .create_in(temp.context(), |entry| {
                        entry.label = format!("worker-{worker}");
                    })
                    .unwrap();

                // A sibling's cascade may have batched this context's
                // staged changes ahead of our own save.
                let outcome = receipt.wait().unwrap();
                assert!(matches!(
                    outcome,
                    SaveOutcome::Persisted { .. } | SaveOutcome::NoChanges
                ));
            });
        }
    });

    let entries = Repository::<Entry>::try_new(&stack).unwrap();
    let fetched = entries.fetch(None).unwrap();
    assert_eq!(fetched.len(), 4);

    let labels: HashSet<String> = fetched.into_iter().map(|entry| entry.label).collect();
    assert_eq!(labels.len(), 4);
}

#[test]
fn parallel_writer_creates_all_persist() {
    let stack = PersistenceStack::open(StackConfig::in_memory()).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let stack = &stack;
            scope.spawn(move || {
                let entries = Repository::<Entry>::try_new(stack).unwrap();
                let (_, receipt) = entries
                    .create(|entry| entry.label = format!("writer-{worker}"))
                    .unwrap();
                let outcome = receipt.wait().unwrap();
                assert!(matches!(
                    outcome,
                    SaveOutcome::Persisted { .. } | SaveOutcome::NoChanges
                ));
            });
        }
    });

    let entries = Repository::<Entry>::try_new(&stack).unwrap();
    assert_eq!(entries.fetch(None).unwrap().len(), 8);
}

#[test]
fn sibling_temporary_contexts_stay_isolated_until_saved() {
    let stack = PersistenceStack::open(StackConfig::in_memory()).unwrap();
    let entries = Repository::<Entry>::try_new(&stack).unwrap();

    let first = stack.temporary_context().unwrap();
    let second = stack.temporary_context().unwrap();

    entries
        .insert_in(first.context(), |entry| entry.label = "isolated".to_string())
        .unwrap();

    assert_eq!(entries.fetch_in(first.context(), None).unwrap().len(), 1);
    assert!(entries.fetch_in(second.context(), None).unwrap().is_empty());
    assert!(entries.fetch(None).unwrap().is_empty());

    let outcome = stack.save(first.context()).unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::Persisted { applied: 1 });

    assert_eq!(entries.fetch_in(second.context(), None).unwrap().len(), 1);
    assert_eq!(entries.fetch(None).unwrap().len(), 1);
}
