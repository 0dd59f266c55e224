use layerstore::{
    ContextRole, Entity, PersistenceStack, RecordId, Repository, SaveOutcome, StackConfig,
    StackError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Draft {
    record_id: RecordId,
    body: String,
}

impl Entity for Draft {
    const KIND: &'static str = "draft";

    fn blank(id: RecordId) -> Self {
        Self {
            record_id: id,
            body: String::new(),
        }
    }

    fn record_id(&self) -> RecordId {
        self.record_id
    }
}

fn open_stack() -> PersistenceStack {
    PersistenceStack::open(StackConfig::in_memory()).unwrap()
}

#[test]
fn stack_exposes_writer_and_main_contexts() {
    let stack = open_stack();

    assert_eq!(stack.writer_context().role(), ContextRole::Writer);
    assert_eq!(stack.main_context().role(), ContextRole::Main);
    assert_ne!(
        stack.writer_context().id().as_u64(),
        stack.main_context().id().as_u64()
    );
}

#[test]
fn temporary_contexts_are_distinct_workers() {
    let stack = open_stack();

    let first = stack.temporary_context().unwrap();
    let second = stack.temporary_context().unwrap();

    assert_eq!(first.context().role(), ContextRole::Temporary);
    assert_eq!(second.context().role(), ContextRole::Temporary);
    assert_ne!(first.context().id(), second.context().id());
}

#[test]
fn clean_contexts_save_as_no_changes() {
    let stack = open_stack();
    let temp = stack.temporary_context().unwrap();

    let outcome = stack.save_main().unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::NoChanges);

    let outcome = stack.save_writer().unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::NoChanges);

    let outcome = stack.save(temp.context()).unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::NoChanges);
}

#[test]
fn has_changes_tracks_staged_and_saved_state() {
    let stack = open_stack();
    let drafts = Repository::<Draft>::try_new(&stack).unwrap();
    let temp = stack.temporary_context().unwrap();

    assert!(!temp.context().has_changes().unwrap());

    drafts
        .insert_in(temp.context(), |draft| draft.body = "pending".to_string())
        .unwrap();
    assert!(temp.context().has_changes().unwrap());
    assert!(!stack.main_context().has_changes().unwrap());

    let outcome = stack.save(temp.context()).unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::Persisted { applied: 1 });

    assert!(!temp.context().has_changes().unwrap());
    assert!(!stack.main_context().has_changes().unwrap());
    assert!(!stack.writer_context().has_changes().unwrap());
}

#[test]
fn unsaved_temporary_changes_are_invisible_to_main() {
    let stack = open_stack();
    let drafts = Repository::<Draft>::try_new(&stack).unwrap();
    let temp = stack.temporary_context().unwrap();

    let draft = drafts
        .insert_in(temp.context(), |draft| draft.body = "scoped".to_string())
        .unwrap();

    let on_temp = drafts.fetch_in(temp.context(), None).unwrap();
    assert_eq!(on_temp.len(), 1);
    assert_eq!(on_temp[0].record_id(), draft.record_id());

    assert!(drafts.fetch(None).unwrap().is_empty());
}

#[test]
fn main_staged_changes_are_invisible_to_the_writer_view() {
    let stack = open_stack();
    let drafts = Repository::<Draft>::try_new(&stack).unwrap();

    drafts
        .insert_in(stack.main_context(), |draft| draft.body = "layered".to_string())
        .unwrap();

    assert_eq!(drafts.fetch(None).unwrap().len(), 1);
    assert!(drafts
        .fetch_in(stack.writer_context(), None)
        .unwrap()
        .is_empty());
}

#[test]
fn dropping_an_unsaved_temporary_context_discards_its_changes() {
    let stack = open_stack();
    let drafts = Repository::<Draft>::try_new(&stack).unwrap();

    let temp = stack.temporary_context().unwrap();
    drafts
        .insert_in(temp.context(), |draft| draft.body = "discarded".to_string())
        .unwrap();
    drop(temp);

    assert!(drafts.fetch(None).unwrap().is_empty());
    let outcome = stack.save_main().unwrap().wait().unwrap();
    assert_eq!(outcome, SaveOutcome::NoChanges);
}

#[test]
fn dropped_temporary_context_reports_context_closed() {
    let stack = open_stack();

    let temp = stack.temporary_context().unwrap();
    let handle = temp.context().clone();
    drop(temp);

    assert!(matches!(
        handle.has_changes(),
        Err(StackError::ContextClosed)
    ));
    assert!(matches!(
        stack.save(&handle),
        Err(StackError::ContextClosed)
    ));
}
