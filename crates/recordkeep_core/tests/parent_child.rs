use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recordkeep_core::db::open_db_in_memory;
use recordkeep_core::{
    Aggregate, AggregateFactory, ChangeKind, DomainError, RecordingSink, SqliteRecordRepository,
};

type TestAggregate<'f> = Aggregate<'f, SqliteRecordRepository<'f>, &'f RecordingSink>;

#[test]
fn adopt_updates_both_sides_in_memory_only() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("p").unwrap();
    let mut child = factory.create_new("c").unwrap();
    parent.save().unwrap();
    child.save().unwrap();
    sink.reset();

    parent.adopt(&mut child).unwrap();

    assert_eq!(child.parent_natural_id().unwrap(), Some("p"));
    assert!(parent.children().unwrap().contains("c"));
    assert!(parent.is_changed());
    assert!(child.is_changed());
    assert!(sink.is_empty());
    assert!(factory.find_owned("p").unwrap().is_empty());
}

#[test]
fn saving_child_does_not_advance_parent_version() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("p").unwrap();
    let mut child = factory.create_new("c").unwrap();
    parent.save().unwrap();
    child.save().unwrap();
    sink.reset();

    parent.adopt(&mut child).unwrap();
    child.save().unwrap();

    assert_eq!(child.version().unwrap(), 2);
    assert_eq!(parent.version().unwrap(), 1);
    let stored_parent = factory.find_existing("p").unwrap().unwrap();
    assert_eq!(stored_parent.version().unwrap(), 1);
    assert!(stored_parent.children().unwrap().is_empty());

    let owned = factory.find_owned("p").unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].natural_id().unwrap(), "c");

    parent.save().unwrap();
    assert_eq!(parent.version().unwrap(), 2);
    assert_eq!(child.version().unwrap(), 2);

    let events = sink.take();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.kind() == ChangeKind::Updated));
    assert_eq!(events[0].natural_id(), "c");
    assert_eq!(events[1].natural_id(), "p");
}

#[test]
fn release_reverses_adopt() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("p").unwrap();
    let mut child = factory.create_new("c").unwrap();
    parent.adopt(&mut child).unwrap();
    parent.save().unwrap();
    child.save().unwrap();

    parent.release(&mut child).unwrap();
    assert_eq!(child.parent_natural_id().unwrap(), None);
    assert!(parent.children().unwrap().is_empty());

    parent.save().unwrap();
    child.save().unwrap();
    assert!(factory.find_owned("p").unwrap().is_empty());
    assert_eq!(parent.version().unwrap(), 2);
    assert_eq!(child.version().unwrap(), 2);
}

#[test]
fn adopt_and_release_reject_invalid_pairs() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut first = factory.create_new("p1").unwrap();
    let mut second = factory.create_new("p2").unwrap();
    let mut child = factory.create_new("c").unwrap();

    first.adopt(&mut child).unwrap();
    assert!(matches!(
        second.adopt(&mut child),
        Err(DomainError::InvalidState(_))
    ));
    assert!(matches!(
        second.release(&mut child),
        Err(DomainError::InvalidState(_))
    ));
    assert!(second.children().unwrap().is_empty());
    assert_eq!(child.parent_natural_id().unwrap(), Some("p1"));

    // Adopting again is a no-op on both sides.
    first.adopt(&mut child).unwrap();
    assert_eq!(first.children().unwrap().len(), 1);

    let mut same = factory.create_new("p1").unwrap();
    assert!(matches!(
        first.adopt(&mut same),
        Err(DomainError::InvalidState(_))
    ));
}

#[test]
fn delete_requires_relationship_to_be_released() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("p").unwrap();
    let mut child = factory.create_new("c").unwrap();
    parent.adopt(&mut child).unwrap();
    parent.save().unwrap();
    child.save().unwrap();
    sink.reset();

    assert!(matches!(parent.delete(), Err(DomainError::InvalidState(_))));
    assert!(matches!(child.delete(), Err(DomainError::InvalidState(_))));
    assert!(sink.is_empty());

    parent.release(&mut child).unwrap();
    child.save().unwrap();
    parent.save().unwrap();
    child.delete().unwrap();
    parent.delete().unwrap();

    assert!(factory.all().unwrap().is_empty());
    let kinds: Vec<ChangeKind> = sink.take().iter().map(|event| event.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::Updated,
            ChangeKind::Updated,
            ChangeKind::Deleted,
            ChangeKind::Deleted
        ]
    );
}

#[test]
fn assigning_child_advances_parent_version_on_parent_next_save() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("a").unwrap();
    let mut child = factory.create_new("p").unwrap();
    parent.save().unwrap();
    child.save().unwrap();

    child.assign_to(&mut parent).unwrap();
    assert!(parent.children().unwrap().contains("p"));

    child.save().unwrap();
    assert_eq!(parent.version().unwrap(), 1);

    assert!(parent.save().unwrap().changed);
    assert_eq!(parent.version().unwrap(), 2);
    assert_eq!(child.version().unwrap(), 2);

    let stored_parent = factory.find_existing("a").unwrap().unwrap();
    let stored_children: Vec<&str> = stored_parent
        .children()
        .unwrap()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(stored_children, vec!["p"]);
    assert_eq!(factory.find_owned("a").unwrap().len(), 1);
}

#[test]
fn unassigned_child_leaves_parent_deletable() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("a").unwrap();
    let mut child = factory.create_new("p").unwrap();
    parent.adopt(&mut child).unwrap();
    parent.save().unwrap();
    child.save().unwrap();

    child.unassign_from_any(&mut parent).unwrap();
    child.save().unwrap();
    parent.save().unwrap();

    let mut reloaded = factory.find_existing("a").unwrap().unwrap();
    assert!(reloaded.children().unwrap().is_empty());
    assert!(factory.find_owned("a").unwrap().is_empty());
    reloaded.delete().unwrap();
    assert!(factory.find_existing("a").unwrap().is_none());
}

#[test]
fn unassign_from_any_checks_the_current_parent() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut owner = factory.create_new("owner").unwrap();
    let mut other = factory.create_new("other").unwrap();
    let mut child = factory.create_new("c").unwrap();

    child.unassign_from_any(&mut owner).unwrap();
    assert_eq!(child.parent_natural_id().unwrap(), None);
    assert!(owner.children().unwrap().is_empty());

    child.assign_to(&mut owner).unwrap();
    assert!(matches!(
        child.unassign_from_any(&mut other),
        Err(DomainError::InvalidState(_))
    ));
    assert_eq!(child.parent_natural_id().unwrap(), Some("owner"));
    assert!(owner.children().unwrap().contains("c"));
}

#[test]
fn stale_parent_copy_cannot_delete_while_children_reference_it() {
    let conn = open_db_in_memory().unwrap();
    let sink = RecordingSink::new();
    let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

    let mut parent = factory.create_new("a").unwrap();
    let mut child = factory.create_new("c").unwrap();
    parent.save().unwrap();
    child.save().unwrap();

    child.assign_to(&mut parent).unwrap();
    child.save().unwrap();

    let mut stale = factory.find_existing("a").unwrap().unwrap();
    assert!(stale.children().unwrap().is_empty());
    assert!(matches!(stale.delete(), Err(DomainError::InvalidState(_))));
    assert!(factory.find_existing("a").unwrap().is_some());
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Adopt(usize),
    Release(usize),
    AssignTo(usize),
    UnassignFromAny(usize),
    SaveParent,
    SaveChild(usize),
    SetParentValue,
    SetChildValue(usize),
}

const CHILD_COUNT: usize = 3;
const OPS_PER_RUN: usize = 120;

fn random_op(rng: &mut StdRng) -> Op {
    let child = rng.gen_range(0..CHILD_COUNT);
    match rng.gen_range(0..8) {
        0 => Op::Adopt(child),
        1 => Op::Release(child),
        2 => Op::AssignTo(child),
        3 => Op::UnassignFromAny(child),
        4 => Op::SaveParent,
        5 => Op::SaveChild(child),
        6 => Op::SetParentValue,
        _ => Op::SetChildValue(child),
    }
}

fn memory_versions(parent: &TestAggregate<'_>, children: &[TestAggregate<'_>]) -> Vec<i64> {
    std::iter::once(parent)
        .chain(children.iter())
        .map(|aggregate| aggregate.version().unwrap())
        .collect()
}

fn stored_versions(
    factory: &AggregateFactory<SqliteRecordRepository<'_>, &RecordingSink>,
    natural_ids: &[String],
) -> Vec<i64> {
    natural_ids
        .iter()
        .map(|natural_id| {
            factory
                .store()
                .find_existing(natural_id)
                .unwrap()
                .unwrap()
                .version
        })
        .collect()
}

#[test]
fn each_root_version_advances_only_when_that_root_is_saved() {
    for seed in [0x9E37_79B9_7F4A_7C15_u64, 7, 42, 0xDEAD_BEEF, 1 << 40] {
        let conn = open_db_in_memory().unwrap();
        let sink = RecordingSink::new();
        let factory =
            AggregateFactory::new(SqliteRecordRepository::try_new(&conn).unwrap(), &sink);

        let mut parent = factory.create_new("p").unwrap();
        parent.save().unwrap();
        let mut children: Vec<TestAggregate<'_>> = (0..CHILD_COUNT)
            .map(|index| {
                let mut child = factory.create_new(format!("c{index}")).unwrap();
                child.save().unwrap();
                child
            })
            .collect();
        let natural_ids: Vec<String> = std::iter::once("p".to_string())
            .chain((0..CHILD_COUNT).map(|index| format!("c{index}")))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        for step in 0..OPS_PER_RUN {
            let op = random_op(&mut rng);
            let memory_before = memory_versions(&parent, &children);
            let stored_before = stored_versions(&factory, &natural_ids);
            let saved_root = match op {
                Op::SaveParent => Some(0),
                Op::SaveChild(index) => Some(index + 1),
                _ => None,
            };
            let dirty_before = match op {
                Op::SaveParent => parent.is_changed(),
                Op::SaveChild(index) => children[index].is_changed(),
                _ => false,
            };
            sink.reset();

            match op {
                Op::Adopt(index) => parent.adopt(&mut children[index]).unwrap(),
                Op::Release(index) => {
                    let assigned = children[index].parent_natural_id().unwrap().is_some();
                    let released = parent.release(&mut children[index]);
                    if assigned {
                        released.unwrap();
                    } else {
                        assert!(matches!(released, Err(DomainError::InvalidState(_))));
                    }
                }
                Op::AssignTo(index) => {
                    children[index].assign_to(&mut parent).unwrap();
                }
                Op::UnassignFromAny(index) => {
                    children[index].unassign_from_any(&mut parent).unwrap();
                }
                Op::SaveParent => {
                    parent.save().unwrap();
                }
                Op::SaveChild(index) => {
                    children[index].save().unwrap();
                }
                Op::SetParentValue => {
                    parent.update(|it| it.set_value(format!("v{step}"))).unwrap();
                }
                Op::SetChildValue(index) => {
                    children[index]
                        .update(|it| it.set_value(format!("v{step}")))
                        .unwrap();
                }
            }

            for child in &children {
                let child_natural_id = child.natural_id().unwrap();
                assert_eq!(
                    child.parent_natural_id().unwrap() == Some("p"),
                    parent.children().unwrap().contains(child_natural_id),
                    "seed={seed} step={step} op={op:?} child={child_natural_id}"
                );
            }

            let memory_after = memory_versions(&parent, &children);
            let stored_after = stored_versions(&factory, &natural_ids);
            for root in 0..=CHILD_COUNT {
                let expected = if saved_root == Some(root) && dirty_before {
                    memory_before[root] + 1
                } else {
                    memory_before[root]
                };
                assert_eq!(
                    memory_after[root], expected,
                    "seed={seed} step={step} op={op:?} root={}",
                    natural_ids[root]
                );
                if saved_root == Some(root) {
                    assert_eq!(stored_after[root], memory_after[root]);
                } else {
                    assert_eq!(stored_after[root], stored_before[root]);
                }
            }

            let expected_events = usize::from(saved_root.is_some() && dirty_before);
            assert_eq!(sink.len(), expected_events, "seed={seed} step={step} op={op:?}");
        }

        parent.save().unwrap();
        for child in &mut children {
            child.save().unwrap();
        }
        let stored_parent = factory.find_existing("p").unwrap().unwrap();
        let mut owned: Vec<String> = factory
            .find_owned("p")
            .unwrap()
            .iter()
            .map(|child| child.natural_id().unwrap().to_string())
            .collect();
        owned.sort();
        let listed: Vec<String> = stored_parent.children().unwrap().iter().cloned().collect();
        assert_eq!(owned, listed, "seed={seed}");
    }
}
