//! End-to-end scenarios over the public API: deadlock discovery,
//! persistence round trips and solution logging.

use std::fs;

use sokodlex::board::level::{decode_level_from_lines, encode_level_to_lines};
use sokodlex::board::{Action, Dir, Mask, SokoState};
use sokodlex::deadlock::DeadlockStack;
use sokodlex::search::{MoveStack, SearchOutcome, write_solution};

fn state_from(lines: &[&str]) -> SokoState {
    SokoState::from_level(&decode_level_from_lines(lines).unwrap())
}

#[test]
fn corner_box_writes_a_single_record_store() {
    let lines = ["####", "#$ #", "# .#", "#@ #", "####"];
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("deadlocks");

    let mut stack = MoveStack::new(state_from(&lines), Some(store.clone()), true);
    let outcome = stack.search_step(None, 0, true).unwrap();
    assert_eq!(outcome, SearchOutcome::Unsolvable);

    let text = fs::read_to_string(&store).unwrap();
    assert_eq!(text.matches("Deadlock ").count(), 1);
    assert!(text.contains("Deadlock 0"));
    assert!(!text.contains("Action"));

    // reloading the store locks the start position immediately
    let reloaded = MoveStack::new(state_from(&lines), Some(store), true);
    assert!(reloaded.is_locked_full());
}

#[test]
fn stuck_square_promotes_an_scc_of_one() {
    let lines = ["######", "#$$ .#", "#$$..#", "#  . #", "#@   #", "######"];
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("deadlocks");

    let mut stack = MoveStack::new(state_from(&lines), Some(store.clone()), true);
    assert!(stack.state().action_mask(true).actions().is_empty());
    let outcome = stack.search_step(None, 0, true).unwrap();
    assert_eq!(outcome, SearchOutcome::Unsolvable);

    let text = fs::read_to_string(&store).unwrap();
    assert_eq!(text.matches("Deadlock ").count(), 1);
}

#[test]
fn trivial_level_solves_and_logs_the_solution() {
    let lines = ["######", "#@ $.#", "######"];
    let dir = tempfile::tempdir().unwrap();

    let mut stack = MoveStack::new(state_from(&lines), Some(dir.path().join("deadlocks")), true);
    let outcome = stack.search_step(None, 0, true).unwrap();
    assert!(matches!(outcome, SearchOutcome::Applied(_)));
    assert!(stack.is_solved());

    let counts = write_solution(dir.path(), &stack).unwrap();
    let (pushes, moves) = counts.unwrap();
    assert_eq!(pushes, 1);
    assert!(moves >= 2);
    assert!(dir.path().join("moves.txt").exists());
    assert!(dir.path().join("actions.txt").exists());
}

#[test]
fn xsb_lines_round_trip() {
    let lines = [
        "    #####",
        "    #   #",
        "    #$  #",
        "  ###  $##",
        "  #  $ $ #",
        "### # ## #   ######",
        "#   # ## #####  ..#",
        "# $  $          ..#",
        "##### ### #@##  ..#",
        "    #     #########",
        "    #######",
    ];
    let level = decode_level_from_lines(&lines).unwrap();
    let encoded = encode_level_to_lines(&level);
    for (original, round_tripped) in lines.iter().zip(&encoded) {
        assert_eq!(original.trim_end(), round_tripped.trim_end());
    }
}

#[test]
fn store_round_trip_preserves_indices_and_descendants() {
    // drive a level into several promotions, then reload and compare
    let lines = ["#####", "#@$.#", "#$ .#", "#####"];
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("deadlocks");

    let mut stack = MoveStack::new(state_from(&lines), Some(store.clone()), true);
    for _ in 0..64 {
        match stack.search_step(None, 0, true).unwrap() {
            SearchOutcome::Applied(_) => {}
            _ => break,
        }
    }
    let first_count = stack.deadlocks.full_count();

    let reloaded = DeadlockStack::new(Some(store), Some(&state_from(&lines)));
    assert_eq!(reloaded.full_count(), first_count);
    let mut originals: Vec<_> = stack
        .deadlocks
        .set
        .iter()
        .filter_map(|(_, dl)| dl.full_index.map(|fi| (fi, dl)))
        .collect();
    originals.sort_by_key(|&(fi, _)| fi);
    let mut loaded: Vec<_> = reloaded
        .set
        .iter()
        .filter_map(|(_, dl)| dl.full_index.map(|fi| (fi, dl)))
        .collect();
    loaded.sort_by_key(|&(fi, _)| fi);
    assert_eq!(originals.len(), loaded.len());
    for ((fi_a, a), (fi_b, b)) in originals.iter().zip(&loaded) {
        assert_eq!(fi_a, fi_b);
        assert_eq!(a.boxes, b.boxes);
        assert_eq!(a.not_boxes, b.not_boxes);
        assert_eq!(a.sk_component, b.sk_component);
        let descendants = |stack: &DeadlockStack, dl: &sokodlex::deadlock::Deadlock| {
            dl.descendants.as_ref().map(|desc| {
                desc.iter()
                    .map(|&(action, id)| (action, stack.set.get(id).full_index))
                    .collect::<Vec<_>>()
            })
        };
        assert_eq!(descendants(&stack.deadlocks, a), descendants(&reloaded, b));
    }
}

#[test]
fn corrupted_store_is_backed_up_and_ignored() {
    let lines = ["####", "#$ #", "# .#", "#@ #", "####"];
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("deadlocks");
    fs::write(&store, "Deadlock zero\n  garbage\n").unwrap();

    let stack = MoveStack::new(state_from(&lines), Some(store.clone()), true);
    assert_eq!(stack.deadlocks.full_count(), 0);
    assert!(!store.exists());
    assert!(dir.path().join("deadlocks_backup").exists());
}

#[test]
fn path_recheck_relocks_earlier_slots() {
    let mut stack = MoveStack::new(
        state_from(&["########", "#@ $   #", "#     .#", "########"]),
        None,
        true,
    );
    stack.apply_action(Action::new(1, 3, Dir::Right)).unwrap();
    stack.apply_action(Action::new(1, 4, Dir::Right)).unwrap();
    let old_slot1 = stack.lock_at(1);

    let empty = Mask::new(
        stack.state().available.height(),
        stack.state().available.width(),
    );
    stack.change_sub_boxes(&empty).unwrap();
    let cur = stack.cur_lock_id();
    let promotion = stack.deadlocks.set_descendants(cur, &[], &[]).unwrap();
    stack.recheck_deadlocks_on_path(promotion);

    assert_eq!(stack.lock_at(0), cur);
    assert_eq!(stack.lock_at(1), cur);
    assert!(!stack.deadlocks.set.contains(old_slot1));
}
