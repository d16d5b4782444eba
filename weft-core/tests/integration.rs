//! Integration tests for the Weft runtime.
//!
//! These exercise the full stack: cells and navigation, links across
//! spaces, transactions with retry, deferred scheduling, and handlers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use weft_core::{
    best_by_score, Cell, Error, Link, Manifest, Path, Runtime, RuntimeConfig,
};

/// Repeated navigation to the same address yields the same subscription
/// identity, whatever route was taken.
#[test]
fn navigation_identity_is_stable_across_routes() {
    let rt = Runtime::new();
    rt.create_space("home");
    rt.declare_entity("home", "list", json!({"items": [{"n": 1}]}), &[])
        .unwrap();

    let root = rt.cell("home", "list").unwrap();
    let a = root.navigate("items").navigate(0usize).navigate("n");
    let b = root.navigate("items").navigate(0usize).navigate("n");

    assert_eq!(a, b);
    assert_eq!(a.key(), b.key());
}

/// A derived sum over a sequence cell picks up an appended element on
/// the scheduling pass after the commit, not during it.
#[test]
fn derived_sum_tracks_sequence_growth() {
    let rt = Runtime::new();
    rt.create_space("home");
    let items: Cell<Vec<i64>> = rt
        .declare("home", "list", &vec![10i64, 20, 30], &[])
        .unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in = runs.clone();
    let read = items.read_only();
    let total = rt.derive(move |scope| {
        runs_in.fetch_add(1, Ordering::SeqCst);
        let items: Vec<i64> = scope.read(&read)?;
        Ok(items.iter().sum::<i64>())
    });
    assert_eq!(total.get(&rt).unwrap(), 60);

    // Append a fourth element by replacing the sequence atomically.
    rt.transact("home", |tx| {
        let mut current: Vec<i64> = tx.read_as(&items)?;
        current.push(40);
        tx.write_cell(&items, &current)
    })
    .unwrap();

    // The commit itself did not re-run the computation.
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    rt.settle().unwrap();
    assert_eq!(total.get(&rt).unwrap(), 100);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A redirect link survives serialization, persistence inside another
/// entity, and reconstruction — and still writes through to the
/// original cell, exactly as a direct write would.
#[test]
fn redirect_link_round_trips_to_a_live_writable_alias() {
    let rt = Runtime::new();
    rt.create_space("alice");
    rt.create_space("bob");
    let counter: Cell<i64> = rt.declare("alice", "counter", &7i64, &[]).unwrap();
    rt.declare_entity("bob", "dashboard", json!({}), &[]).unwrap();

    let read = counter.read_only();
    let mirrored = rt.derive(move |scope| scope.read::<i64, _>(&read));
    assert_eq!(mirrored.get(&rt).unwrap(), 7);

    // Alice explicitly mints a writable link; Bob persists it.
    let link = rt
        .edit_link("alice", "counter", Path::root())
        .unwrap();
    let dashboard = rt.cell("bob", "dashboard").unwrap();
    rt.transact("bob", |tx| {
        tx.write_ref(&dashboard.navigate("counter_link"), link.to_value())
    })
    .unwrap();

    // Later: reconstruct the link from storage.
    let stored = dashboard.navigate("counter_link").read().unwrap();
    assert!(Link::is_link_value(&stored));
    let restored = Link::from_value(&stored).unwrap();
    assert!(restored.same_target(&link));

    // Resolved for write, it aliases the original cell.
    let alias = restored.resolve_for_write(rt.store()).unwrap();
    rt.transact("alice", |tx| tx.write_ref(&alias, json!(8)))
        .unwrap();
    rt.settle().unwrap();

    assert_eq!(counter.read().unwrap(), 8);
    assert_eq!(mirrored.get(&rt).unwrap(), 8);
}

/// Query projections are read-optimized and never write-capable: their
/// links refuse write resolution and their refs are rejected from write
/// slots at bind time.
#[test]
fn projections_stay_read_only_end_to_end() {
    let rt = Runtime::new();
    rt.create_space("desk");
    rt.declare_entity(
        "desk",
        "note",
        json!({"title": "groceries", "body": {"long": "text"}}),
        &["note"],
    )
    .unwrap();

    let found = rt.wish("note");
    assert_eq!(found.len(), 1);
    let projection = &found[0];

    // Minimal view: scalars only.
    assert_eq!(projection.field("title"), Some(&json!("groceries")));
    assert_eq!(projection.field("body"), None);

    // No write capability through the projection's link.
    assert!(matches!(
        projection.link().resolve_for_write(rt.store()),
        Err(Error::ReadOnlyRef { .. })
    ));

    // And no way to smuggle it into a handler's write slot.
    let read_ref = projection.link().resolve(rt.store()).unwrap();
    let result = rt.bind(
        Manifest::new().writes_ref(&read_ref),
        |_scope, _payload| Ok(()),
    );
    assert!(matches!(result, Err(Error::ReadOnlyBinding { .. })));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Candidate {
    id: String,
    score: f64,
}

/// Tied candidates must select identically on every evaluation, no
/// matter how the stored sequence happens to be ordered.
#[test]
fn tied_candidates_never_oscillate() {
    let rt = Runtime::new();
    rt.create_space("match");
    let pool: Cell<Vec<Candidate>> = rt
        .declare(
            "match",
            "pool",
            &vec![
                Candidate { id: "beta".into(), score: 0.9 },
                Candidate { id: "alpha".into(), score: 0.9 },
                Candidate { id: "gamma".into(), score: 0.4 },
            ],
            &[],
        )
        .unwrap();

    let read = pool.read_only();
    let winner = rt.derive(move |scope| {
        let candidates: Vec<Candidate> = scope.read(&read)?;
        Ok(best_by_score(candidates, |c| c.score, |c| c.id.clone())
            .map(|c| c.id)
            .unwrap_or_default())
    });
    assert_eq!(winner.get(&rt).unwrap(), "alpha");

    // Re-store the same logical set in every rotation; the winner must
    // not depend on iteration order.
    for _ in 0..3 {
        rt.transact("match", |tx| {
            let mut candidates: Vec<Candidate> = tx.read_as(&pool)?;
            candidates.rotate_left(1);
            tx.write_cell(&pool, &candidates)
        })
        .unwrap();
        rt.settle().unwrap();
        assert_eq!(winner.get(&rt).unwrap(), "alpha");
    }
}

/// A handler invocation is one transaction: dependents observe all of
/// its writes or none, and reads inside the body see current state, not
/// bind-time state.
#[test]
fn handler_invocations_are_atomic_and_current() {
    let rt = Runtime::new();
    rt.create_space("home");
    let source = rt.declare("home", "source", &1i64, &[]).unwrap();
    let left = rt.declare("home", "left", &0i64, &[]).unwrap();
    let right = rt.declare("home", "right", &0i64, &[]).unwrap();

    // Watches for partial commits: left and right are written together,
    // so their difference must read zero on every evaluation.
    let (l, r) = (left.read_only(), right.read_only());
    let skew = rt.derive(move |scope| {
        Ok(scope.read::<i64, _>(&l)? - scope.read::<i64, _>(&r)?)
    });
    assert_eq!(skew.get(&rt).unwrap(), 0);

    let manifest = Manifest::new()
        .reads(&source)
        .writes(&left)
        .writes(&right);
    let (source_in, left_in, right_in) = (source.clone(), left.clone(), right.clone());
    let handle = rt
        .bind(manifest, move |scope, _payload| {
            let n: i64 = scope.read(&source_in)?;
            scope.write(&left_in, &n)?;
            scope.write(&right_in, &n)
        })
        .unwrap();

    // Mutate the source after binding; the handler must see 42, not 1.
    rt.transact("home", |tx| tx.write_cell(&source, &42)).unwrap();
    handle.invoke(Value::Null);
    rt.settle().unwrap();

    assert_eq!(left.read().unwrap(), 42);
    assert_eq!(right.read().unwrap(), 42);
    assert_eq!(skew.get(&rt).unwrap(), 0);
}

/// Cross-space updates are two sequential commits. When the second
/// fails, the first stays applied — there is no cross-identity rollback
/// to pretend otherwise.
#[test]
fn cross_space_updates_are_sequential_not_atomic() {
    let rt = Runtime::new();
    rt.create_space("alice");
    rt.create_space("bob");
    let a = rt.declare("alice", "total", &5i64, &[]).unwrap();
    rt.declare("bob", "total", &10i64, &[]).unwrap();

    // Phase 1: read from both identities.
    let b_cell = rt.cell("bob", "total").unwrap();
    let mut reader = rt.begin("alice");
    let a_val: i64 = reader.read_as(&a).unwrap();
    let b_val = reader.read_ref(&b_cell).unwrap().as_i64().unwrap();
    drop(reader);

    // Phase 2: one commit per identity; the second one fails.
    rt.transact("alice", |tx| tx.write_cell(&a, &(a_val + b_val)))
        .unwrap();
    let err = rt
        .transact("bob", |tx| {
            tx.write_ref(&rt.cell("bob", "gone")?, json!(0))
        })
        .unwrap_err();
    assert!(matches!(err, Error::EntityNotFound { .. }));

    // Alice's commit remains observable.
    assert_eq!(a.read().unwrap(), 15);
}

/// A conflicting commit retries against fresh reads and converges.
#[test]
fn interleaved_commits_recover_through_retry() {
    let rt = Runtime::new();
    rt.create_space("home");
    let counter = rt.declare("home", "counter", &0i64, &[]).unwrap();

    let interleaved = AtomicBool::new(false);
    rt.transact("home", |tx| {
        let current: i64 = tx.read_as(&counter)?;
        if !interleaved.swap(true, Ordering::SeqCst) {
            // A competing commit lands between our read and commit.
            rt.transact("home", |other| other.write_cell(&counter, &100))?;
        }
        tx.write_cell(&counter, &(current + 1))
    })
    .unwrap();

    // The retry read the interleaved 100 and incremented that.
    assert_eq!(counter.read().unwrap(), 101);
}

/// A feedback chain longer than the evaluation budget fails the pass
/// loudly and leaves the runtime intact.
#[test]
fn iteration_bound_is_loud_but_survivable() {
    let rt = Runtime::with_config(RuntimeConfig {
        max_evaluations_per_pass: 2,
        ..RuntimeConfig::default()
    });
    rt.create_space("home");
    let x = rt.declare("home", "x", &1i64, &[]).unwrap();

    let read = x.read_only();
    let a = rt.derive(move |scope| Ok(scope.read::<i64, _>(&read)? + 1));
    let a_in = a.clone();
    let b = rt.derive(move |scope| Ok(scope.get(&a_in)? + 1));
    let b_in = b.clone();
    let c = rt.derive(move |scope| Ok(scope.get(&b_in)? + 1));
    assert_eq!(c.get(&rt).unwrap(), 4);

    rt.transact("home", |tx| tx.write_cell(&x, &10)).unwrap();
    assert!(matches!(
        rt.run_pass(),
        Err(Error::IterationBound { bound: 2, .. })
    ));

    // Still serviceable: pulls catch up on demand.
    assert_eq!(c.get(&rt).unwrap(), 13);
}
