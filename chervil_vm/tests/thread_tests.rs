//! Determinism and thread reuse of compiled programs.

use chervil_vm::combinator::{char_, digit};
use chervil_vm::{parse, run_program, Value};

#[test]
fn test_parsing_is_deterministic() {
    let p = digit().or(&char_('x')).many();
    let first = parse(&p, "12x9");
    for _ in 0..10 {
        assert_eq!(parse(&p, "12x9"), first);
    }
}

#[test]
fn test_clone_for_thread_matches_sequential_results() {
    // `many` carries per-run scratch, so this exercises exactly the
    // stateful cloning path.
    let p = digit().many().zip(&char_('!'));
    let program = p.compile().unwrap();

    let sequential = run_program(&program, "123!", None);

    let inputs = ["123!", "9!", "!"];
    std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|input| {
                let copy = program.clone_for_thread();
                scope.spawn(move || run_program(&copy, input, None))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], sequential);
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
    });
}

#[test]
fn test_shared_program_is_not_poisoned_by_failures() {
    // A failed parse that dies mid-loop leaves scratch behind; the next
    // run must not see it.
    let p = digit().many().zip(&char_('!'));
    let program = p.compile().unwrap();
    assert!(run_program(&program, "12x", None).is_err());
    match run_program(&program, "3!", None) {
        Ok(Value::Pair(pair)) => match &pair.0 {
            Value::List(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected list shape {:?}", other),
        },
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_stateful_indices_cover_the_loops() {
    let p = digit().many().zip(&char_('a').many());
    let program = p.compile().unwrap();
    assert_eq!(program.stateful.len(), 2);
    for &idx in program.stateful.iter() {
        assert!(program.instrs[idx as usize].is_stateful());
    }
}
