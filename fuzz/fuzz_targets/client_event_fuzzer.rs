//! Fuzz target for the client state machine inside a simulated mesh
//!
//! Drives a started client through arbitrary operation sequences: publishes,
//! fetches, streaming requests, disconnects, rejoins, injected frames and
//! time jumps.
//!
//! # Invariants
//!
//! - NEVER panic on any sequence
//! - No operation settles more than once
//! - A uuid is registered at most once, on an open connection
//! - Chunk assemblies never outlive their request
//! - After a long enough time jump nothing is left in flight

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use meshlink_harness::{standard_world, Operation};

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let mut world = standard_world(input.seed);
    let mut deferred = Vec::new();

    for operation in input.operations.iter().take(256) {
        if let Ok(Some(op)) = operation.apply(&mut world) {
            deferred.push(op);
        }
        if let Err(violation) = world.check_invariants() {
            panic!("{violation} after {operation:?}");
        }
    }

    world.advance(Duration::from_secs(30));
    if let Err(violation) = world.check_invariants() {
        panic!("{violation} after settling");
    }

    for op in deferred {
        assert_eq!(world.completions_for(op).len(), 1, "{op} did not settle exactly once");
    }
    assert_eq!(world.client().pending_fetches(), 0);
    assert_eq!(world.client().streaming_in_flight(), 0);
});
