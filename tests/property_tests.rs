use memscope::{
    line_address, Decimator, Engine, FlushPipeline, MemRef, ObserverConfig, RefBuffer,
    ThreadCounters, WorkingSetTable, CACHE_LINE_SIZE,
};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

fn mem_ref() -> impl Strategy<Value = MemRef> {
    (any::<bool>(), any::<u64>(), 1u32..=64, any::<u64>()).prop_map(|(w, addr, size, ip)| {
        if w {
            MemRef::write(addr, size, ip)
        } else {
            MemRef::read(addr, size, ip)
        }
    })
}

// Property: below capacity a buffer hands back exactly what went in
proptest! {
    #[test]
    fn prop_buffer_preserves_order(records in prop_vec(mem_ref(), 0..200)) {
        let mut buffer = RefBuffer::with_capacity(200);
        for (i, record) in records.iter().enumerate() {
            let full = buffer.append(*record);
            prop_assert_eq!(full, i + 1 == 200);
        }
        prop_assert_eq!(buffer.records(), records.as_slice());
    }
}

// Property: every byte of a cache line maps to one working-set entry
proptest! {
    #[test]
    fn prop_line_aliasing(base in any::<u64>(), offsets in prop_vec(0u64..CACHE_LINE_SIZE, 1..32)) {
        let table = WorkingSetTable::new(256);
        let line = line_address(base);

        prop_assert!(table.insert_line(line).is_new());
        for offset in offsets {
            prop_assert!(!table.insert_line(line_address(line + offset)).is_new());
        }
        prop_assert_eq!(table.unique_lines(), 1);
    }
}

// Property: with interval N exactly every Nth reference is accepted
proptest! {
    #[test]
    fn prop_sampling_determinism(interval in 1u64..50, count in 0u64..2000) {
        let decimator = Decimator::new(true, interval);
        let accepted: Vec<u64> = (1..=count).filter(|_| decimator.should_process()).collect();
        let expected: Vec<u64> = (1..=count).filter(|n| n % interval == 0).collect();
        prop_assert_eq!(accepted, expected);

        let disabled = Decimator::new(false, interval);
        prop_assert!((0..count).all(|_| disabled.should_process()));
    }
}

// Property: a flush never loses or double-counts a reference
proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_counts_conserved_across_flushes(
        records in prop_vec(mem_ref(), 0..500),
        capacity in 1usize..64,
        interval in 1u64..8,
    ) {
        let config = ObserverConfig {
            buffer_capacity: capacity,
            working_set_capacity: 1024,
            ..Default::default()
        }
        .with_sampling(interval);
        let engine = Engine::new(config).unwrap();

        let mut observer = engine.register_thread().unwrap();
        for record in &records {
            observer.on_memory_access(*record);
        }
        let counters = observer.finish();

        let n = records.len() as u64;
        prop_assert_eq!(counters.refs, n);
        prop_assert_eq!(counters.reads + counters.writes + counters.sampled_out, n);
        prop_assert_eq!(counters.processed(), n / interval);

        let distinct: std::collections::HashSet<u64> =
            records.iter().map(|r| line_address(r.address)).collect();
        prop_assert!(engine.unique_lines() <= distinct.len() as u64);
    }
}

#[test]
fn test_empty_flush_leaves_state_untouched() {
    let table = WorkingSetTable::new(16);
    let decimator = Decimator::new(true, 3);
    let pipeline = FlushPipeline {
        working_set: &table,
        decimator: &decimator,
        sink: None,
        metrics: None,
    };

    let mut counters = ThreadCounters::default();
    for _ in 0..3 {
        pipeline.flush(&mut RefBuffer::with_capacity(8), &mut counters, 1, &mut Vec::new());
    }
    assert_eq!(counters, ThreadCounters::default());
    assert_eq!(table.unique_lines(), 0);
    assert_eq!(decimator.observed(), 0);
}
