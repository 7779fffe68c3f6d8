//! Integration tests for the LRU-K replacer

use strata::buffer::LruKReplacer;
use strata::common::FrameId;

#[test]
fn test_young_frames_evict_in_insertion_order() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..5 {
        replacer.record_access(FrameId::new(i)).unwrap();
        replacer.set_evictable(FrameId::new(i), true);
    }
    assert_eq!(replacer.size(), 5);

    // Every frame has a single access: the young list drains FIFO.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_scan_pattern_eviction() {
    // The spec's scenario: k=2, accesses A, B, C, A.
    let replacer = LruKReplacer::new(2, 3);
    let (a, b, c) = (FrameId::new(0), FrameId::new(1), FrameId::new(2));

    replacer.record_access(a).unwrap();
    replacer.record_access(b).unwrap();
    replacer.record_access(c).unwrap();
    replacer.record_access(a).unwrap();

    for f in [a, b, c] {
        replacer.set_evictable(f, true);
    }

    // B and C sit in the young list; A graduated to old on its second
    // access and goes last.
    assert_eq!(replacer.evict(), Some(b));
    assert_eq!(replacer.evict(), Some(c));
    assert_eq!(replacer.evict(), Some(a));
}

#[test]
fn test_old_list_evicts_least_recently_used() {
    let replacer = LruKReplacer::new(2, 10);

    for f in 0..3u32 {
        replacer.record_access(FrameId::new(f)).unwrap();
        replacer.record_access(FrameId::new(f)).unwrap();
        replacer.set_evictable(FrameId::new(f), true);
    }
    // Touch frame 0 again: it becomes the most recently used.
    replacer.record_access(FrameId::new(0)).unwrap();

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_non_evictable_frames_survive() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..3 {
        replacer.record_access(FrameId::new(i)).unwrap();
    }
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);
    assert_eq!(replacer.size(), 2);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_out_of_range_access_fails() {
    let replacer = LruKReplacer::new(2, 8);
    assert!(replacer.record_access(FrameId::new(7)).is_ok());
    // The valid range is [0, replacer_size).
    assert!(replacer.record_access(FrameId::new(8)).is_err());
}

#[test]
fn test_remove_refuses_pinned_frame() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0)).unwrap();
    assert!(replacer.remove(FrameId::new(0)).is_err());

    replacer.set_evictable(FrameId::new(0), true);
    replacer.remove(FrameId::new(0)).unwrap();
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id).unwrap();
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);
    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }
    assert_eq!(replacer.size(), 0);
}
