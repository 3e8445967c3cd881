use super::*;

#[test]
fn test_push_under_capacity() {
    let mut buf = RingBuffer::new(5);
    let rotated = buf.push_batch(vec![1, 2, 3]);

    assert!(!rotated);
    assert_eq!(buf.len(), 3);
    assert_eq!(buf.total_added(), 3);
    assert_eq!(buf.snapshot(), vec![1, 2, 3]);
    assert_eq!(buf.oldest_sequence(), 1);
}

#[test]
fn test_overflow_keeps_last_capacity_items() {
    let mut buf = RingBuffer::new(10);
    for chunk in (0..37).collect::<Vec<_>>().chunks(4) {
        buf.push_batch(chunk.to_vec());
    }

    assert_eq!(buf.len(), 10);
    assert_eq!(buf.total_added(), 37);
    assert_eq!(buf.snapshot(), (27..37).collect::<Vec<_>>());
    assert_eq!(buf.oldest_sequence(), 28);
}

#[test]
fn test_single_batch_larger_than_capacity() {
    let mut buf = RingBuffer::new(3);
    let rotated = buf.push_batch(0..10);

    assert!(rotated);
    assert_eq!(buf.snapshot(), vec![7, 8, 9]);
    assert_eq!(buf.total_added(), 10);
}

#[test]
fn test_rotation_reallocates_to_capacity() {
    let mut buf = RingBuffer::new(4);
    buf.push_batch(0..100);

    assert!(buf.as_slice().len() == 4);
    assert!(buf.items.capacity() < 100);
}

#[test]
fn test_sequences_are_monotonic_and_anchored() {
    let mut buf = RingBuffer::new(100);
    buf.push_batch(0..250);
    buf.push(250);

    let seq = buf.sequenced(|_| String::new());
    assert_eq!(seq.len(), 100);
    assert_eq!(seq[0].sequence, buf.total_added() as i64 - buf.len() as i64 + 1);
    assert_eq!(seq[0].sequence, 152);
    assert_eq!(seq[99].sequence, 251);
    assert!(seq.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    assert_eq!(seq[0].item, 151);
}

#[test]
fn test_clear_does_not_reset_counter() {
    let mut buf = RingBuffer::new(10);
    buf.push_batch(0..5);
    buf.clear();

    assert!(buf.is_empty());
    assert_eq!(buf.total_added(), 5);

    buf.push(99);
    let seq = buf.sequenced(|_| String::new());
    assert_eq!(seq[0].sequence, 6);
}

#[test]
fn test_zero_capacity_retains_nothing() {
    let mut buf = RingBuffer::new(0);
    buf.push_batch(vec!["a", "b"]);

    assert!(buf.is_empty());
    assert_eq!(buf.total_added(), 2);
}
