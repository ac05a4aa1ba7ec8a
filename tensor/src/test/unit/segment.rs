use test_case::test_case;

use crate::Segment;

#[test_case(0, 10, 10, 20, false; "touching intervals are disjoint")]
#[test_case(0, 10, 9, 20, true; "one byte shared")]
#[test_case(5, 15, 0, 20, true; "nested")]
#[test_case(0, 10, 20, 30, false; "far apart")]
fn intersection(a0: u64, a1: u64, b0: u64, b1: u64, expect: bool) {
    let a = Segment::new(a0, a1);
    let b = Segment::new(b0, b1);
    assert_eq!(a.intersects(&b), expect);
    assert_eq!(b.intersects(&a), expect);
}

#[test]
fn containment() {
    let outer = Segment::new(0, 100);
    let inner = Segment::new(25, 75);
    assert!(outer.contains(&inner));
    assert!(!inner.contains(&outer));
    assert!(outer.contains(&outer));
    assert!(!outer.contains(&Segment::new(50, 150)));
}

#[test]
fn scaling_to_bytes() {
    let elems = Segment::new(3, 7);
    assert_eq!(elems.scaled(4), Segment::new(12, 28));
    assert_eq!(elems.len(), 4);
    assert!(!elems.is_empty());
    assert!(Segment::new(5, 5).is_empty());
}
