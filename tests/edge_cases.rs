use std::sync::Arc;
use zedbase::{Client, IndexConfig, MemoryStore, Point, Range, ZedbaseError};

fn open_client(threshold: u64) -> Client<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let config = IndexConfig::new("edge").with_split_threshold(threshold);
    Client::open(store, config).unwrap()
}

#[test]
fn test_corner_coordinates() {
    let mut client = open_client(10);
    let corners = [
        Point::new(1, 0, 0),
        Point::new(2, u32::MAX, 0),
        Point::new(3, 0, u32::MAX),
        Point::new(4, u32::MAX, u32::MAX),
    ];
    for p in &corners {
        client.insert(p).unwrap();
    }

    // The full-space query's exclusive stop key overflows the 8-byte code
    // space; the scan must still reach the all-ones row.
    let full = Range::new(0, u32::MAX as i64).unwrap();
    let hits = client.range_query(&full, &full).unwrap();
    assert_eq!(hits.len(), 4);

    for p in &corners {
        let found = client.get(p.x, p.y).unwrap();
        assert_eq!(found, vec![*p]);
    }
}

#[test]
fn test_query_rectangle_clamped_to_space() {
    let mut client = open_client(10);
    client.insert(&Point::new(1, 0, 0)).unwrap();
    client.insert(&Point::new(2, 1000, 1000)).unwrap();

    // Bounds beyond the coordinate space behave like the clamped bounds.
    let rx = Range::new(-5000, u32::MAX as i64 + 5000).unwrap();
    let ry = Range::new(-1, 1200).unwrap();
    let hits = client.range_query(&rx, &ry).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_inverted_range_is_rejected() {
    let err = Range::new(10, 9).unwrap_err();
    assert!(matches!(err, ZedbaseError::InvalidArgument(_)));
}

#[test]
fn test_points_on_query_border_are_included() {
    let mut client = open_client(10);
    for (id, x, y) in [(1, 10, 10), (2, 20, 20), (3, 10, 20), (4, 9, 10), (5, 21, 20)] {
        client.insert(&Point::new(id, x, y)).unwrap();
    }

    let hits = client
        .range_query(&Range::new(10, 20).unwrap(), &Range::new(10, 20).unwrap())
        .unwrap();
    let mut ids: Vec<_> = hits.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_quadrant_boundary_straddle() {
    // Neighboring points on opposite sides of the top-level quadrant cut
    // land in different root buckets but one query must see both.
    let mut client = open_client(10);
    let half = 1u32 << 31;
    client.insert(&Point::new(1, half - 1, half - 1)).unwrap();
    client.insert(&Point::new(2, half, half)).unwrap();

    let rx = Range::new((half - 2) as i64, (half + 1) as i64).unwrap();
    let hits = client.range_query(&rx, &rx).unwrap();
    assert_eq!(hits.len(), 2);

    let nearest = client
        .nearest_neighbors(&Point::new(-1, half, half), 2)
        .unwrap();
    assert_eq!(nearest.len(), 2);
    assert_eq!(nearest[0].id, 2);
    assert_eq!(nearest[1].id, 1);
}

#[test]
fn test_empty_index_queries() {
    let client = open_client(10);
    let r = Range::new(0, 100).unwrap();
    assert!(client.range_query(&r, &r).unwrap().is_empty());
    assert!(client.get(5, 5).unwrap().is_empty());
    assert!(client
        .nearest_neighbors(&Point::new(-1, 50, 50), 3)
        .unwrap()
        .is_empty());
}

#[test]
fn test_degenerate_rectangle() {
    let mut client = open_client(10);
    client.insert(&Point::new(1, 7, 7)).unwrap();
    client.insert(&Point::new(2, 7, 8)).unwrap();

    // A single-cell rectangle.
    let hits = client
        .range_query(&Range::new(7, 7).unwrap(), &Range::new(7, 7).unwrap())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
}

#[test]
fn test_shared_cell_counts_toward_splits() {
    // Ten ids at one location plus one elsewhere: the shared cell cannot be
    // separated by any split, but queries stay exact.
    let mut client = open_client(4);
    for id in 0..10 {
        client.insert(&Point::new(id, 3, 3)).unwrap();
    }
    client.insert(&Point::new(99, 200, 200)).unwrap();

    let hits = client
        .range_query(&Range::new(0, 100).unwrap(), &Range::new(0, 100).unwrap())
        .unwrap();
    assert_eq!(hits.len(), 10);

    let nearest = client.nearest_neighbors(&Point::new(-1, 0, 0), 11).unwrap();
    assert_eq!(nearest.len(), 11);
    assert_eq!(nearest[10].id, 99);
}
