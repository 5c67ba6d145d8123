//! # Engine Scenario Tests
//!
//! End-to-end coverage of the storage and operator layers working
//! together over real (small-page) engine instances:
//!
//! - positional storage: append/scan/delete with page splits
//! - timestamp columns: ordered search, out-of-order rejection
//! - operator pipelines over column scans
//! - count-invariant fuzzing with mixed append/delete workloads
//! - durability through flush/reopen
//!
//! If a test here fails after a change, it indicates a regression in the
//! interaction of layers that the per-module unit tests exercise alone.

use tempfile::tempdir;
use tessera::iter::to_array;
use tessera::{ops, Boundary, ElemKind, Engine};

fn small_engine() -> Engine {
    // Tiny pages force multi-level trees with little data.
    Engine::builder()
        .page_size(256)
        .tile_size(16)
        .cache_pages(64)
        .in_memory()
        .unwrap()
}

mod positional_storage {
    use super::*;

    #[test]
    fn append_scan_delete_scenario() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int32, false).unwrap();

        for v in [5i32, 3, 9, 1] {
            col.append(v).unwrap();
        }
        let mut scan = col.scan::<i32>(0, 3).unwrap();
        assert_eq!(to_array(&mut scan).unwrap(), vec![5, 3, 9, 1]);

        assert_eq!(col.delete(1, 2).unwrap(), 2);
        assert_eq!(col.count(), 2);
        let mut scan = col.scan::<i32>(0, -1).unwrap();
        assert_eq!(to_array(&mut scan).unwrap(), vec![5, 1]);
    }

    #[test]
    fn every_position_reads_back_its_appended_value() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
        let n = 5000i64;
        for v in 0..n {
            col.append(v * 3).unwrap();
        }
        for pos in (0..n).step_by(97) {
            let mut one = col.scan::<i64>(pos, pos).unwrap();
            assert_eq!(to_array(&mut one).unwrap(), vec![pos * 3]);
        }
    }

    #[test]
    fn deletion_shifts_surviving_positions_consistently() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
        let mut model: Vec<i64> = (0..3000).collect();
        for &v in &model {
            col.append(v).unwrap();
        }

        // A mix of front, middle and tail deletions.
        for (from, till) in [(0i64, 9i64), (100, 499), (-50, -1), (700, 700)] {
            let resolved_from = if from < 0 { model.len() as i64 + from } else { from } as usize;
            let resolved_till = if till < 0 { model.len() as i64 + till } else { till } as usize;
            model.drain(resolved_from..=resolved_till);
            col.delete(from, till).unwrap();

            assert_eq!(col.count(), model.len() as u64);
            let mut scan = col.scan::<i64>(0, -1).unwrap();
            assert_eq!(to_array(&mut scan).unwrap(), model);
        }
    }

    #[test]
    fn count_invariant_under_random_append_delete_mix() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int32, false).unwrap();
        let mut model: Vec<i32> = Vec::new();

        // Deterministic pseudo-random workload.
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut rng = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for round in 0..40 {
            let appends = (rng() % 200) as i32 + 5;
            for i in 0..appends {
                let v = round * 1000 + i;
                col.append(v).unwrap();
                model.push(v);
            }
            if !model.is_empty() && round % 3 == 2 {
                let from = (rng() % model.len() as u64) as usize;
                let till = (from + (rng() % 50) as usize).min(model.len() - 1);
                col.delete(from as i64, till as i64).unwrap();
                model.drain(from..=till);
            }
            assert_eq!(col.count(), model.len() as u64, "round {}", round);
        }

        let mut scan = col.scan::<i32>(0, -1).unwrap();
        assert_eq!(to_array(&mut scan).unwrap(), model);
    }
}

mod timestamp_columns {
    use super::*;

    #[test]
    fn search_returns_the_equal_run() {
        let engine = small_engine();
        let col = engine.create_column("ts", ElemKind::Int64, true).unwrap();
        for ts in [10i64, 20, 20, 30] {
            col.append(ts).unwrap();
        }

        let (first, last) = col
            .search_range(20i64, Boundary::Inclusive, 20i64, Boundary::Inclusive)
            .unwrap();
        assert_eq!((first, last), (1, 3));

        let err = col.append(15i64).unwrap_err();
        assert!(err.to_string().contains("out of timeseries order"));
    }

    #[test]
    fn boundary_kinds_against_a_large_sorted_column() {
        let engine = small_engine();
        let col = engine.create_column("ts", ElemKind::Int64, true).unwrap();
        // 0,0,0,1,1,1,...: runs of three.
        for v in 0..6000i64 {
            col.append(v / 3).unwrap();
        }

        let mut hits = col
            .search(500i64, Boundary::Inclusive, 500i64, Boundary::Inclusive)
            .unwrap();
        assert_eq!(to_array(&mut hits).unwrap(), vec![500, 500, 500]);

        let (first, last) = col
            .search_range(500i64, Boundary::Exclusive, 502i64, Boundary::Exclusive)
            .unwrap();
        assert_eq!((first, last), (1503, 1506));

        let (first, last) = col
            .search_range(0i64, Boundary::Open, 0i64, Boundary::Open)
            .unwrap();
        assert_eq!((first, last), (0, 6000));

        // Exact probe of a value that is absent.
        let (first, last) = col
            .search_range(5000i64, Boundary::Exact, 5000i64, Boundary::Exact)
            .unwrap();
        assert_eq!((first, last), (0, 0));
    }

    #[test]
    fn search_on_empty_column_finds_nothing() {
        let engine = small_engine();
        let col = engine.create_column("ts", ElemKind::Int64, true).unwrap();
        let (first, last) = col
            .search_range(1i64, Boundary::Inclusive, 2i64, Boundary::Inclusive)
            .unwrap();
        assert_eq!((first, last), (0, 0));
    }
}

mod pipelines {
    use super::*;

    #[test]
    fn filter_pipeline_over_column_scans() {
        let engine = small_engine();
        let mask_col = engine.create_column("m", ElemKind::Int8, false).unwrap();
        let vals_col = engine.create_column("v", ElemKind::Int32, false).unwrap();
        for (m, v) in [(1i8, 10i32), (0, 20), (1, 30), (1, 40)] {
            mask_col.append(m).unwrap();
            vals_col.append(v).unwrap();
        }

        let mask = Box::new(mask_col.scan::<i8>(0, -1).unwrap());
        let vals = Box::new(vals_col.scan::<i32>(0, -1).unwrap());
        let mut out = ops::filter(mask, vals);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![10, 30, 40]);
    }

    #[test]
    fn window_sum_scenario() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int32, false).unwrap();
        for v in [1i32, 2, 3, 4, 5] {
            col.append(v).unwrap();
        }
        let scan = Box::new(col.scan::<i32>(0, -1).unwrap());
        let mut out = ops::window_sum(scan, 3).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 3, 6, 9, 12]);
    }

    #[test]
    fn tile_round_trip_matches_bulk_materialization() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Float64, false).unwrap();
        for i in 0..2500 {
            col.append((i % 37) as f64).unwrap();
        }

        // Drain the same pipeline tile-by-tile and via to_array.
        let build = || {
            let scan = Box::new(col.scan::<f64>(0, -1).unwrap());
            ops::cum_sum(ops::abs(scan))
        };
        let mut piecewise = Vec::new();
        let mut a = build();
        while a.next().unwrap() {
            piecewise.extend_from_slice(a.tile());
        }
        let bulk = to_array(build().as_mut()).unwrap();
        assert_eq!(piecewise, bulk);
        assert_eq!(bulk.len(), 2500);
    }

    #[test]
    fn sort_rank_over_column_scan() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
        for i in 0..4000i64 {
            col.append((i * 2654435761u64 as i64) % 101).unwrap();
        }

        let scan = Box::new(col.scan::<i64>(0, -1).unwrap());
        let sorted = to_array(ops::sort(scan, ops::SortOrder::Asc).as_mut()).unwrap();
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sorted.len(), 4000);

        let scan = Box::new(col.scan::<i64>(0, -1).unwrap());
        let ranks = to_array(ops::rank(scan).as_mut()).unwrap();
        assert_eq!(ranks.len(), 4000);
        assert!(ranks.iter().all(|&r| (1..=4000).contains(&r)));
    }

    #[test]
    fn positions_from_filter_pos_gather_the_original_values() {
        let engine = small_engine();
        let col = engine.create_column("v", ElemKind::Int32, false).unwrap();
        for v in 0..300i32 {
            col.append(v).unwrap();
        }

        // Positions of values divisible by 50, then gather them back.
        let scan = Box::new(col.scan::<i32>(0, -1).unwrap());
        let fifty = ops::constant(50i32, 300, engine.tile_size());
        let zero = ops::constant(0i32, 300, engine.tile_size());
        let mask = ops::eq(ops::rem(scan, fifty), zero);
        let positions = ops::filter_pos(mask);
        let mut gathered = ops::map_positions::<i32>(&col, positions).unwrap();
        assert_eq!(
            to_array(gathered.as_mut()).unwrap(),
            vec![0, 50, 100, 150, 200, 250]
        );
    }

    #[test]
    fn search_feeds_downstream_aggregates() {
        let engine = small_engine();
        let ts = engine.create_column("ts", ElemKind::Int64, true).unwrap();
        for v in 0..1000i64 {
            ts.append(v / 4).unwrap();
        }

        let hits = Box::new(
            ts.search(100i64, Boundary::Inclusive, 120i64, Boundary::Inclusive)
                .unwrap(),
        );
        let n = to_array(ops::count(hits).as_mut()).unwrap();
        // 21 distinct timestamps, four elements each.
        assert_eq!(n, vec![84]);
    }
}

mod durability {
    use super::*;

    #[test]
    fn data_survives_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scenario.tsr");

        {
            let engine = Engine::builder()
                .page_size(512)
                .cache_pages(64)
                .open(&path)
                .unwrap();
            let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
            for v in 0..2000i64 {
                col.append(v).unwrap();
            }
            col.delete(500, 999).unwrap();
            engine.flush().unwrap();
        }

        let engine = Engine::builder()
            .page_size(512)
            .cache_pages(64)
            .open(&path)
            .unwrap();
        let col = engine.column("v").unwrap();
        assert_eq!(col.count(), 1500);

        let mut scan = col.scan::<i64>(0, -1).unwrap();
        let all = to_array(&mut scan).unwrap();
        let expected: Vec<i64> = (0..500).chain(1000..2000).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn cache_pressure_spills_and_reloads_pages() {
        // Cache far smaller than the working set: scans must survive
        // eviction and write-back of dirty pages.
        let engine = Engine::builder()
            .page_size(256)
            .tile_size(32)
            .cache_pages(32)
            .in_memory()
            .unwrap();
        let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
        let n = 20_000i64;
        for v in 0..n {
            col.append(v).unwrap();
        }

        let mut scan = col.scan::<i64>(0, -1).unwrap();
        let all = to_array(&mut scan).unwrap();
        assert_eq!(all.len(), n as usize);
        assert!(all.iter().enumerate().all(|(i, &v)| v == i as i64));
    }
}

mod byte_columns {
    use super::*;
    use tessera::ops::bytes;

    #[test]
    fn like_filter_over_a_byte_column() {
        let engine = small_engine();
        let col = engine.create_column("sym", ElemKind::Bytes(8), false).unwrap();
        for sym in [&b"AAPL\0\0\0\0"[..], &b"MSFT\0\0\0\0"[..], &b"AMZN\0\0\0\0"[..]] {
            col.append_bytes(sym).unwrap();
        }

        let scan = bytes::scan_bytes(&col, 0, -1).unwrap();
        let mut mask = bytes::like(scan, "A%");
        assert_eq!(to_array(mask.as_mut()).unwrap(), vec![1i8, 0, 1]);

        let scan = bytes::scan_bytes(&col, 0, -1).unwrap();
        let mask = bytes::like(scan, "A%");
        let rescan = bytes::scan_bytes(&col, 0, -1).unwrap();
        let mut matching = bytes::filter_bytes(mask, rescan);
        assert!(matching.next().unwrap());
        assert_eq!(matching.tile(), b"AAPL\0\0\0\0AMZN\0\0\0\0");
    }

    #[test]
    fn packed_byte_keys_drive_numeric_grouping() {
        let engine = small_engine();
        let keys = engine.create_column("k", ElemKind::Bytes(4), false).unwrap();
        let vals = engine.create_column("v", ElemKind::Int32, false).unwrap();
        for (k, v) in [(&b"aaaa"[..], 1i32), (&b"aaaa"[..], 2), (&b"bbbb"[..], 10)] {
            keys.append_bytes(k).unwrap();
            vals.append(v).unwrap();
        }

        let packed = bytes::pack_keys(bytes::scan_bytes(&keys, 0, -1).unwrap()).unwrap();
        let values = Box::new(vals.scan::<i32>(0, -1).unwrap());
        let mut sums = ops::group_sum(values, packed);
        assert_eq!(to_array(sums.as_mut()).unwrap(), vec![3i64, 10]);
    }
}
