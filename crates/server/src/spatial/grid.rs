//! Concurrent uniform grid.
//!
//! The arena is partitioned into fixed square cells, each guarded by its
//! own reader/writer lock. Readers (view ticks) and writers (insert,
//! remove, update) contend only on the cells they actually touch; there
//! is no global lock.
//!
//! Lock order: an object lock may be held while taking a cell lock,
//! never the reverse, and no call holds two cell locks or two object
//! locks at once.

use crate::entity::GameObject;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to a live game object. Only the owning worker mutates
/// the object's identity and kinematics; other workers read it during
/// their view ticks and may flip `is_dead` through `collide`.
pub type SharedObject = Arc<RwLock<GameObject>>;

struct Cell {
    objects: RwLock<HashMap<String, SharedObject>>,
}

/// The process-wide spatial index.
pub struct Grid {
    width: f64,
    height: f64,
    cell_size: i32,
    rows: i32,
    cols: i32,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: i32, height: i32, cell_size: i32) -> Self {
        let rows = (height - 1) / cell_size + 1;
        let cols = (width - 1) / cell_size + 1;
        let mut cells = Vec::with_capacity((rows * cols) as usize);
        for _ in 0..rows * cols {
            cells.push(Cell {
                objects: RwLock::new(HashMap::new()),
            });
        }
        Self {
            width: width as f64,
            height: height as f64,
            cell_size,
            rows,
            cols,
            cells,
        }
    }

    /// Whether a point lies inside the world rectangle
    /// `[0, width) x [0, height)`.
    pub fn in_bounds(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && x < self.width && y >= 0.0 && y < self.height
    }

    /// Cell address for an in-bounds point. Edge coordinates map by
    /// floor division.
    fn address(&self, x: f64, y: f64) -> (i32, i32) {
        let cell = self.cell_size as f64;
        ((y / cell).floor() as i32, (x / cell).floor() as i32)
    }

    fn cell_at(&self, row: i32, col: i32) -> Option<&Cell> {
        if row < 0 || col < 0 || row >= self.rows || col >= self.cols {
            return None;
        }
        Some(&self.cells[(row * self.cols + col) as usize])
    }

    /// Index an object under its stored position, recording the cell on
    /// the object. Out-of-bounds positions are dropped silently; returns
    /// whether the object was indexed.
    pub fn insert(&self, obj: &SharedObject) -> bool {
        let mut o = obj.write();
        if !self.in_bounds(o.position.x, o.position.y) {
            return false;
        }
        let (row, col) = self.address(o.position.x, o.position.y);
        o.row = row;
        o.col = col;
        let id = o.id.clone();
        if let Some(cell) = self.cell_at(row, col) {
            cell.objects.write().insert(id, Arc::clone(obj));
        }
        true
    }

    /// Unlink an object from the cell recorded on it (not recomputed).
    /// A no-op when the address is out of range or the object is not
    /// present.
    pub fn remove(&self, obj: &SharedObject) {
        let o = obj.read();
        if let Some(cell) = self.cell_at(o.row, o.col) {
            cell.objects.write().remove(&o.id);
        }
    }

    /// Project the object to `now` and migrate it between cells if the
    /// projection crossed a cell boundary. The anchor is re-set only on
    /// transitions; movement inside a cell stays implicit in
    /// `(velocity, time_update)` and never touches the index.
    pub fn update(&self, obj: &SharedObject, now: i64) {
        let mut o = obj.write();
        let projected = o.position_at(now);
        if !self.in_bounds(projected.x, projected.y) {
            return;
        }
        let (row, col) = self.address(projected.x, projected.y);
        if (row, col) == (o.row, o.col) {
            return;
        }
        if let Some(cell) = self.cell_at(o.row, o.col) {
            cell.objects.write().remove(&o.id);
        }
        o.life_length -= now - o.time_update;
        o.time_update = now;
        o.position = projected;
        o.row = row;
        o.col = col;
        let id = o.id.clone();
        if let Some(cell) = self.cell_at(row, col) {
            cell.objects.write().insert(id, Arc::clone(obj));
        }
    }

    /// Collect the membership of every cell overlapping the inclusive
    /// rectangle, clipped to the grid. The snapshot is per cell, not
    /// globally consistent; callers tolerate stale-by-one-tick
    /// membership. Inverted rectangles return empty.
    pub fn search(&self, y_lo: f64, y_hi: f64, x_lo: f64, x_hi: f64) -> Vec<SharedObject> {
        let (row_lo, col_lo) = self.address(x_lo, y_lo);
        let (row_hi, col_hi) = self.address(x_hi, y_hi);
        let mut found = Vec::new();
        for row in row_lo.max(0)..=row_hi.min(self.rows - 1) {
            for col in col_lo.max(0)..=col_hi.min(self.cols - 1) {
                if let Some(cell) = self.cell_at(row, col) {
                    let objects = cell.objects.read();
                    found.extend(objects.values().cloned());
                }
            }
        }
        found
    }

    /// Total number of indexed objects.
    pub fn object_count(&self) -> usize {
        self.cells.iter().map(|c| c.objects.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    fn shared(id: &str, x: f64, y: f64) -> SharedObject {
        let mut obj = GameObject::player();
        obj.id = id.to_string();
        obj.position = DVec2::new(x, y);
        Arc::new(RwLock::new(obj))
    }

    fn grid() -> Grid {
        Grid::new(1600, 1600, 100)
    }

    fn found_ids(found: &[SharedObject]) -> Vec<String> {
        let mut ids: Vec<String> = found.iter().map(|o| o.read().id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn insert_records_the_floor_cell() {
        let grid = grid();
        let obj = shared("A", 250.0, 1599.9);
        assert!(grid.insert(&obj));
        let o = obj.read();
        assert_eq!((o.row, o.col), (15, 2));
        drop(o);
        assert_eq!(grid.object_count(), 1);
    }

    #[test]
    fn out_of_bounds_is_dropped() {
        let grid = grid();
        for (x, y) in [(-5.0, 0.0), (0.0, -0.1), (1600.0, 10.0), (10.0, 1600.0)] {
            let obj = shared("A", x, y);
            assert!(!grid.insert(&obj));
        }
        assert_eq!(grid.object_count(), 0);
    }

    #[test]
    fn remove_is_idempotent_and_uses_the_recorded_cell() {
        let grid = grid();
        let obj = shared("A", 50.0, 50.0);
        grid.insert(&obj);
        grid.remove(&obj);
        assert_eq!(grid.object_count(), 0);
        // removing again, or removing a never-inserted object, is silent
        grid.remove(&obj);
        let ghost = shared("B", 500.0, 500.0);
        grid.remove(&ghost);
        assert_eq!(grid.object_count(), 0);
    }

    #[test]
    fn update_within_a_cell_leaves_the_anchor_alone() {
        let grid = grid();
        let obj = shared("A", 110.0, 110.0);
        {
            let mut o = obj.write();
            o.velocity = DVec2::new(10.0, 0.0);
            o.time_update = 1000;
            o.life_length = 60_000;
        }
        grid.insert(&obj);
        // 10 units/s for 2s = x 130, still cell (1, 1)
        grid.update(&obj, 3000);
        let o = obj.read();
        assert_eq!((o.row, o.col), (1, 1));
        assert_eq!(o.time_update, 1000);
        assert_eq!(o.position, DVec2::new(110.0, 110.0));
        assert_eq!(o.life_length, 60_000);
    }

    #[test]
    fn update_across_cells_migrates_and_re_anchors() {
        let grid = grid();
        let obj = shared("A", 190.0, 110.0);
        {
            let mut o = obj.write();
            o.velocity = DVec2::new(100.0, 0.0);
            o.time_update = 1000;
            o.life_length = 60_000;
        }
        grid.insert(&obj);
        grid.update(&obj, 2000);
        let o = obj.read();
        assert_eq!(o.position, DVec2::new(290.0, 110.0));
        assert_eq!((o.row, o.col), (1, 2));
        assert_eq!(o.time_update, 2000);
        assert_eq!(o.life_length, 59_000);
        drop(o);

        // exactly one cell holds it (single-cell residency)
        assert_eq!(grid.object_count(), 1);
        let hits = grid.search(100.0, 199.0, 200.0, 299.0);
        assert_eq!(found_ids(&hits), vec!["A"]);
        assert!(grid.search(100.0, 199.0, 100.0, 199.0).is_empty());
    }

    #[test]
    fn update_to_out_of_bounds_is_a_no_op() {
        let grid = grid();
        let obj = shared("A", 1590.0, 800.0);
        {
            let mut o = obj.write();
            o.velocity = DVec2::new(100.0, 0.0);
            o.time_update = 0;
            o.life_length = 60_000;
        }
        grid.insert(&obj);
        grid.update(&obj, 1000);
        let o = obj.read();
        // still anchored in its last in-bounds cell
        assert_eq!((o.row, o.col), (8, 15));
        assert_eq!(o.time_update, 0);
        drop(o);
        assert_eq!(grid.object_count(), 1);
    }

    #[test]
    fn search_clips_to_the_grid_and_rejects_inverted_ranges() {
        let grid = grid();
        let a = shared("A", 50.0, 50.0);
        let b = shared("B", 1550.0, 1550.0);
        grid.insert(&a);
        grid.insert(&b);

        // a window hanging off the world edge still finds the corner
        let hits = grid.search(-900.0, 120.0, -900.0, 120.0);
        assert_eq!(found_ids(&hits), vec!["A"]);

        // whole world
        let hits = grid.search(0.0, 1599.0, 0.0, 1599.0);
        assert_eq!(found_ids(&hits), vec!["A", "B"]);

        // inverted rectangles are empty
        assert!(grid.search(500.0, 100.0, 0.0, 1599.0).is_empty());
        assert!(grid.search(0.0, 1599.0, 500.0, 100.0).is_empty());
    }

    #[test]
    fn search_returns_point_in_time_membership_under_writers() {
        use std::thread;

        let grid = Arc::new(Grid::new(1600, 1600, 100));
        let obj = shared("mover", 50.0, 50.0);
        {
            let mut o = obj.write();
            o.kind = protocol::ObjectType::Snowball;
            o.velocity = DVec2::new(500.0, 0.0);
            o.time_update = 0;
            o.life_length = i64::MAX / 2;
        }
        grid.insert(&obj);

        thread::scope(|s| {
            let writer_grid = Arc::clone(&grid);
            let writer_obj = Arc::clone(&obj);
            s.spawn(move || {
                for now in 1..500i64 {
                    writer_grid.update(&writer_obj, now * 3);
                }
            });
            for _ in 0..4 {
                let reader_grid = Arc::clone(&grid);
                s.spawn(move || {
                    for _ in 0..200 {
                        let hits = reader_grid.search(0.0, 1599.0, 0.0, 1599.0);
                        // never in two cells; mid-migration it may be in none
                        assert!(hits.len() <= 1);
                        if let Some(hit) = hits.first() {
                            assert_eq!(hit.read().id, "mover");
                        }
                    }
                });
            }
        });

        // after all movement, residency is still single-cell
        assert_eq!(grid.object_count(), 1);
        let o = obj.read();
        let expected = (
            (o.position.y / 100.0).floor() as i32,
            (o.position.x / 100.0).floor() as i32,
        );
        assert_eq!((o.row, o.col), expected);
    }
}
