//! Toroidal grid topology and flat per-cell data arrays.
//!
//! Every map in the game wraps at the edges, so all coordinate arithmetic
//! goes through `GridDims`, which knows the map dimensions and produces
//! wrapped neighbors and wrapped taxicab distances. Per-cell data lives in
//! `GridArray<T>`, a flat row-major array sized to the map.

use crate::location::*;
use bitflags::*;

bitflags! {
    /// Per-cell hazard markers rebuilt at the start of every turn.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CellFlags: u8 {
        const NONE = 0;
        /// An enemy unit occupies this cell or is predicted to move into it.
        const THREAT = 1;
        /// Within one step of a live enemy unit's current cell.
        const THREAT_ADJACENT = 2;
    }
}

/// Map dimensions plus the toroidal adjacency they induce. Immutable once
/// built; shared by every planner.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct GridDims {
    pub width: usize,
    pub height: usize,
}

/// Cardinal neighbor offsets as (dx, dy).
pub const NEIGHBORS_4: [(i32, i32); 4] = [(0, -1), (0, 1), (1, 0), (-1, 0)];

impl GridDims {
    pub fn new(width: usize, height: usize) -> Self {
        GridDims { width, height }
    }

    #[inline]
    pub fn area(self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn index(self, loc: Location) -> usize {
        loc.y() as usize * self.width + loc.x() as usize
    }

    /// Wrap arbitrary signed coordinates back onto the torus.
    #[inline]
    pub fn wrap(self, x: i32, y: i32) -> Location {
        let w = self.width as i32;
        let h = self.height as i32;
        Location::new(x.rem_euclid(w) as u32, y.rem_euclid(h) as u32)
    }

    /// Shift a location by a signed offset with wraparound.
    #[inline]
    pub fn step(self, loc: Location, dx: i32, dy: i32) -> Location {
        self.wrap(loc.x() as i32 + dx, loc.y() as i32 + dy)
    }

    /// The 4 cardinal neighbors of a cell, with wraparound.
    pub fn neighbors4(self, loc: Location) -> [Location; 4] {
        let mut out = [loc; 4];
        for (slot, &(dx, dy)) in out.iter_mut().zip(NEIGHBORS_4.iter()) {
            *slot = self.step(loc, dx, dy);
        }
        out
    }

    /// Wrapped taxicab distance between two cells:
    /// `min(|dx|, w-|dx|) + min(|dy|, h-|dy|)`.
    pub fn distance(self, a: Location, b: Location) -> u32 {
        let dx = (a.x() as i32 - b.x() as i32).unsigned_abs();
        let dy = (a.y() as i32 - b.y() as i32).unsigned_abs();
        dx.min(self.width as u32 - dx) + dy.min(self.height as u32 - dy)
    }

    /// All cells in row-major order.
    pub fn locations(self) -> impl Iterator<Item = Location> {
        let w = self.width;
        let h = self.height;
        (0..h).flat_map(move |y| (0..w).map(move |x| Location::new(x as u32, y as u32)))
    }
}

/// A flat row-major array holding one `T` per map cell.
#[derive(Clone, PartialEq, Debug)]
pub struct GridArray<T: Copy> {
    dims: GridDims,
    data: Vec<T>,
}

impl<T: Copy> GridArray<T> {
    pub fn new(dims: GridDims, initial: T) -> Self {
        GridArray {
            dims,
            data: vec![initial; dims.area()],
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    #[inline]
    pub fn get(&self, loc: Location) -> T {
        self.data[self.dims.index(loc)]
    }

    #[inline]
    pub fn get_mut(&mut self, loc: Location) -> &mut T {
        let index = self.dims.index(loc);
        &mut self.data[index]
    }

    #[inline]
    pub fn set(&mut self, loc: Location, value: T) {
        *self.get_mut(loc) = value;
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = (Location, &T)> {
        let w = self.dims.width;
        self.data.iter().enumerate().map(move |(i, v)| {
            let x = (i % w) as u32;
            let y = (i / w) as u32;
            (Location::new(x, y), v)
        })
    }

    /// Rebuild every cell from a function of its location.
    pub fn fill_with<F: FnMut(Location) -> T>(dims: GridDims, mut f: F) -> Self {
        let data = dims.locations().map(|loc| f(loc)).collect();
        GridArray { dims, data }
    }
}

impl GridArray<f32> {
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    pub fn total(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b))
    }

    /// Location of the maximum value, first in row-major order on ties.
    pub fn argmax(&self) -> (Location, f32) {
        let mut best = f32::NEG_INFINITY;
        let mut best_index = 0;
        for (i, &v) in self.data.iter().enumerate() {
            if v > best {
                best = v;
                best_index = i;
            }
        }
        let w = self.dims.width;
        let loc = Location::new((best_index % w) as u32, (best_index / w) as u32);
        (loc, best)
    }
}

/// Wrap-mode Gaussian smoothing of a whole-grid field, used to build the
/// resource-concentration maps. Separable convolution with a kernel
/// truncated at 4 standard deviations, wrapping at the map edges.
pub fn gaussian_smooth(src: &GridArray<f32>, sigma: f32) -> GridArray<f32> {
    let dims = src.dims();
    let radius = (sigma * 4.0).ceil() as i32;

    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let denom = 2.0 * sigma * sigma;
    for k in -radius..=radius {
        kernel.push((-((k * k) as f32) / denom).exp());
    }
    let norm: f32 = kernel.iter().sum();
    for v in kernel.iter_mut() {
        *v /= norm;
    }

    // Horizontal pass
    let mut tmp = GridArray::new(dims, 0.0f32);
    for loc in dims.locations() {
        let mut acc = 0.0;
        for (ki, &kv) in kernel.iter().enumerate() {
            let offset = ki as i32 - radius;
            acc += kv * src.get(dims.step(loc, offset, 0));
        }
        tmp.set(loc, acc);
    }

    // Vertical pass
    let mut out = GridArray::new(dims, 0.0f32);
    for loc in dims.locations() {
        let mut acc = 0.0;
        for (ki, &kv) in kernel.iter().enumerate() {
            let offset = ki as i32 - radius;
            acc += kv * tmp.get(dims.step(loc, 0, offset));
        }
        out.set(loc, acc);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn neighbors_wrap_at_edges() {
        let dims = GridDims::new(8, 8);
        let corner = Location::new(0, 0);
        let neighbors = dims.neighbors4(corner);
        assert!(neighbors.contains(&Location::new(0, 7)));
        assert!(neighbors.contains(&Location::new(0, 1)));
        assert!(neighbors.contains(&Location::new(1, 0)));
        assert!(neighbors.contains(&Location::new(7, 0)));
    }

    #[test]
    fn distance_wraps_both_axes() {
        let dims = GridDims::new(16, 16);
        let a = Location::new(1, 1);
        let b = Location::new(15, 15);
        assert_eq!(dims.distance(a, b), 4);
    }

    #[test]
    fn all_neighbors_are_distance_one() {
        let dims = GridDims::new(5, 9);
        for loc in dims.locations() {
            for n in dims.neighbors4(loc) {
                assert_eq!(dims.distance(loc, n), 1);
            }
        }
    }

    #[test]
    fn smoothing_preserves_mass_and_uniform_fields() {
        let dims = GridDims::new(12, 12);
        let mut field = GridArray::new(dims, 0.0f32);
        field.set(Location::new(3, 7), 100.0);
        field.set(Location::new(11, 0), 40.0);

        let smoothed = gaussian_smooth(&field, 1.0);
        let before: f32 = field.as_slice().iter().sum();
        let after: f32 = smoothed.as_slice().iter().sum();
        assert!((before - after).abs() < 1e-3);

        let uniform = GridArray::new(dims, 5.0f32);
        let smoothed = gaussian_smooth(&uniform, 3.0);
        for &v in smoothed.as_slice() {
            assert!((v - 5.0).abs() < 1e-4);
        }
    }

    proptest! {
        #[test]
        fn distance_is_symmetric_and_matches_formula(
            w in 1usize..=64, h in 1usize..=64,
            ax in 0u32..64, ay in 0u32..64,
            bx in 0u32..64, by in 0u32..64,
        ) {
            let dims = GridDims::new(w, h);
            let a = Location::new(ax % w as u32, ay % h as u32);
            let b = Location::new(bx % w as u32, by % h as u32);

            let dx = (a.x() as i32 - b.x() as i32).unsigned_abs();
            let dy = (a.y() as i32 - b.y() as i32).unsigned_abs();
            let expected = dx.min(w as u32 - dx) + dy.min(h as u32 - dy);

            prop_assert_eq!(dims.distance(a, b), expected);
            prop_assert_eq!(dims.distance(a, b), dims.distance(b, a));
        }
    }
}
