use crate::geometry::{clamp_block, LevelGeometry};

/// Regular grid of cells over one level.
///
/// Cells are indexed in x-fastest order. Border cells are clamped to the
/// level extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    dimensions: [u64; 3],
    cell_shape: [u32; 3],
    grid_dimensions: [u64; 3],
}

impl CellGrid {
    /// `cell_shape` must be non-zero on every axis.
    pub fn new(dimensions: [u64; 3], cell_shape: [u32; 3]) -> Self {
        let mut grid_dimensions = [0u64; 3];
        for axis in 0..3 {
            grid_dimensions[axis] =
                dimensions[axis].div_ceil(u64::from(cell_shape[axis].max(1)));
        }
        Self {
            dimensions,
            cell_shape,
            grid_dimensions,
        }
    }

    pub fn for_level(level: &LevelGeometry) -> Self {
        Self::new(level.dimensions, level.block_shape)
    }

    pub fn dimensions(&self) -> [u64; 3] {
        self.dimensions
    }

    pub fn cell_shape(&self) -> [u32; 3] {
        self.cell_shape
    }

    /// Number of cells along each axis.
    pub fn grid_dimensions(&self) -> [u64; 3] {
        self.grid_dimensions
    }

    pub fn num_cells(&self) -> u64 {
        self.grid_dimensions.iter().product()
    }

    /// Grid position of cell `index`.
    pub fn cell_position(&self, index: u64) -> Option<[u64; 3]> {
        if index >= self.num_cells() {
            return None;
        }
        let [gx, gy, _] = self.grid_dimensions;
        Some([index % gx, (index / gx) % gy, index / (gx * gy)])
    }

    /// Index of the cell at grid `position`.
    pub fn cell_index(&self, position: [u64; 3]) -> Option<u64> {
        if (0..3).any(|axis| position[axis] >= self.grid_dimensions[axis]) {
            return None;
        }
        let [gx, gy, _] = self.grid_dimensions;
        Some(position[0] + gx * (position[1] + gy * position[2]))
    }

    /// Pixel origin of the cell at grid `position`.
    pub fn cell_origin(&self, position: [u64; 3]) -> [u64; 3] {
        let mut origin = [0u64; 3];
        for axis in 0..3 {
            origin[axis] = position[axis] * u64::from(self.cell_shape[axis]);
        }
        origin
    }

    /// Shape of the cell at grid `position`, clamped to the level extent.
    pub fn cell_shape_at(&self, position: [u64; 3]) -> [u32; 3] {
        clamp_block(self.cell_origin(position), self.cell_shape, self.dimensions)
    }

    /// Cell index containing pixel `point`.
    pub fn cell_containing(&self, point: [u64; 3]) -> Option<u64> {
        if (0..3).any(|axis| point[axis] >= self.dimensions[axis]) {
            return None;
        }
        let mut position = [0u64; 3];
        for axis in 0..3 {
            position[axis] = point[axis] / u64::from(self.cell_shape[axis].max(1));
        }
        self.cell_index(position)
    }
}
