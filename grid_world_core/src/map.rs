use std::ops::{Index, IndexMut};

use crate::{Position, StateIndex};

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Grid size {width}x{height} is empty or overflows")]
    InvalidSize { width: usize, height: usize },
}

/// A 2D grid stored as a flat row-major vector.
///
/// The mapping `index = x + y * width` is the one place where cells and linear
/// state indices are converted into each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a grid of the given size with every cell set to `value`.
    ///
    /// Fails if either dimension is zero or `width * height` overflows `usize`.
    pub fn filled(width: usize, height: usize, value: T) -> Result<Self, GridError>
    where
        T: Clone,
    {
        let size = width
            .checked_mul(height)
            .filter(|size| *size > 0)
            .ok_or(GridError::InvalidSize { width, height })?;
        Ok(Grid {
            width,
            height,
            cells: vec![value; size],
        })
    }

    /// Returns the width of the grid.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the height of the grid.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of cells, `width * height`.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always `false` for a grid built with [`Grid::filled`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Checks if the given coordinates are within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Converts a position to its linear index, `None` when out of bounds.
    #[inline]
    pub fn linear_index(&self, position: Position) -> Option<StateIndex> {
        if self.is_valid(position.x, position.y) {
            Some(position.x + position.y * self.width)
        } else {
            None
        }
    }

    /// Converts a linear index back to a position, `None` when out of bounds.
    #[inline]
    pub fn position_of(&self, index: StateIndex) -> Option<Position> {
        if index < self.cells.len() {
            Some(Position {
                x: index % self.width,
                y: index / self.width,
            })
        } else {
            None
        }
    }

    /// Clamps signed coordinates into `[0, width-1] x [0, height-1]`.
    ///
    /// Used for character moves, where a proposed cell may sit one step
    /// outside the grid.
    pub fn clamp(&self, x: isize, y: isize) -> Position {
        let max_x = self.width.saturating_sub(1) as isize;
        let max_y = self.height.saturating_sub(1) as isize;
        Position {
            x: x.clamp(0, max_x) as usize,
            y: y.clamp(0, max_y) as usize,
        }
    }

    /// Returns a slice containing all cells in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }
}

/// Cell access by position.
///
/// # Panics
///
/// Panics if `position` is outside the grid.
impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, position: Position) -> &Self::Output {
        match self.linear_index(position) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                position.x, position.y, self.width, self.height
            ),
        }
    }
}

/// Mutable cell access by position.
///
/// # Panics
///
/// Panics if `position` is outside the grid.
impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, position: Position) -> &mut Self::Output {
        let (width, height) = (self.width, self.height);
        match self.linear_index(position) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                position.x, position.y, width, height
            ),
        }
    }
}
