//! Bounded 2D cell map shared by the shard and the client predictor.
//!
//! Addressed access (`get_value`/`set_value`) treats an out-of-range coordinate
//! as a defect and returns [`GridError::OutOfBounds`]. Directional access treats
//! leaving the grid as an ordinary answer and returns `None`/`false` instead.

use crate::movement::CellSource;
use crate::{Coord, Direction};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    #[default]
    Empty,
    Blocked,
    Food,
    Snake,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("cell ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: usize,
        height: usize,
    },
    #[error("cannot merge a {overlay_width}x{overlay_height} overlay into a {width}x{height} grid")]
    DimensionMismatch {
        width: usize,
        height: usize,
        overlay_width: usize,
        overlay_height: usize,
    },
}

/// Rectangle inside a grid, anchored at its top-left cell.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
}

impl Bounds {
    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= self.x
            && coord.y >= self.y
            && coord.x < self.x + self.width as i32
            && coord.y < self.y + self.height as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Creates a grid with every cell empty, optionally blocking the perimeter.
    pub fn new(width: usize, height: usize, block_edges: bool) -> Self {
        let mut cells = vec![Cell::Empty; width * height];

        if block_edges {
            for y in 0..height {
                for x in 0..width {
                    if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                        cells[x + y * width] = Cell::Blocked;
                    }
                }
            }
        }

        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_out_of_bounds(&self, x: i32, y: i32) -> bool {
        x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height
    }

    fn index(&self, x: i32, y: i32) -> Result<usize, GridError> {
        if self.is_out_of_bounds(x, y) {
            return Err(GridError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(x as usize + y as usize * self.width)
    }

    pub fn get_value(&self, x: i32, y: i32) -> Result<Cell, GridError> {
        let index = self.index(x, y)?;
        Ok(self.cells[index])
    }

    pub fn set_value(&mut self, x: i32, y: i32, value: Cell) -> Result<(), GridError> {
        let index = self.index(x, y)?;
        self.cells[index] = value;
        Ok(())
    }

    pub fn empty_spaces(&self) -> Vec<Coord> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell == Cell::Empty)
            .map(|(i, _)| Coord::new((i % self.width) as i32, (i / self.width) as i32))
            .collect()
    }

    /// Uniformly picks an empty cell, or `None` when the grid is full.
    pub fn random_empty_space<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Coord> {
        self.empty_spaces().choose(rng).copied()
    }

    pub fn count(&self, value: Cell) -> usize {
        self.cells.iter().filter(|cell| **cell == value).count()
    }

    pub fn is_direction_inside(&self, x: i32, y: i32, direction: Direction) -> bool {
        self.coordinates_in_direction(x, y, direction).is_some()
    }

    pub fn coordinates_in_direction(&self, x: i32, y: i32, direction: Direction) -> Option<Coord> {
        if self.is_out_of_bounds(x, y) {
            return None;
        }
        let next = Coord::new(x, y).offset(direction);
        if self.is_out_of_bounds(next.x, next.y) {
            None
        } else {
            Some(next)
        }
    }

    pub fn value_in_direction(&self, x: i32, y: i32, direction: Direction) -> Option<Cell> {
        let next = self.coordinates_in_direction(x, y, direction)?;
        self.get_value(next.x, next.y).ok()
    }

    /// Returns false when the neighbour lies outside the grid.
    pub fn set_value_in_direction(
        &mut self,
        x: i32,
        y: i32,
        direction: Direction,
        value: Cell,
    ) -> bool {
        match self.coordinates_in_direction(x, y, direction) {
            Some(next) => self.set_value(next.x, next.y, value).is_ok(),
            None => false,
        }
    }

    /// Window of `(w + 2 * buffer) x (h + 2 * buffer)` centred on `(x, y)`.
    ///
    /// The window is shrunk to the grid when larger and shifted away from the
    /// edges so that it always lies inside `[0, width) x [0, height)`.
    pub fn subgrid_bounds(&self, x: i32, y: i32, w: usize, h: usize, buffer: usize) -> Bounds {
        let width = (w + 2 * buffer).min(self.width);
        let height = (h + 2 * buffer).min(self.height);

        let max_left = (self.width - width) as i32;
        let max_top = (self.height - height) as i32;

        Bounds {
            x: (x - (width / 2) as i32).clamp(0, max_left),
            y: (y - (height / 2) as i32).clamp(0, max_top),
            width,
            height,
        }
    }

    /// Copy of the whole grid as rows.
    pub fn grid_array(&self) -> Vec<Vec<Cell>> {
        self.cells
            .chunks(self.width.max(1))
            .take(self.height)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Copy of the window around `(x, y)` together with the window bounds.
    pub fn subgrid_array(
        &self,
        x: i32,
        y: i32,
        w: usize,
        h: usize,
        buffer: usize,
    ) -> (Bounds, Vec<Vec<Cell>>) {
        let bounds = self.subgrid_bounds(x, y, w, h, buffer);
        let left = bounds.x as usize;
        let top = bounds.y as usize;

        let rows = (top..top + bounds.height)
            .map(|row| {
                let start = left + row * self.width;
                self.cells[start..start + bounds.width].to_vec()
            })
            .collect();

        (bounds, rows)
    }

    /// New grid where every non-empty overlay cell replaces the base cell.
    pub fn merge(&self, overlay: &Grid) -> Result<Grid, GridError> {
        if overlay.width != self.width || overlay.height != self.height {
            return Err(GridError::DimensionMismatch {
                width: self.width,
                height: self.height,
                overlay_width: overlay.width,
                overlay_height: overlay.height,
            });
        }

        let cells = self
            .cells
            .iter()
            .zip(&overlay.cells)
            .map(|(base, top)| if *top == Cell::Empty { *base } else { *top })
            .collect();

        Ok(Grid {
            width: self.width,
            height: self.height,
            cells,
        })
    }
}

impl CellSource for Grid {
    fn cell_at(&self, coord: Coord) -> Option<Cell> {
        self.get_value(coord.x, coord.y).ok()
    }
}
