use std::fmt;

use serde::{Deserialize, Serialize};

/// 1-based lattice cell identifier.
pub type CubeId = u16;

/// Side length of the reference deployment (6 × 6 × 6 = 216 cubes).
pub const DEFAULT_SIDE: u16 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GridError {
    OutOfRange { value: u32, limit: u32 },
    InvalidSide(u16),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::OutOfRange { value, limit } => {
                write!(f, "value {} out of range (limit {})", value, limit)
            }
            GridError::InvalidSide(side) => write!(f, "invalid lattice side length {}", side),
        }
    }
}

impl std::error::Error for GridError {}

/// Bounded cubic lattice. Ids map to coordinates via `id - 1 = x + y·side + z·side²`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    side: u16,
}

impl Default for Grid {
    fn default() -> Self {
        Self { side: DEFAULT_SIDE }
    }
}

impl Grid {
    pub fn new(side: u16) -> Result<Self, GridError> {
        // side³ must still fit in a CubeId.
        if side == 0 || (side as u32).pow(3) > CubeId::MAX as u32 {
            return Err(GridError::InvalidSide(side));
        }
        Ok(Self { side })
    }

    pub fn side(&self) -> u16 {
        self.side
    }

    pub fn cube_count(&self) -> CubeId {
        self.side * self.side * self.side
    }

    pub fn ids(&self) -> impl Iterator<Item = CubeId> {
        1..=self.cube_count()
    }

    pub fn check(&self, id: CubeId) -> Result<CubeId, GridError> {
        if id == 0 || id > self.cube_count() {
            return Err(GridError::OutOfRange {
                value: id as u32,
                limit: self.cube_count() as u32,
            });
        }
        Ok(id)
    }

    pub fn coordinate_of(&self, id: CubeId) -> Result<Coordinate, GridError> {
        let v = self.check(id)? - 1;
        Ok(Coordinate {
            x: v % self.side,
            y: (v / self.side) % self.side,
            z: v / (self.side * self.side),
        })
    }

    pub fn id_of(&self, coord: Coordinate) -> Result<CubeId, GridError> {
        for axis in [coord.x, coord.y, coord.z] {
            if axis >= self.side {
                return Err(GridError::OutOfRange {
                    value: axis as u32,
                    limit: self.side as u32 - 1,
                });
            }
        }
        Ok(coord.x + coord.y * self.side + coord.z * self.side * self.side + 1)
    }

    pub fn manhattan(&self, a: CubeId, b: CubeId) -> Result<u32, GridError> {
        let ca = self.coordinate_of(a)?;
        let cb = self.coordinate_of(b)?;
        Ok(ca.x.abs_diff(cb.x) as u32 + ca.y.abs_diff(cb.y) as u32 + ca.z.abs_diff(cb.z) as u32)
    }

    pub fn is_adjacent(&self, a: CubeId, b: CubeId) -> Result<bool, GridError> {
        Ok(self.manhattan(a, b)? == 1)
    }

    /// One hop along a shortest Manhattan path from `from` to `to`.
    ///
    /// Axes are resolved in fixed order x, then y, then z, so the step is
    /// deterministic even though many shortest paths exist. Returns
    /// `(from, from)` when the two ids are equal.
    pub fn next_step_toward(&self, from: CubeId, to: CubeId) -> Result<(CubeId, CubeId), GridError> {
        let mut at = self.coordinate_of(from)?;
        let dest = self.coordinate_of(to)?;

        if at.x != dest.x {
            at.x = step_axis(at.x, dest.x);
        } else if at.y != dest.y {
            at.y = step_axis(at.y, dest.y);
        } else if at.z != dest.z {
            at.z = step_axis(at.z, dest.z);
        }

        Ok((from, self.id_of(at)?))
    }

    /// All cubes at Manhattan distance exactly 1, ascending.
    pub fn neighbors(&self, id: CubeId) -> Result<Vec<CubeId>, GridError> {
        let c = self.coordinate_of(id)?;
        let mut out = Vec::with_capacity(6);
        let last = self.side - 1;
        if c.x > 0 {
            out.push(self.id_of(Coordinate { x: c.x - 1, ..c })?);
        }
        if c.x < last {
            out.push(self.id_of(Coordinate { x: c.x + 1, ..c })?);
        }
        if c.y > 0 {
            out.push(self.id_of(Coordinate { y: c.y - 1, ..c })?);
        }
        if c.y < last {
            out.push(self.id_of(Coordinate { y: c.y + 1, ..c })?);
        }
        if c.z > 0 {
            out.push(self.id_of(Coordinate { z: c.z - 1, ..c })?);
        }
        if c.z < last {
            out.push(self.id_of(Coordinate { z: c.z + 1, ..c })?);
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Every cube within `radius` (Manhattan) of `center`, including `center`, ascending.
    pub fn within_radius(&self, center: CubeId, radius: u32) -> Result<Vec<CubeId>, GridError> {
        self.check(center)?;
        let mut out = Vec::new();
        for id in self.ids() {
            if self.manhattan(center, id)? <= radius {
                out.push(id);
            }
        }
        Ok(out)
    }
}

fn step_axis(at: u16, dest: u16) -> u16 {
    if dest > at { at + 1 } else { at - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::default()
    }

    #[test]
    fn id_coordinate_round_trip_covers_every_cube() {
        let g = grid();
        for id in g.ids() {
            let c = g.coordinate_of(id).unwrap();
            assert_eq!(g.id_of(c).unwrap(), id);
        }
        assert_eq!(g.cube_count(), 216);
    }

    #[test]
    fn corner_cubes_map_to_lattice_corners() {
        let g = grid();
        assert_eq!(g.coordinate_of(1).unwrap(), Coordinate { x: 0, y: 0, z: 0 });
        assert_eq!(g.coordinate_of(216).unwrap(), Coordinate { x: 5, y: 5, z: 5 });
        assert_eq!(g.coordinate_of(7).unwrap(), Coordinate { x: 0, y: 1, z: 0 });
        assert_eq!(g.coordinate_of(37).unwrap(), Coordinate { x: 0, y: 0, z: 1 });
    }

    #[test]
    fn out_of_range_ids_and_axes_are_rejected() {
        let g = grid();
        assert!(matches!(g.coordinate_of(0), Err(GridError::OutOfRange { .. })));
        assert!(matches!(g.coordinate_of(217), Err(GridError::OutOfRange { .. })));
        assert!(matches!(
            g.id_of(Coordinate { x: 6, y: 0, z: 0 }),
            Err(GridError::OutOfRange { .. })
        ));
        assert!(g.manhattan(1, 300).is_err());
    }

    #[test]
    fn adjacency_matches_unit_manhattan_distance() {
        let g = grid();
        for a in (1..=216).step_by(7) {
            for b in g.ids() {
                let d = g.manhattan(a, b).unwrap();
                assert_eq!(g.is_adjacent(a, b).unwrap(), d == 1);
                assert_eq!(d, g.manhattan(b, a).unwrap());
            }
        }
    }

    #[test]
    fn manhattan_satisfies_triangle_inequality() {
        let g = grid();
        for a in (1..=216).step_by(11) {
            for b in (1..=216).step_by(13) {
                for c in (1..=216).step_by(17) {
                    let ab = g.manhattan(a, b).unwrap();
                    let bc = g.manhattan(b, c).unwrap();
                    let ac = g.manhattan(a, c).unwrap();
                    assert!(ac <= ab + bc);
                }
            }
        }
    }

    #[test]
    fn next_step_resolves_x_axis_first() {
        let g = grid();
        let from = g.id_of(Coordinate { x: 0, y: 0, z: 0 }).unwrap();
        let to = g.id_of(Coordinate { x: 2, y: 1, z: 0 }).unwrap();
        let (origin, step) = g.next_step_toward(from, to).unwrap();
        assert_eq!(origin, from);
        assert_eq!(g.coordinate_of(step).unwrap(), Coordinate { x: 1, y: 0, z: 0 });
    }

    #[test]
    fn next_step_moves_to_y_then_z_once_x_matches() {
        let g = grid();
        let from = g.id_of(Coordinate { x: 3, y: 4, z: 4 }).unwrap();
        let to = g.id_of(Coordinate { x: 3, y: 2, z: 1 }).unwrap();
        let (_, step) = g.next_step_toward(from, to).unwrap();
        assert_eq!(g.coordinate_of(step).unwrap(), Coordinate { x: 3, y: 3, z: 4 });

        let from = g.id_of(Coordinate { x: 3, y: 2, z: 4 }).unwrap();
        let (_, step) = g.next_step_toward(from, to).unwrap();
        assert_eq!(g.coordinate_of(step).unwrap(), Coordinate { x: 3, y: 2, z: 3 });
    }

    #[test]
    fn repeated_steps_walk_a_shortest_path() {
        let g = grid();
        let (mut at, dest) = (1, 216);
        let mut hops = 0;
        while at != dest {
            let (_, next) = g.next_step_toward(at, dest).unwrap();
            assert!(g.is_adjacent(at, next).unwrap());
            at = next;
            hops += 1;
        }
        assert_eq!(hops, g.manhattan(1, 216).unwrap());
        assert_eq!(g.next_step_toward(dest, dest).unwrap(), (dest, dest));
    }

    #[test]
    fn neighbors_of_corner_and_center() {
        let g = grid();
        assert_eq!(g.neighbors(1).unwrap(), vec![2, 7, 37]);
        let center = g.id_of(Coordinate { x: 2, y: 2, z: 2 }).unwrap();
        assert_eq!(g.neighbors(center).unwrap().len(), 6);
    }

    #[test]
    fn radius_zero_is_just_the_center() {
        let g = grid();
        assert_eq!(g.within_radius(44, 0).unwrap(), vec![44]);
        assert_eq!(g.within_radius(1, 1).unwrap(), vec![1, 2, 7, 37]);
    }

    #[test]
    fn rejects_degenerate_sides() {
        assert_eq!(Grid::new(0), Err(GridError::InvalidSide(0)));
        assert!(Grid::new(41).is_err());
        assert_eq!(Grid::new(3).unwrap().cube_count(), 27);
    }
}
