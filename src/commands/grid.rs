use std::str::FromStr;

use clap::Subcommand;
use killbot::{Coordinate, CubeId, Grid};

#[derive(Subcommand)]
pub enum GridCommand {
    /// Coordinates of a cube id
    Coord { id: CubeId },
    /// Cube id at x,y,z (0-based)
    Id {
        #[arg(value_name = "x,y,z")]
        coord: CoordArg,
    },
    /// Hop-by-hop path from one cube to another (x, then y, then z)
    Path { from: CubeId, to: CubeId },
    /// Cubes one hop away
    Neighbors { id: CubeId },
    /// Cubes within a Manhattan radius
    Radius { id: CubeId, radius: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordArg(pub Coordinate);

impl FromStr for CoordArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.trim().split(',').collect();
        if parts.len() != 3 {
            return Err("Coordinate must be formatted as x,y,z".into());
        }

        let x = parts[0]
            .trim()
            .parse::<u16>()
            .map_err(|_| "x must be a non-negative integer")?;
        let y = parts[1]
            .trim()
            .parse::<u16>()
            .map_err(|_| "y must be a non-negative integer")?;
        let z = parts[2]
            .trim()
            .parse::<u16>()
            .map_err(|_| "z must be a non-negative integer")?;

        Ok(CoordArg(Coordinate { x, y, z }))
    }
}

pub(super) fn run_grid(side: u16, cmd: GridCommand) -> Result<(), String> {
    let grid = Grid::new(side).map_err(|e| e.to_string())?;
    match cmd {
        GridCommand::Coord { id } => {
            let coord = grid.coordinate_of(id).map_err(|e| e.to_string())?;
            println!("cube {} = {}", id, coord);
        }
        GridCommand::Id { coord } => {
            let id = grid.id_of(coord.0).map_err(|e| e.to_string())?;
            println!("{} = cube {}", coord.0, id);
        }
        GridCommand::Path { from, to } => {
            let path = walk(&grid, from, to)?;
            let rendered: Vec<String> = path.iter().map(|id| id.to_string()).collect();
            println!("{} hop(s): {}", path.len() - 1, rendered.join(" -> "));
        }
        GridCommand::Neighbors { id } => {
            let neighbors = grid.neighbors(id).map_err(|e| e.to_string())?;
            println!("cube {}: {:?}", id, neighbors);
        }
        GridCommand::Radius { id, radius } => {
            let cubes = grid.within_radius(id, radius).map_err(|e| e.to_string())?;
            println!("{} cube(s) within {} of {}: {:?}", cubes.len(), radius, id, cubes);
        }
    }
    Ok(())
}

/// Every cube visited stepping from `from` to `to`, both ends included.
fn walk(grid: &Grid, from: CubeId, to: CubeId) -> Result<Vec<CubeId>, String> {
    grid.check(to).map_err(|e| e.to_string())?;
    let mut path = vec![from];
    let mut at = from;
    while at != to {
        let (_, next) = grid.next_step_toward(at, to).map_err(|e| e.to_string())?;
        at = next;
        path.push(at);
    }
    Ok(path)
}
