//! Topology math for the 2-D periodic grid overlaid on the ranks.

use super::World;
use crate::error::{MpiError, Result};

impl World {
    /// Compute the grid coordinates of `rank` for the given dimensions,
    /// recording the grid shape for later coordinate queries.
    ///
    /// Only 2-D grids are supported: `dims[0] * dims[1]` must equal the
    /// world size and every higher dimension must have extent one. The grid
    /// is periodic in every axis, so all periods are reported as `1`.
    pub fn get_cartesian_rank(
        &self,
        rank: i32,
        max_dims: usize,
        dims: &[i32],
        periods: &mut [i32],
        coords: &mut [i32],
    ) -> Result<()> {
        if rank >= self.size {
            return Err(MpiError::BadRank {
                rank,
                size: self.size,
            });
        }

        if dims[0] * dims[1] != self.size {
            return Err(MpiError::BadCartDim {
                dims: dims[..max_dims].to_vec(),
                size: self.size,
            });
        }

        // All ranks record the same shape; either dimension could be
        // derived from the other and the world size.
        *self.cart_procs_per_dim.lock() = [dims[0], dims[1]];

        coords[0] = rank / dims[1];
        coords[1] = rank % dims[1];
        periods[0] = 1;
        periods[1] = 1;

        for dim in 2..max_dims {
            if dims[dim] != 1 {
                return Err(MpiError::BadCartDim {
                    dims: dims[..max_dims].to_vec(),
                    size: self.size,
                });
            }
            coords[dim] = 0;
            periods[dim] = 1;
        }

        Ok(())
    }

    /// Inverse of [`World::get_cartesian_rank`]: the rank sitting at `coords`.
    pub fn get_rank_from_coords(&self, coords: &[i32]) -> Result<i32> {
        let procs_per_dim = *self.cart_procs_per_dim.lock();

        if procs_per_dim[0] * procs_per_dim[1] != self.size {
            return Err(MpiError::BadCartDim {
                dims: procs_per_dim.to_vec(),
                size: self.size,
            });
        }

        Ok(coords[1] + coords[0] * procs_per_dim[1])
    }

    /// Ranks reached by moving `disp` units along `direction` from `rank`,
    /// returned as `(source, destination)`: the rank that lands on us and
    /// the rank we land on.
    pub fn shift_cartesian_coords(
        &self,
        rank: i32,
        direction: i32,
        disp: i32,
    ) -> Result<(i32, i32)> {
        let procs_per_dim = *self.cart_procs_per_dim.lock();
        let coords = [rank / procs_per_dim[1], rank % procs_per_dim[1]];

        // Forwards with periodicity; in dimensions beyond the grid we are
        // the only process, so any displacement lands back on ourselves.
        let forward = match direction {
            0 => [(coords[0] + disp) % procs_per_dim[0], coords[1]],
            1 => [coords[0], (coords[1] + disp) % procs_per_dim[1]],
            _ => coords,
        };
        let destination = self.get_rank_from_coords(&forward)?;

        // Backwards adds a full loop first so the modulo never sees a
        // negative value.
        let backward = match direction {
            0 => [
                (coords[0] - disp + procs_per_dim[0]) % procs_per_dim[0],
                coords[1],
            ],
            1 => [
                coords[0],
                (coords[1] - disp + procs_per_dim[1]) % procs_per_dim[1],
            ],
            _ => coords,
        };
        let source = self.get_rank_from_coords(&backward)?;

        Ok((source, destination))
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use crate::world::World;
    use crate::MpiError;

    const MAX_DIMS: usize = 3;

    #[test]
    fn test_coords_in_5x1_grid() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 5).unwrap();

        let dims = [5, 1, 1];
        let mut periods = [0; MAX_DIMS];
        let mut coords = [0; MAX_DIMS];

        world
            .get_cartesian_rank(2, MAX_DIMS, &dims, &mut periods, &mut coords)
            .unwrap();

        assert_eq!(coords, [2, 0, 0]);
        assert_eq!(periods, [1, 1, 1]);
    }

    #[test]
    fn test_rank_coords_round_trip() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 6).unwrap();

        let dims = [2, 3, 1];
        for rank in 0..6 {
            let mut periods = [0; MAX_DIMS];
            let mut coords = [0; MAX_DIMS];
            world
                .get_cartesian_rank(rank, MAX_DIMS, &dims, &mut periods, &mut coords)
                .unwrap();

            assert_eq!(world.get_rank_from_coords(&coords).unwrap(), rank);
        }
    }

    #[test]
    fn test_shift_in_5x1_grid() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 5).unwrap();

        let dims = [5, 1, 1];
        let mut periods = [0; MAX_DIMS];
        let mut coords = [0; MAX_DIMS];
        world
            .get_cartesian_rank(2, MAX_DIMS, &dims, &mut periods, &mut coords)
            .unwrap();

        let (source, destination) = world.shift_cartesian_coords(2, 0, 1).unwrap();
        assert_eq!(source, 1);
        assert_eq!(destination, 3);

        // Periodicity wraps both ends of the axis.
        let (source, destination) = world.shift_cartesian_coords(4, 0, 1).unwrap();
        assert_eq!(source, 3);
        assert_eq!(destination, 0);

        // A size-one axis shifts onto itself.
        let (source, destination) = world.shift_cartesian_coords(2, 1, 1).unwrap();
        assert_eq!(source, 2);
        assert_eq!(destination, 2);

        // Directions beyond the grid land on ourselves by periodicity.
        let (source, destination) = world.shift_cartesian_coords(2, 2, 1).unwrap();
        assert_eq!(source, 2);
        assert_eq!(destination, 2);
    }

    #[test]
    fn test_bad_dimensions_fail() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 5).unwrap();

        let mut periods = [0; MAX_DIMS];
        let mut coords = [0; MAX_DIMS];

        // Product does not match the world size.
        assert!(matches!(
            world.get_cartesian_rank(2, MAX_DIMS, &[2, 2, 1], &mut periods, &mut coords),
            Err(MpiError::BadCartDim { .. })
        ));

        // Non-unit extent above dimension two.
        assert!(matches!(
            world.get_cartesian_rank(2, MAX_DIMS, &[5, 1, 2], &mut periods, &mut coords),
            Err(MpiError::BadCartDim { .. })
        ));
    }
}
