//! Collective operations, all expressed through the point-to-point engine.
//!
//! Each collective stamps its envelopes with its own message type so that
//! concurrent collectives between the same ranks never cross-match.

use super::{check_send_recv_match, World};
use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::types::MpiMessageType;
use cumulus_core::data_type::DataType;
use cumulus_core::reduction::{op_reduce, ReduceOp};

impl World {
    /// Send `buffer` from `send_rank` to every other rank.
    pub fn broadcast(
        &self,
        send_rank: i32,
        buffer: Option<&[u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> Result<()> {
        trace!("mpi - bcast {} -> all", send_rank);

        for rank in 0..self.size() {
            // Skip the broadcasting rank.
            if rank == send_rank {
                continue;
            }

            self.send(send_rank, rank, buffer, data_type, count, message_type)?;
        }

        Ok(())
    }

    /// Distribute consecutive chunks of root's `send_buffer`, one per rank.
    pub fn scatter(
        &self,
        send_rank: i32,
        recv_rank: i32,
        send_buffer: &[u8],
        send_type: DataType,
        send_count: i32,
        recv_buffer: &mut [u8],
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let send_offset = send_count as usize * send_type.size_in_bytes();

        if recv_rank == send_rank {
            trace!("mpi - scatter {} -> all", send_rank);

            for rank in 0..self.size() {
                let chunk = &send_buffer[rank as usize * send_offset..][..send_offset];

                if rank == send_rank {
                    // Copy our own chunk directly.
                    recv_buffer[..send_offset].copy_from_slice(chunk);
                } else {
                    self.send(
                        send_rank,
                        rank,
                        Some(chunk),
                        send_type,
                        send_count,
                        MpiMessageType::Scatter,
                    )?;
                }
            }
        } else {
            self.recv(
                send_rank,
                recv_rank,
                Some(recv_buffer),
                recv_type,
                recv_count,
                MpiMessageType::Scatter,
            )?;
        }

        Ok(())
    }

    /// Collect one chunk from every rank into root's `recv_buffer`.
    ///
    /// `send_buffer = None` runs the operation in place: on the root the
    /// rank's own chunk is already in position inside `recv_buffer`, and on
    /// other ranks only the chunk at this rank's slot of `recv_buffer` is
    /// contributed (the all-gather pattern).
    pub fn gather(
        &self,
        send_rank: i32,
        recv_rank: i32,
        send_buffer: Option<&[u8]>,
        send_type: DataType,
        send_count: i32,
        recv_buffer: &mut [u8],
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let send_offset = send_count as usize * send_type.size_in_bytes();
        let recv_offset = recv_count as usize * recv_type.size_in_bytes();

        if send_rank == recv_rank {
            trace!("mpi - gather all -> {}", recv_rank);

            for rank in 0..self.size() {
                let chunk = &mut recv_buffer[rank as usize * recv_offset..][..recv_offset];

                match send_buffer {
                    // In place, our own data is already in position.
                    None if rank == recv_rank => {}
                    Some(own) if rank == recv_rank => chunk.copy_from_slice(&own[..send_offset]),
                    _ => {
                        self.recv(
                            rank,
                            recv_rank,
                            Some(chunk),
                            recv_type,
                            recv_count,
                            MpiMessageType::Gather,
                        )?;
                    }
                }
            }
        } else {
            match send_buffer {
                None => {
                    // In place as part of an all-gather: the full-size buffer
                    // already holds our contribution at our own slot, send
                    // only that part.
                    let own = &recv_buffer[send_rank as usize * send_offset..][..send_offset];
                    self.send(
                        send_rank,
                        recv_rank,
                        Some(own),
                        send_type,
                        send_count,
                        MpiMessageType::Gather,
                    )?;
                }
                Some(own) => {
                    self.send(
                        send_rank,
                        recv_rank,
                        Some(own),
                        send_type,
                        send_count,
                        MpiMessageType::Gather,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Gather everyone's chunk at rank zero, then broadcast the result so
    /// every rank ends with the full buffer.
    pub fn all_gather(
        &self,
        rank: i32,
        send_buffer: Option<&[u8]>,
        send_type: DataType,
        send_count: i32,
        recv_buffer: &mut [u8],
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let root = 0;
        self.gather(
            rank,
            root,
            send_buffer,
            send_type,
            send_count,
            recv_buffer,
            recv_type,
            recv_count,
        )?;

        // The gathered buffer spans every rank's chunk.
        let full_count = recv_count * self.size();
        if rank == root {
            self.broadcast(
                root,
                Some(&*recv_buffer),
                recv_type,
                full_count,
                MpiMessageType::AllGather,
            )?;
        } else {
            self.recv(
                root,
                rank,
                Some(recv_buffer),
                recv_type,
                full_count,
                MpiMessageType::AllGather,
            )?;
        }

        Ok(())
    }

    /// Reduce every rank's contribution into root's `recv_buffer`.
    ///
    /// `send_buffer = None` reduces in place: the caller's contribution is
    /// read from `recv_buffer` instead.
    pub fn reduce(
        &self,
        send_rank: i32,
        recv_rank: i32,
        send_buffer: Option<&[u8]>,
        recv_buffer: &mut [u8],
        data_type: DataType,
        count: i32,
        operation: ReduceOp,
    ) -> Result<()> {
        let buffer_size = data_type.size_in_bytes() * count as usize;

        if send_rank == recv_rank {
            trace!("mpi - reduce ({:?}) all -> {}", operation, recv_rank);

            // Seed the accumulator with our own contribution rather than
            // zeroes, which would corrupt operators like the minimum.
            if let Some(own) = send_buffer {
                recv_buffer[..buffer_size].copy_from_slice(&own[..buffer_size]);
            }

            let mut rank_data = vec![0u8; buffer_size];
            for rank in 0..self.size() {
                if rank == recv_rank {
                    continue;
                }

                rank_data.fill(0);
                self.recv(
                    rank,
                    recv_rank,
                    Some(&mut rank_data),
                    data_type,
                    count,
                    MpiMessageType::Reduce,
                )?;

                op_reduce(operation, data_type, count as usize, &rank_data, recv_buffer)?;
            }
        } else {
            let own = match send_buffer {
                Some(own) => own,
                None => &*recv_buffer,
            };
            self.send(
                send_rank,
                recv_rank,
                Some(own),
                data_type,
                count,
                MpiMessageType::Reduce,
            )?;
        }

        Ok(())
    }

    /// Reduce at rank zero, then broadcast so every rank holds the result.
    pub fn all_reduce(
        &self,
        rank: i32,
        send_buffer: Option<&[u8]>,
        recv_buffer: &mut [u8],
        data_type: DataType,
        count: i32,
        operation: ReduceOp,
    ) -> Result<()> {
        // Rank zero coordinates the operation.
        if rank == 0 {
            self.reduce(0, 0, send_buffer, recv_buffer, data_type, count, operation)?;
            self.broadcast(
                0,
                Some(&*recv_buffer),
                data_type,
                count,
                MpiMessageType::AllReduce,
            )?;
        } else {
            self.reduce(
                rank,
                0,
                send_buffer,
                recv_buffer,
                data_type,
                count,
                operation,
            )?;
            self.recv(
                0,
                rank,
                Some(recv_buffer),
                data_type,
                count,
                MpiMessageType::AllReduce,
            )?;
        }

        Ok(())
    }

    /// Inclusive prefix reduction: rank `r` ends with the fold of the
    /// contributions of ranks `0..=r`.
    pub fn scan(
        &self,
        rank: i32,
        send_buffer: Option<&[u8]>,
        recv_buffer: &mut [u8],
        data_type: DataType,
        count: i32,
        operation: ReduceOp,
    ) -> Result<()> {
        trace!("mpi - scan rank {}", rank);

        if rank >= self.size() {
            return Err(MpiError::BadRank {
                rank,
                size: self.size(),
            });
        }

        let buffer_size = data_type.size_in_bytes() * count as usize;

        // Our own values seed the inclusive prefix.
        if let Some(own) = send_buffer {
            recv_buffer[..buffer_size].copy_from_slice(&own[..buffer_size]);
        }

        if rank > 0 {
            // Fold in the accumulated value from the previous rank.
            let mut accumulated = vec![0u8; buffer_size];
            self.recv(
                rank - 1,
                rank,
                Some(&mut accumulated),
                data_type,
                count,
                MpiMessageType::Scan,
            )?;
            op_reduce(
                operation,
                data_type,
                count as usize,
                &accumulated,
                recv_buffer,
            )?;
        }

        if rank < self.size() - 1 {
            self.send(
                rank,
                rank + 1,
                Some(&*recv_buffer),
                data_type,
                count,
                MpiMessageType::Scan,
            )?;
        }

        Ok(())
    }

    /// Exchange chunk `r` of every rank's `send_buffer` with rank `r`.
    pub fn all_to_all(
        &self,
        rank: i32,
        send_buffer: &[u8],
        send_type: DataType,
        send_count: i32,
        recv_buffer: &mut [u8],
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let send_offset = send_count as usize * send_type.size_in_bytes();

        // Send this rank's outgoing chunks.
        for other in 0..self.size() {
            let chunk = &send_buffer[other as usize * send_offset..][..send_offset];

            if other == rank {
                recv_buffer[other as usize * send_offset..][..send_offset].copy_from_slice(chunk);
            } else {
                self.send(
                    rank,
                    other,
                    Some(chunk),
                    send_type,
                    send_count,
                    MpiMessageType::AllToAll,
                )?;
            }
        }

        // Collect the incoming ones.
        for other in 0..self.size() {
            if other == rank {
                continue;
            }

            let slot = &mut recv_buffer[other as usize * send_offset..][..send_offset];
            self.recv(
                other,
                rank,
                Some(slot),
                recv_type,
                recv_count,
                MpiMessageType::AllToAll,
            )?;
        }

        Ok(())
    }

    /// Block until every rank has entered the barrier.
    pub fn barrier(&self, this_rank: i32) -> Result<()> {
        if this_rank == 0 {
            // The root collects a join from everyone, then releases them.
            for rank in 1..self.size() {
                let status = self.recv(
                    rank,
                    0,
                    None,
                    DataType::Int,
                    0,
                    MpiMessageType::BarrierJoin,
                )?;
                trace!("mpi - recv barrier join {}", status.source);
            }

            self.broadcast(0, None, DataType::Int, 0, MpiMessageType::BarrierDone)?;
        } else {
            trace!("mpi - barrier join {}", this_rank);
            self.send(
                this_rank,
                0,
                None,
                DataType::Int,
                0,
                MpiMessageType::BarrierJoin,
            )?;

            self.recv(
                0,
                this_rank,
                None,
                DataType::Int,
                0,
                MpiMessageType::BarrierDone,
            )?;
            trace!("mpi - barrier done {}", this_rank);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use crate::world::World;
    use crate::{DataType, ReduceOp};
    use std::sync::Arc;
    use std::thread;

    fn co_resident_world(system: &TestSystem, size: i32) -> Arc<World> {
        let world = World::create(system.env("thishost"), &call_message(), 10, size).unwrap();
        for rank in 1..size {
            world.register_rank(rank).unwrap();
        }
        world
    }

    /// Run `per_rank` once per rank on its own thread and collect results.
    fn run_ranks<F, T>(world: &Arc<World>, per_rank: F) -> Vec<T>
    where
        F: Fn(Arc<World>, i32) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let per_rank = Arc::new(per_rank);
        let workers: Vec<_> = (0..world.size())
            .map(|rank| {
                let world = Arc::clone(world);
                let per_rank = Arc::clone(&per_rank);
                thread::spawn(move || per_rank(world, rank))
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    }

    #[test]
    fn test_broadcast() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            if rank == 0 {
                let data = int_bytes(&[7, 8, 9]);
                world
                    .broadcast(
                        0,
                        Some(&data),
                        DataType::Int,
                        3,
                        crate::MpiMessageType::Bcast,
                    )
                    .unwrap();
                vec![7, 8, 9]
            } else {
                let mut target = vec![0u8; 12];
                world
                    .recv(
                        0,
                        rank,
                        Some(&mut target),
                        DataType::Int,
                        3,
                        crate::MpiMessageType::Bcast,
                    )
                    .unwrap();
                ints_from(&target)
            }
        });

        for received in results {
            assert_eq!(received, vec![7, 8, 9]);
        }
    }

    #[test]
    fn test_scatter() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            let mut target = vec![0u8; 8];
            if rank == 2 {
                let all: Vec<i32> = (0..8).collect();
                world
                    .scatter(
                        2,
                        rank,
                        &int_bytes(&all),
                        DataType::Int,
                        2,
                        &mut target,
                        DataType::Int,
                        2,
                    )
                    .unwrap();
            } else {
                world
                    .scatter(2, rank, &[], DataType::Int, 2, &mut target, DataType::Int, 2)
                    .unwrap();
            }
            (rank, ints_from(&target))
        });

        for (rank, received) in results {
            assert_eq!(received, vec![rank * 2, rank * 2 + 1]);
        }
    }

    #[test]
    fn test_gather() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            let own = int_bytes(&[rank * 10, rank * 10 + 1]);
            if rank == 0 {
                let mut target = vec![0u8; 4 * own.len()];
                world
                    .gather(
                        0,
                        0,
                        Some(&own),
                        DataType::Int,
                        2,
                        &mut target,
                        DataType::Int,
                        2,
                    )
                    .unwrap();
                Some(ints_from(&target))
            } else {
                world
                    .gather(
                        rank,
                        0,
                        Some(&own),
                        DataType::Int,
                        2,
                        &mut [],
                        DataType::Int,
                        2,
                    )
                    .unwrap();
                None
            }
        });

        let gathered = results.into_iter().flatten().next().unwrap();
        assert_eq!(gathered, vec![0, 1, 10, 11, 20, 21, 30, 31]);
    }

    #[test]
    fn test_gather_in_place_preserves_root_slot() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 3);

        let results = run_ranks(&world, |world, rank| {
            if rank == 0 {
                // Root's own chunk is pre-positioned in the full buffer.
                let mut target = int_bytes(&[100, 0, 0]);
                world
                    .gather(0, 0, None, DataType::Int, 1, &mut target, DataType::Int, 1)
                    .unwrap();
                Some(ints_from(&target))
            } else {
                let own = int_bytes(&[rank]);
                world
                    .gather(
                        rank,
                        0,
                        Some(&own),
                        DataType::Int,
                        1,
                        &mut [],
                        DataType::Int,
                        1,
                    )
                    .unwrap();
                None
            }
        });

        let gathered = results.into_iter().flatten().next().unwrap();
        assert_eq!(gathered, vec![100, 1, 2]);
    }

    #[test]
    fn test_all_gather() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 3);

        let results = run_ranks(&world, |world, rank| {
            let own = int_bytes(&[rank + 1]);
            let mut target = vec![0u8; 12];
            world
                .all_gather(
                    rank,
                    Some(&own),
                    DataType::Int,
                    1,
                    &mut target,
                    DataType::Int,
                    1,
                )
                .unwrap();
            ints_from(&target)
        });

        for received in results {
            assert_eq!(received, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_reduce_sum_to_root() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 5);

        let results = run_ranks(&world, |world, rank| {
            let own = int_bytes(&[rank, 10 * rank, 100 * rank]);
            if rank == 3 {
                let mut target = vec![0u8; own.len()];
                world
                    .reduce(
                        3,
                        3,
                        Some(&own),
                        &mut target,
                        DataType::Int,
                        3,
                        ReduceOp::Sum,
                    )
                    .unwrap();
                Some(ints_from(&target))
            } else {
                world
                    .reduce(
                        rank,
                        3,
                        Some(&own),
                        &mut [],
                        DataType::Int,
                        3,
                        ReduceOp::Sum,
                    )
                    .unwrap();
                None
            }
        });

        let reduced = results.into_iter().flatten().next().unwrap();
        assert_eq!(reduced, vec![10, 100, 1000]);
    }

    #[test]
    fn test_reduce_in_place_at_root() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 3);

        let results = run_ranks(&world, |world, rank| {
            if rank == 0 {
                // In place: the root's contribution starts in recv_buffer.
                let mut target = int_bytes(&[5]);
                world
                    .reduce(0, 0, None, &mut target, DataType::Int, 1, ReduceOp::Max)
                    .unwrap();
                Some(ints_from(&target))
            } else {
                let own = int_bytes(&[rank * 4]);
                world
                    .reduce(
                        rank,
                        0,
                        Some(&own),
                        &mut [],
                        DataType::Int,
                        1,
                        ReduceOp::Max,
                    )
                    .unwrap();
                None
            }
        });

        let reduced = results.into_iter().flatten().next().unwrap();
        assert_eq!(reduced, vec![8]);
    }

    #[test]
    fn test_reduce_double_min() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 3);

        let results = run_ranks(&world, |world, rank| {
            let own = double_bytes(&[rank as f64 - 0.5]);
            if rank == 0 {
                let mut target = vec![0u8; own.len()];
                world
                    .reduce(
                        0,
                        0,
                        Some(&own),
                        &mut target,
                        DataType::Double,
                        1,
                        ReduceOp::Min,
                    )
                    .unwrap();
                Some(doubles_from(&target))
            } else {
                world
                    .reduce(
                        rank,
                        0,
                        Some(&own),
                        &mut [],
                        DataType::Double,
                        1,
                        ReduceOp::Min,
                    )
                    .unwrap();
                None
            }
        });

        let reduced = results.into_iter().flatten().next().unwrap();
        assert_eq!(reduced, vec![-0.5]);
    }

    #[test]
    fn test_all_reduce() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            let own = int_bytes(&[rank, rank * 2]);
            let mut target = vec![0u8; own.len()];
            world
                .all_reduce(
                    rank,
                    Some(&own),
                    &mut target,
                    DataType::Int,
                    2,
                    ReduceOp::Sum,
                )
                .unwrap();
            ints_from(&target)
        });

        for received in results {
            assert_eq!(received, vec![6, 12]);
        }
    }

    #[test]
    fn test_scan_inclusive_prefix() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            let own = int_bytes(&[rank + 1, 10 * (rank + 1)]);
            let mut target = vec![0u8; own.len()];
            world
                .scan(
                    rank,
                    Some(&own),
                    &mut target,
                    DataType::Int,
                    2,
                    ReduceOp::Sum,
                )
                .unwrap();
            (rank, ints_from(&target))
        });

        for (rank, received) in results {
            let expected_first: i32 = (1..=rank + 1).sum();
            assert_eq!(received, vec![expected_first, 10 * expected_first]);
        }
    }

    #[test]
    fn test_all_to_all() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| {
            // Row r: [r*10, r*10+1, ..., r*10+7], chunks of two per rank.
            let row: Vec<i32> = (0..8).map(|i| rank * 10 + i).collect();
            let mut target = vec![0u8; 32];
            world
                .all_to_all(
                    rank,
                    &int_bytes(&row),
                    DataType::Int,
                    2,
                    &mut target,
                    DataType::Int,
                    2,
                )
                .unwrap();
            (rank, ints_from(&target))
        });

        for (rank, received) in results {
            let expected: Vec<i32> = (0..4)
                .flat_map(|row| vec![row * 10 + 2 * rank, row * 10 + 2 * rank + 1])
                .collect();
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn test_barrier_releases_every_rank() {
        let system = TestSystem::new();
        let world = co_resident_world(&system, 4);

        let results = run_ranks(&world, |world, rank| world.barrier(rank).is_ok());
        assert!(results.into_iter().all(|ok| ok));
    }
}
