//! Coordinator/worker protocol for sharded accumulation.
//!
//! One designated coordinator broadcasts the bounds and the zero-filled
//! bin layout, every member accumulates its own shard, and the coordinator
//! merges the partials and finalizes alone. The transport is a seam:
//! in-process channels here, MPI-style transports elsewhere.

use anyhow::{anyhow, bail, Context, Result};
use nalgebra::Vector3;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

use crate::geometry;
use crate::profile::{self, merge_tables, BinTable, ProfileBounds, ProfileElement, ProfileSettings};
use crate::traits::PointCloud;

/// Rank of the worker that owns broadcast, merge, and finalization.
pub const COORDINATOR: usize = 0;

/// Transport between the members of a cooperating worker group.
///
/// Ranks are dense in `0..size()`. Broadcasts originate at `root`, which
/// supplies the payload; every other member passes `None` and receives the
/// root's value. `reduce_max` folds a per-member scalar to the group-wide
/// maximum, visible to every member.
///
/// No timeout or cancellation semantics are defined: a stalled member
/// stalls the collective operation it participates in.
pub trait WorkerGroup {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn broadcast_bounds(
        &self,
        bounds: Option<ProfileBounds>,
        root: usize,
    ) -> Result<ProfileBounds>;

    fn broadcast_table(&self, table: Option<BinTable>, root: usize) -> Result<BinTable>;

    fn send_table(&self, table: &BinTable, to: usize) -> Result<()>;

    fn receive_table(&self, from: usize) -> Result<BinTable>;

    fn reduce_max(&self, local: f64) -> Result<f64>;
}

/// Group-wide outer radius: every member measures its own shard against
/// the shared center, then the group reduces to the maximum.
pub fn sharded_max_radius<C, G>(group: &G, shard: &C, center: &Vector3<f64>) -> Result<f64>
where
    C: PointCloud,
    G: WorkerGroup,
{
    let local = if shard.is_empty() {
        0.0
    } else {
        let (min, max) = shard.bounding_box();
        geometry::max_corner_distance(&min, &max, center)
    };
    group.reduce_max(local)
}

/// Runs the sharded profiling protocol for this member.
///
/// The coordinator passes `Some(bounds)`, broadcasts the bounds and the
/// initialized table, accumulates its shard, merges every received
/// partial (order does not matter), finalizes once, and returns the
/// finished table. Other members pass `None`, accumulate their shard into
/// the broadcast layout, send the partial back, and return `None`.
///
/// Every member must be launched with the same settings and element
/// catalogue; only the bounds and the bin layout travel over the wire.
///
/// A single-member group degenerates to the local pipeline with no
/// transport calls at all.
pub fn run_sharded<C, G>(
    group: &G,
    shard: &C,
    elements: &[ProfileElement],
    settings: &ProfileSettings,
    bounds: Option<ProfileBounds>,
) -> Result<Option<BinTable>>
where
    C: PointCloud,
    G: WorkerGroup,
{
    let rank = group.rank();
    let size = group.size();

    if size <= 1 {
        let bounds = bounds.context("the coordinator must supply precomputed bounds")?;
        let mut bin_table = profile::initialize_bins(shard, elements, &bounds, settings)?;
        profile::accumulate(&mut bin_table, shard, elements, &bounds, settings)?;
        profile::finalize(&mut bin_table, elements)?;
        return Ok(Some(bin_table));
    }

    if rank == COORDINATOR {
        let bounds = bounds.context("the coordinator must supply precomputed bounds")?;
        let bounds = group.broadcast_bounds(Some(bounds), COORDINATOR)?;
        let bin_table = profile::initialize_bins(shard, elements, &bounds, settings)?;
        let mut bin_table = group.broadcast_table(Some(bin_table), COORDINATOR)?;
        info!(size, "broadcast bounds and bin layout");

        profile::accumulate(&mut bin_table, shard, elements, &bounds, settings)?;
        for from in 1..size {
            let partial = group
                .receive_table(from)
                .with_context(|| format!("receiving the partial table from worker {from}"))?;
            merge_tables(&mut bin_table, &partial)?;
            debug!(from, "merged partial table");
        }
        profile::finalize(&mut bin_table, elements)?;
        Ok(Some(bin_table))
    } else {
        let bounds = group.broadcast_bounds(None, COORDINATOR)?;
        let mut bin_table = group.broadcast_table(None, COORDINATOR)?;
        profile::accumulate(&mut bin_table, shard, elements, &bounds, settings)?;
        group
            .send_table(&bin_table, COORDINATOR)
            .context("sending the partial table to the coordinator")?;
        debug!(rank, "sent partial table");
        Ok(None)
    }
}

#[derive(Debug)]
enum Message {
    Bounds(ProfileBounds),
    Table(Box<BinTable>),
    Max(f64),
}

/// Channel-backed [`WorkerGroup`] for threads inside one process.
///
/// Each ordered pair of members gets its own channel, so a receive from a
/// specific rank never observes traffic from another one.
pub struct InProcessGroup {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Receiver<Message>>,
}

impl InProcessGroup {
    /// Builds the fully connected group handles for `size` members, in
    /// rank order. Each handle is moved onto the thread that plays that
    /// rank.
    pub fn connected(size: usize) -> Vec<InProcessGroup> {
        let mut outboxes: Vec<Vec<Sender<Message>>> = Vec::with_capacity(size);
        let mut inboxes: Vec<Vec<Option<Receiver<Message>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for from in 0..size {
            let mut row = Vec::with_capacity(size);
            for to in 0..size {
                let (sender, receiver) = mpsc::channel();
                row.push(sender);
                inboxes[to][from] = Some(receiver);
            }
            outboxes.push(row);
        }
        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (senders, receivers))| InProcessGroup {
                rank,
                size,
                senders,
                receivers: receivers
                    .into_iter()
                    .map(|receiver| receiver.expect("group is fully connected"))
                    .collect(),
            })
            .collect()
    }

    fn send(&self, to: usize, message: Message) -> Result<()> {
        let sender = self
            .senders
            .get(to)
            .ok_or_else(|| anyhow!("no group member with rank {to}"))?;
        sender
            .send(message)
            .map_err(|_| anyhow!("group member {to} disconnected"))
    }

    fn receive(&self, from: usize) -> Result<Message> {
        let receiver = self
            .receivers
            .get(from)
            .ok_or_else(|| anyhow!("no group member with rank {from}"))?;
        receiver
            .recv()
            .with_context(|| format!("group member {from} disconnected"))
    }
}

impl WorkerGroup for InProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bounds(
        &self,
        bounds: Option<ProfileBounds>,
        root: usize,
    ) -> Result<ProfileBounds> {
        if self.rank == root {
            let bounds = bounds.context("broadcast root must supply the bounds")?;
            for to in 0..self.size {
                if to != root {
                    self.send(to, Message::Bounds(bounds))?;
                }
            }
            Ok(bounds)
        } else {
            match self.receive(root)? {
                Message::Bounds(bounds) => Ok(bounds),
                other => bail!("protocol error: expected bounds, received {other:?}"),
            }
        }
    }

    fn broadcast_table(&self, table: Option<BinTable>, root: usize) -> Result<BinTable> {
        if self.rank == root {
            let table = table.context("broadcast root must supply the table")?;
            for to in 0..self.size {
                if to != root {
                    self.send(to, Message::Table(Box::new(table.clone())))?;
                }
            }
            Ok(table)
        } else {
            match self.receive(root)? {
                Message::Table(table) => Ok(*table),
                other => bail!("protocol error: expected a table, received {other:?}"),
            }
        }
    }

    fn send_table(&self, table: &BinTable, to: usize) -> Result<()> {
        self.send(to, Message::Table(Box::new(table.clone())))
    }

    fn receive_table(&self, from: usize) -> Result<BinTable> {
        match self.receive(from)? {
            Message::Table(table) => Ok(*table),
            other => bail!("protocol error: expected a table, received {other:?}"),
        }
    }

    fn reduce_max(&self, local: f64) -> Result<f64> {
        if self.rank == COORDINATOR {
            let mut maximum = local;
            for from in 1..self.size {
                match self.receive(from)? {
                    Message::Max(value) => maximum = maximum.max(value),
                    other => bail!("protocol error: expected a maximum, received {other:?}"),
                }
            }
            for to in 1..self.size {
                self.send(to, Message::Max(maximum))?;
            }
            Ok(maximum)
        } else {
            self.send(COORDINATOR, Message::Max(local))?;
            match self.receive(COORDINATOR)? {
                Message::Max(value) => Ok(value),
                other => bail!("protocol error: expected a maximum, received {other:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_sharded, sharded_max_radius, InProcessGroup, WorkerGroup};
    use crate::cloud::ParticleSet;
    use crate::profile::{
        accumulate, finalize, initialize_bins, standard_elements, BinTable, ProfileBounds,
        ProfileSettings,
    };
    use nalgebra::Vector3;
    use std::thread;

    fn test_cloud() -> ParticleSet {
        let mut cloud = ParticleSet::new();
        for (radius, mass) in [(0.5, 1.0), (1.5, 2.0), (2.5, 3.0)] {
            cloud.push(
                Vector3::new(radius, 0.0, 0.0),
                mass,
                Vector3::new(0.0, radius, 0.0),
            );
        }
        cloud
    }

    fn test_settings() -> ProfileSettings {
        ProfileSettings {
            bin_number: 3,
            ..ProfileSettings::default()
        }
    }

    fn test_bounds() -> ProfileBounds {
        ProfileBounds::new(Vector3::zeros(), 3.0, 3).expect("valid bounds")
    }

    fn local_reference(cloud: &ParticleSet) -> BinTable {
        let settings = test_settings();
        let elements = standard_elements("mass");
        let bounds = test_bounds();
        let mut table = initialize_bins(cloud, &elements, &bounds, &settings).expect("schema");
        accumulate(&mut table, cloud, &elements, &bounds, &settings).expect("accumulate");
        finalize(&mut table, &elements).expect("finalize");
        table
    }

    #[test]
    fn group_broadcasts_and_reduces_across_threads() {
        let groups = InProcessGroup::connected(3);
        let bounds = test_bounds();
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let rank = group.rank();
                    let seen = group
                        .broadcast_bounds((rank == 0).then_some(bounds), 0)
                        .expect("broadcast");
                    let maximum = group.reduce_max(rank as f64).expect("reduce");
                    (seen, maximum)
                })
            })
            .collect();
        for handle in handles {
            let (seen, maximum) = handle.join().expect("thread");
            assert_eq!(seen, test_bounds());
            assert_eq!(maximum, 2.0);
        }
    }

    #[test]
    fn sharded_max_radius_spans_all_shards() {
        let cloud = test_cloud();
        let groups = InProcessGroup::connected(2);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let shard = cloud.shard(group.rank(), 2);
                thread::spawn(move || {
                    sharded_max_radius(&group, &shard, &Vector3::zeros()).expect("reduce")
                })
            })
            .collect();
        for handle in handles {
            // The outermost point sits at 2.5 regardless of the shard.
            assert_eq!(handle.join().expect("thread"), 2.5);
        }
    }

    #[test]
    fn sharded_run_matches_the_local_run() {
        let cloud = test_cloud();
        let expected = local_reference(&cloud);
        let groups = InProcessGroup::connected(2);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let rank = group.rank();
                let shard = cloud.shard(rank, 2);
                let elements = standard_elements("mass");
                let settings = test_settings();
                let bounds = (rank == 0).then_some(test_bounds());
                thread::spawn(move || {
                    run_sharded(&group, &shard, &elements, &settings, bounds).expect("run")
                })
            })
            .collect();
        let mut results: Vec<Option<BinTable>> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();
        assert!(results[1].is_none());
        let merged = results[0].take().expect("coordinator result");
        assert_eq!(merged, expected);
    }

    #[test]
    fn single_member_group_skips_transport() {
        let cloud = test_cloud();
        let expected = local_reference(&cloud);
        let mut groups = InProcessGroup::connected(1);
        let group = groups.remove(0);
        let result = run_sharded(
            &group,
            &cloud,
            &standard_elements("mass"),
            &test_settings(),
            Some(test_bounds()),
        )
        .expect("run");
        assert_eq!(result.expect("coordinator result"), expected);
    }

    #[test]
    fn disconnected_worker_surfaces_as_an_error() {
        let cloud = test_cloud();
        let mut groups = InProcessGroup::connected(2);
        // Drop the worker's handle before the coordinator starts.
        drop(groups.remove(1));
        let group = groups.remove(0);
        let result = run_sharded(
            &group,
            &cloud,
            &standard_elements("mass"),
            &test_settings(),
            Some(test_bounds()),
        );
        assert!(result.is_err());
    }
}
