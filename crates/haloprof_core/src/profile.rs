//! Radial binning engine: bounds, bin allocation, one accumulation pass
//! per point, and a single finalization pass.

pub mod elements;
pub mod merge;
pub mod table;

pub use elements::{standard_elements, DirectFn, PostprocessFn, ProfileElement};
pub use merge::merge_tables;
pub use table::{
    BinTable, Column, ColumnRole, Statistic, UpdateMode, BIN_RADIUS, BIN_RADIUS_MIN, NUMBER_IN_BIN,
};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cloud::{scalar_attribute, vector_attribute, Value, MASS_ATTRIBUTE, VELOCITY_ATTRIBUTE};
use crate::error::ProfileError;
use crate::geometry;
use crate::traits::{PointCloud, SpatialQuery};
use crate::virial;

/// User-facing knobs for one profiling run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Number of uniform-width radial bins.
    pub bin_number: usize,
    /// Target overdensity for the virial-radius cutoff.
    pub delta: f64,
    /// Bound the profile at the solved virial radius instead of the
    /// bounding-box radius.
    pub cutoff_at_virial_radius: bool,
    /// When set (and nonzero), bin by distance to the line through the
    /// center along this axis instead of by spherical radius.
    pub profile_axis: Option<Vector3<f64>>,
    /// Exclusion distance: out-of-plane distance in axial mode, plain
    /// radius in spherical mode.
    pub profile_height: Option<f64>,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            bin_number: 30,
            delta: 1.0,
            cutoff_at_virial_radius: false,
            profile_axis: None,
            profile_height: None,
        }
    }
}

/// Fixed frame for one profiling run: the center and the outermost radius,
/// from which the uniform bin spacing follows.
///
/// Bounds must be built with the same bin count the rest of the run uses;
/// [`compute_bounds`] and the distributed driver take care of that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileBounds {
    pub center: Vector3<f64>,
    pub max_radius: f64,
    pub bin_spacing: f64,
}

impl ProfileBounds {
    pub fn new(
        center: Vector3<f64>,
        max_radius: f64,
        bin_number: usize,
    ) -> Result<Self, ProfileError> {
        if bin_number == 0 {
            return Err(ProfileError::Configuration(
                "bin number must be at least 1".to_string(),
            ));
        }
        if !(max_radius > 0.0) {
            return Err(ProfileError::Configuration(format!(
                "maximum radius must be positive, got {max_radius}"
            )));
        }
        Ok(Self {
            center,
            max_radius,
            bin_spacing: max_radius / bin_number as f64,
        })
    }
}

/// Fixes the center and maximum radius for a run over `cloud`.
///
/// The outer radius is the farthest bounding-box corner, or the solved
/// virial radius when `cutoff_at_virial_radius` is set and a crossing
/// exists; without a crossing the bounding-box radius stays in force.
pub fn compute_bounds<C, Q>(
    cloud: &C,
    index: &Q,
    center: Vector3<f64>,
    settings: &ProfileSettings,
) -> Result<ProfileBounds, ProfileError>
where
    C: PointCloud,
    Q: SpatialQuery,
{
    let (min, max) = cloud.bounding_box();
    let mut max_radius = geometry::max_corner_distance(&min, &max, &center);
    if settings.cutoff_at_virial_radius {
        let info = virial::compute_virial_radius(cloud, index, &center, settings.delta)?;
        if info.found() {
            max_radius = info.radius;
        } else {
            warn!("no virial radius found; profiling out to the bounding box");
        }
    }
    ProfileBounds::new(center, max_radius, settings.bin_number)
}

/// Bin index for a point, or `None` when the point is excluded.
///
/// Spherical mode bins by distance to the center; a nonzero profile axis
/// switches to distance from the line through the center along that axis.
/// The height cutoff drops points whose out-of-plane distance (axial) or
/// radius (spherical) exceeds it, and indices at or beyond the bin count
/// are out of range. Boundary radii land in the outer bin, plain floor
/// semantics.
fn bin_index(
    position: &Vector3<f64>,
    bounds: &ProfileBounds,
    settings: &ProfileSettings,
) -> Option<usize> {
    let offset = position - bounds.center;
    let axis = settings
        .profile_axis
        .filter(|axis| axis.norm_squared() > 0.0);
    let distance = match axis {
        Some(axis) => geometry::distance_to_line(position, &bounds.center, &axis),
        None => offset.norm(),
    };
    if let Some(height) = settings.profile_height {
        let out_of_band = match axis {
            Some(axis) => geometry::distance_to_plane(position, &bounds.center, &axis) > height,
            None => offset.norm() > height,
        };
        if out_of_band {
            return None;
        }
    }
    let index = (distance / bounds.bin_spacing).floor();
    if !index.is_finite() || index < 0.0 || index >= settings.bin_number as f64 {
        return None;
    }
    Some(index as usize)
}

/// Allocates the zero-filled bin table for this run's full column set.
///
/// Validates the required attributes and every postprocessed element's
/// input columns; the schema this produces is what workers must share for
/// partial tables to merge.
pub fn initialize_bins<C>(
    cloud: &C,
    elements: &[ProfileElement],
    bounds: &ProfileBounds,
    settings: &ProfileSettings,
) -> Result<BinTable, ProfileError>
where
    C: PointCloud,
{
    if settings.bin_number == 0 {
        return Err(ProfileError::Configuration(
            "bin number must be at least 1".to_string(),
        ));
    }
    scalar_attribute(cloud, MASS_ATTRIBUTE)?;
    vector_attribute(cloud, VELOCITY_ATTRIBUTE)?;
    for name in cloud.attribute_names() {
        let length = cloud.attribute(name).map_or(0, |array| array.len());
        if length != cloud.len() {
            return Err(ProfileError::Configuration(format!(
                "attribute '{}' has {} entries for {} points",
                name,
                length,
                cloud.len()
            )));
        }
    }

    let mut bin_table = BinTable::new(settings.bin_number, bounds.bin_spacing);
    bin_table.add_column(BIN_RADIUS, Statistic::Total, ColumnRole::Edges, 1)?;
    bin_table.add_column(BIN_RADIUS_MIN, Statistic::Total, ColumnRole::Edges, 1)?;
    for bin in 0..settings.bin_number {
        bin_table.update(
            bin,
            UpdateMode::Set,
            BIN_RADIUS,
            Statistic::Total,
            &Value::Scalar((bin + 1) as f64 * bounds.bin_spacing),
        )?;
        bin_table.update(
            bin,
            UpdateMode::Set,
            BIN_RADIUS_MIN,
            Statistic::Total,
            &Value::Scalar(bin as f64 * bounds.bin_spacing),
        )?;
    }

    bin_table.add_column(NUMBER_IN_BIN, Statistic::Total, ColumnRole::Accumulated, 1)?;
    bin_table.add_column(NUMBER_IN_BIN, Statistic::Cumulative, ColumnRole::Accumulated, 1)?;

    for name in cloud.attribute_names() {
        let components = cloud
            .attribute(name)
            .map_or(1, |array| array.components());
        for statistic in [Statistic::Total, Statistic::Average, Statistic::Cumulative] {
            bin_table.add_column(name, statistic, ColumnRole::Accumulated, components)?;
        }
    }

    for element in elements {
        match element {
            ProfileElement::Direct {
                base,
                components,
                statistic,
                ..
            } => {
                bin_table.add_column(base, *statistic, ColumnRole::Accumulated, *components)?;
            }
            ProfileElement::Postprocessed {
                base,
                components,
                arg_one,
                arg_two,
                ..
            } => {
                for (arg_base, arg_statistic) in [arg_one, arg_two] {
                    if !bin_table.has_column(arg_base, *arg_statistic) {
                        return Err(ProfileError::Configuration(format!(
                            "postprocessed element '{}' reads missing column '{}_{}'",
                            base,
                            arg_base,
                            arg_statistic.suffix()
                        )));
                    }
                }
                bin_table.add_column(base, Statistic::Total, ColumnRole::Postprocessed, *components)?;
            }
        }
    }
    Ok(bin_table)
}

/// One accumulation pass over `cloud` into `bin_table`.
///
/// Commutative and associative per point, so shards may run this
/// independently against copies of the same schema and merge afterwards.
pub fn accumulate<C>(
    bin_table: &mut BinTable,
    cloud: &C,
    elements: &[ProfileElement],
    bounds: &ProfileBounds,
    settings: &ProfileSettings,
) -> Result<(), ProfileError>
where
    C: PointCloud,
{
    if bin_table.is_finalized() {
        return Err(ProfileError::Configuration(
            "cannot accumulate into a finalized table".to_string(),
        ));
    }
    let velocities = vector_attribute(cloud, VELOCITY_ATTRIBUTE)?;
    let attributes: Vec<_> = cloud
        .attribute_names()
        .into_iter()
        .filter_map(|name| cloud.attribute(name).map(|array| (name, array)))
        .collect();

    let mut binned = 0usize;
    for id in 0..cloud.len() {
        let position = cloud.position(id);
        let Some(bin) = bin_index(&position, bounds, settings) else {
            continue;
        };
        binned += 1;
        let offset = position - bounds.center;
        let velocity = velocities[id];

        let one = Value::Scalar(1.0);
        bin_table.update(bin, UpdateMode::Add, NUMBER_IN_BIN, Statistic::Total, &one)?;
        bin_table.update_cumulative(bin, UpdateMode::Add, NUMBER_IN_BIN, Statistic::Cumulative, &one)?;

        for (name, array) in &attributes {
            let value = array.value(id);
            bin_table.update(bin, UpdateMode::Add, name, Statistic::Total, &value)?;
            // Averages accumulate raw sums here; finalization divides.
            bin_table.update(bin, UpdateMode::Add, name, Statistic::Average, &value)?;
            bin_table.update_cumulative(bin, UpdateMode::Add, name, Statistic::Cumulative, &value)?;
        }

        for element in elements {
            if let ProfileElement::Direct {
                base,
                statistic,
                func,
                ..
            } = element
            {
                let value = func(&velocity, &offset);
                if *statistic == Statistic::Cumulative {
                    bin_table.update_cumulative(bin, UpdateMode::Add, base, *statistic, &value)?;
                } else {
                    bin_table.update(bin, UpdateMode::Add, base, *statistic, &value)?;
                }
            }
        }
    }
    debug!(
        points = cloud.len(),
        binned,
        dropped = cloud.len() - binned,
        "accumulated point shard"
    );
    Ok(())
}

/// Turns accumulated sums into the finished table, exactly once.
///
/// Every average column of a non-empty bin is scaled by `1/count`
/// (zero-count bins stay zero), then postprocessed elements are evaluated
/// in declaration order against the finished columns.
pub fn finalize(bin_table: &mut BinTable, elements: &[ProfileElement]) -> Result<(), ProfileError> {
    if bin_table.is_finalized() {
        return Err(ProfileError::Configuration(
            "bin table is already finalized".to_string(),
        ));
    }

    let average_bases: Vec<String> = bin_table
        .columns()
        .iter()
        .filter(|column| column.statistic() == Statistic::Average)
        .map(|column| column.base().to_string())
        .collect();

    for bin in 0..bin_table.bin_count() {
        let count = match bin_table.value(bin, NUMBER_IN_BIN, Statistic::Total)? {
            Value::Scalar(count) => count,
            Value::Vector(_) => {
                return Err(ProfileError::Configuration(
                    "count column must be scalar".to_string(),
                ))
            }
        };
        if count > 0.0 {
            let scale = Value::Scalar(1.0 / count);
            for base in &average_bases {
                bin_table.update(bin, UpdateMode::Multiply, base, Statistic::Average, &scale)?;
            }
        }
    }

    for element in elements {
        if let ProfileElement::Postprocessed {
            base,
            func,
            arg_one,
            arg_two,
            ..
        } = element
        {
            for bin in 0..bin_table.bin_count() {
                let first = bin_table.value(bin, &arg_one.0, arg_one.1)?;
                let second = bin_table.value(bin, &arg_two.0, arg_two.1)?;
                let value = func(&first, &second);
                bin_table.update(bin, UpdateMode::Set, base, Statistic::Total, &value)?;
            }
        }
    }

    bin_table.mark_finalized();
    Ok(())
}

/// The single-process pipeline: bounds, allocation, one accumulation pass,
/// finalization.
pub fn run_local<C, Q>(
    cloud: &C,
    index: &Q,
    center: Vector3<f64>,
    elements: &[ProfileElement],
    settings: &ProfileSettings,
) -> Result<BinTable, ProfileError>
where
    C: PointCloud,
    Q: SpatialQuery,
{
    let bounds = compute_bounds(cloud, index, center, settings)?;
    let mut bin_table = initialize_bins(cloud, elements, &bounds, settings)?;
    accumulate(&mut bin_table, cloud, elements, &bounds, settings)?;
    finalize(&mut bin_table, elements)?;
    Ok(bin_table)
}
