//! Virial-radius location: the radius where mean enclosed density crosses
//! a target overdensity.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use crate::cloud::{scalar_attribute, MASS_ATTRIBUTE};
use crate::error::ProfileError;
use crate::geometry;
use crate::rootfind;
use crate::traits::{PointCloud, SpatialQuery};

/// Radius reported when the overdensity objective never crosses zero
/// inside the bracket.
pub const NO_VIRIAL_RADIUS: f64 = -1.0;

/// Lower bracket endpoint: almost zero, never exactly zero, which would
/// hit the volume singularity of the objective.
const NEARLY_ZERO_RADIUS: f64 = 1e-11;

/// Result of a virial-radius solve. `radius` is [`NO_VIRIAL_RADIUS`] when
/// no crossing exists; callers treat that as "no halo here", not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirialRadiusInfo {
    pub center: Vector3<f64>,
    pub target_density: f64,
    pub radius: f64,
    pub iterations: usize,
}

impl VirialRadiusInfo {
    pub fn found(&self) -> bool {
        self.radius > 0.0
    }
}

/// Mean density of the mass enclosed within radius `r` of `center`, minus
/// `target_density`.
///
/// Monotonically decreasing in `r` for centrally concentrated mass
/// distributions, which is what makes `[~0, max_r]` a valid bracket. A
/// pathological distribution (say a dense distant shell) can cross zero
/// more than once; the solve trusts the bracket and returns one crossing.
pub fn overdensity_in_sphere<C, Q>(
    cloud: &C,
    index: &Q,
    center: &Vector3<f64>,
    r: f64,
    target_density: f64,
) -> Result<f64, ProfileError>
where
    C: PointCloud,
    Q: SpatialQuery,
{
    let masses = scalar_attribute(cloud, MASS_ATTRIBUTE)?;
    Ok(enclosed_overdensity(masses, index, center, r, target_density))
}

fn enclosed_overdensity<Q: SpatialQuery>(
    masses: &[f64],
    index: &Q,
    center: &Vector3<f64>,
    r: f64,
    target_density: f64,
) -> f64 {
    let total_mass: f64 = index
        .points_within_radius(center, r)
        .into_iter()
        .map(|id| masses[id])
        .sum();
    total_mass / (4.0 / 3.0 * PI * r.powi(3)) - target_density
}

/// Solves for the virial radius of the cloud around `center`.
///
/// The bracket runs from the farthest bounding-box corner down to an
/// almost-zero inner radius; an invalid bracket (the enclosed density
/// never reaches `target_density`) is reported through the sentinel, not
/// as an error.
pub fn compute_virial_radius<C, Q>(
    cloud: &C,
    index: &Q,
    center: &Vector3<f64>,
    target_density: f64,
) -> Result<VirialRadiusInfo, ProfileError>
where
    C: PointCloud,
    Q: SpatialQuery,
{
    let masses = scalar_attribute(cloud, MASS_ATTRIBUTE)?;
    let (min, max) = cloud.bounding_box();
    let max_r = geometry::max_corner_distance(&min, &max, center);

    let objective = |r: f64| enclosed_overdensity(masses, index, center, r, target_density);
    match rootfind::illinois(objective, max_r, NEARLY_ZERO_RADIUS, 0.0, 0.0) {
        Ok(estimate) => {
            debug!(
                radius = estimate.root,
                iterations = estimate.iterations,
                "virial radius solved"
            );
            Ok(VirialRadiusInfo {
                center: *center,
                target_density,
                radius: estimate.root,
                iterations: estimate.iterations,
            })
        }
        Err(ProfileError::InvalidBracket) => {
            debug!("overdensity objective does not change sign; no virial radius");
            Ok(VirialRadiusInfo {
                center: *center,
                target_density,
                radius: NO_VIRIAL_RADIUS,
                iterations: 0,
            })
        }
        Err(error) => Err(error),
    }
}
