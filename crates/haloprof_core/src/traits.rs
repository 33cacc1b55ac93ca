use nalgebra::Vector3;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::cloud::AttributeArray;

/// A trait for types that can be used as scalars in the numeric kernels.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Read-only access to an ordered cloud of particles and their named
/// per-point attributes.
///
/// Every attribute array must hold exactly `len()` entries; the profiling
/// engine validates this once before accumulation begins.
pub trait PointCloud {
    /// Number of particles in the cloud.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the particle with the given id.
    fn position(&self, id: usize) -> Vector3<f64>;

    /// The named attribute array, if present.
    fn attribute(&self, name: &str) -> Option<&AttributeArray>;

    /// All attribute names, in a deterministic order.
    fn attribute_names(&self) -> Vec<&str>;

    /// Axis-aligned bounding box of all positions, as `(min, max)`.
    /// An empty cloud reports a degenerate box at the origin.
    fn bounding_box(&self) -> (Vector3<f64>, Vector3<f64>);
}

/// Point-location capability over a cloud.
///
/// Spatial acceleration structures are supplied by collaborators; this
/// crate only ships the linear scan on [`crate::cloud::ParticleSet`].
pub trait SpatialQuery {
    /// Ids of all points within Euclidean distance `radius` of `center`
    /// (boundary inclusive).
    fn points_within_radius(&self, center: &Vector3<f64>, radius: f64) -> Vec<usize>;

    /// Ids of the `k` points nearest to `point`, closest first.
    fn k_nearest(&self, point: &Vector3<f64>, k: usize) -> Vec<usize>;
}
