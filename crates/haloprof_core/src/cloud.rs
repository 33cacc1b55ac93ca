//! In-memory particle clouds and the scalar-or-vector values they carry.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;
use crate::traits::{PointCloud, SpatialQuery};

/// Name of the per-point scalar mass attribute required for profiling.
pub const MASS_ATTRIBUTE: &str = "mass";
/// Name of the per-point 3-vector velocity attribute required for profiling.
pub const VELOCITY_ATTRIBUTE: &str = "velocity";

/// One numeric value: a scalar or a fixed 3-vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    Vector(Vector3<f64>),
}

impl Value {
    /// Number of components this value carries.
    pub fn components(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(_) => 3,
        }
    }

    /// Component `index`, with scalars broadcasting to every index.
    pub fn component(&self, index: usize) -> f64 {
        match self {
            Value::Scalar(value) => *value,
            Value::Vector(vector) => vector[index],
        }
    }
}

/// The per-point payload of one named attribute. Every point stores the
/// same width: one scalar or one 3-vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeArray {
    Scalar(Vec<f64>),
    Vector(Vec<Vector3<f64>>),
}

impl AttributeArray {
    pub fn len(&self) -> usize {
        match self {
            AttributeArray::Scalar(values) => values.len(),
            AttributeArray::Vector(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Component count of each entry: 1 for scalars, 3 for vectors.
    pub fn components(&self) -> usize {
        match self {
            AttributeArray::Scalar(_) => 1,
            AttributeArray::Vector(_) => 3,
        }
    }

    /// Value stored for the given point id.
    ///
    /// Ids must be in range; the engine validates array lengths against the
    /// cloud before iterating.
    pub fn value(&self, id: usize) -> Value {
        match self {
            AttributeArray::Scalar(values) => Value::Scalar(values[id]),
            AttributeArray::Vector(values) => Value::Vector(values[id]),
        }
    }
}

/// Borrow a named attribute as a scalar array, or explain why it cannot be
/// profiled as one.
pub fn scalar_attribute<'a, C: PointCloud + ?Sized>(
    cloud: &'a C,
    name: &str,
) -> Result<&'a [f64], ProfileError> {
    match cloud.attribute(name) {
        Some(AttributeArray::Scalar(values)) => Ok(values),
        Some(AttributeArray::Vector(_)) => Err(ProfileError::Configuration(format!(
            "attribute '{name}' must be a scalar array"
        ))),
        None => Err(ProfileError::Configuration(format!(
            "required attribute '{name}' is missing from the point cloud"
        ))),
    }
}

/// Borrow a named attribute as a 3-vector array.
pub fn vector_attribute<'a, C: PointCloud + ?Sized>(
    cloud: &'a C,
    name: &str,
) -> Result<&'a [Vector3<f64>], ProfileError> {
    match cloud.attribute(name) {
        Some(AttributeArray::Vector(values)) => Ok(values),
        Some(AttributeArray::Scalar(_)) => Err(ProfileError::Configuration(format!(
            "attribute '{name}' must be a 3-vector array"
        ))),
        None => Err(ProfileError::Configuration(format!(
            "required attribute '{name}' is missing from the point cloud"
        ))),
    }
}

/// A concrete in-memory point cloud: positions plus named attribute arrays.
///
/// `push` maintains the required `mass` and `velocity` attributes; any
/// additional attribute is inserted whole once all points are in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticleSet {
    positions: Vec<Vector3<f64>>,
    attributes: BTreeMap<String, AttributeArray>,
}

impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one particle with its required attributes.
    pub fn push(&mut self, position: Vector3<f64>, mass: f64, velocity: Vector3<f64>) {
        self.positions.push(position);
        match self
            .attributes
            .entry(MASS_ATTRIBUTE.to_string())
            .or_insert_with(|| AttributeArray::Scalar(Vec::new()))
        {
            AttributeArray::Scalar(values) => values.push(mass),
            AttributeArray::Vector(_) => unreachable!("mass attribute is created as a scalar"),
        }
        match self
            .attributes
            .entry(VELOCITY_ATTRIBUTE.to_string())
            .or_insert_with(|| AttributeArray::Vector(Vec::new()))
        {
            AttributeArray::Vector(values) => values.push(velocity),
            AttributeArray::Scalar(_) => unreachable!("velocity attribute is created as a vector"),
        }
    }

    /// Attach an additional attribute array covering every point.
    pub fn insert_attribute(
        &mut self,
        name: &str,
        array: AttributeArray,
    ) -> Result<(), ProfileError> {
        if array.len() != self.positions.len() {
            return Err(ProfileError::Configuration(format!(
                "attribute '{}' has {} entries for {} points",
                name,
                array.len(),
                self.positions.len()
            )));
        }
        let scalar = matches!(array, AttributeArray::Scalar(_));
        if (name == MASS_ATTRIBUTE && !scalar) || (name == VELOCITY_ATTRIBUTE && scalar) {
            return Err(ProfileError::Configuration(format!(
                "attribute '{name}' cannot change its component count"
            )));
        }
        self.attributes.insert(name.to_string(), array);
        Ok(())
    }

    /// The contiguous shard owned by `rank` under a static split into
    /// `size` parts. Concatenating the shards in rank order reproduces the
    /// original cloud.
    pub fn shard(&self, rank: usize, size: usize) -> ParticleSet {
        if size == 0 {
            return ParticleSet::new();
        }
        let n = self.positions.len();
        let start = rank.min(size) * n / size;
        let end = (rank + 1).min(size) * n / size;
        let mut shard = ParticleSet {
            positions: self.positions[start..end].to_vec(),
            attributes: BTreeMap::new(),
        };
        for (name, array) in &self.attributes {
            let sliced = match array {
                AttributeArray::Scalar(values) => AttributeArray::Scalar(values[start..end].to_vec()),
                AttributeArray::Vector(values) => AttributeArray::Vector(values[start..end].to_vec()),
            };
            shard.attributes.insert(name.clone(), sliced);
        }
        shard
    }
}

impl PointCloud for ParticleSet {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, id: usize) -> Vector3<f64> {
        self.positions[id]
    }

    fn attribute(&self, name: &str) -> Option<&AttributeArray> {
        self.attributes.get(name)
    }

    fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }

    fn bounding_box(&self) -> (Vector3<f64>, Vector3<f64>) {
        if self.positions.is_empty() {
            return (Vector3::zeros(), Vector3::zeros());
        }
        let mut min = self.positions[0];
        let mut max = self.positions[0];
        for position in &self.positions[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
            }
        }
        (min, max)
    }
}

impl SpatialQuery for ParticleSet {
    fn points_within_radius(&self, center: &Vector3<f64>, radius: f64) -> Vec<usize> {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, position)| (*position - center).norm() <= radius)
            .map(|(id, _)| id)
            .collect()
    }

    fn k_nearest(&self, point: &Vector3<f64>, k: usize) -> Vec<usize> {
        let mut by_distance: Vec<(f64, usize)> = self
            .positions
            .iter()
            .enumerate()
            .map(|(id, position)| ((position - point).norm(), id))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
        by_distance.truncate(k);
        by_distance.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeArray, ParticleSet, Value, MASS_ATTRIBUTE, VELOCITY_ATTRIBUTE};
    use crate::error::ProfileError;
    use crate::traits::{PointCloud, SpatialQuery};
    use nalgebra::Vector3;

    fn line_cloud(count: usize) -> ParticleSet {
        let mut cloud = ParticleSet::new();
        for i in 0..count {
            cloud.push(
                Vector3::new(i as f64, 0.0, 0.0),
                1.0 + i as f64,
                Vector3::new(0.0, 1.0, 0.0),
            );
        }
        cloud
    }

    #[test]
    fn push_maintains_required_attributes() {
        let cloud = line_cloud(3);
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.attribute_names(), vec![MASS_ATTRIBUTE, VELOCITY_ATTRIBUTE]);
        assert_eq!(
            cloud.attribute(MASS_ATTRIBUTE).expect("mass").value(2),
            Value::Scalar(3.0)
        );
    }

    #[test]
    fn insert_attribute_rejects_length_mismatch() {
        let mut cloud = line_cloud(3);
        let result = cloud.insert_attribute("temperature", AttributeArray::Scalar(vec![1.0]));
        assert!(matches!(result, Err(ProfileError::Configuration(_))));
    }

    #[test]
    fn bounding_box_spans_all_positions() {
        let cloud = line_cloud(4);
        let (min, max) = cloud.bounding_box();
        assert_eq!(min, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Vector3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn points_within_radius_includes_boundary() {
        let cloud = line_cloud(4);
        let ids = cloud.points_within_radius(&Vector3::zeros(), 2.0);
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn k_nearest_orders_by_distance() {
        let cloud = line_cloud(4);
        let ids = cloud.k_nearest(&Vector3::new(2.2, 0.0, 0.0), 2);
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn shards_partition_the_cloud() {
        let cloud = line_cloud(5);
        let total: usize = (0..3).map(|rank| cloud.shard(rank, 3).len()).sum();
        assert_eq!(total, cloud.len());
        let first = cloud.shard(0, 3);
        assert_eq!(first.position(0), Vector3::zeros());
        let last = cloud.shard(2, 3);
        assert_eq!(
            last.position(last.len() - 1),
            Vector3::new(4.0, 0.0, 0.0)
        );
    }
}
