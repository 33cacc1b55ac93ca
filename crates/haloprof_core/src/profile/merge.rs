//! Combining partial bin tables from independent workers.

use crate::error::ProfileError;
use crate::profile::table::BinTable;

/// Element-wise sum of every accumulated column of `from` into `into`.
///
/// Partial tables must come from the same broadcast schema and must not be
/// finalized: merging after finalization would double-apply the averaging
/// division and corrupt postprocessed columns. The operation is
/// associative and commutative, so partials may be reduced in any order
/// or grouping.
pub fn merge_tables(into: &mut BinTable, from: &BinTable) -> Result<(), ProfileError> {
    check_schema(into, from)?;
    into.absorb_accumulated(from);
    Ok(())
}

fn check_schema(into: &BinTable, from: &BinTable) -> Result<(), ProfileError> {
    if into.is_finalized() || from.is_finalized() {
        return Err(ProfileError::SchemaMismatch(
            "cannot merge finalized tables".to_string(),
        ));
    }
    if into.bin_count() != from.bin_count() {
        return Err(ProfileError::SchemaMismatch(format!(
            "row counts differ: {} vs {}",
            into.bin_count(),
            from.bin_count()
        )));
    }
    if into.bin_spacing() != from.bin_spacing() {
        return Err(ProfileError::SchemaMismatch(format!(
            "bin spacings differ: {} vs {}",
            into.bin_spacing(),
            from.bin_spacing()
        )));
    }
    if into.columns().len() != from.columns().len() {
        return Err(ProfileError::SchemaMismatch(format!(
            "column counts differ: {} vs {}",
            into.columns().len(),
            from.columns().len()
        )));
    }
    for (a, b) in into.columns().iter().zip(from.columns().iter()) {
        if a.base() != b.base()
            || a.statistic() != b.statistic()
            || a.role() != b.role()
            || a.components() != b.components()
        {
            return Err(ProfileError::SchemaMismatch(format!(
                "column '{}' does not match '{}'",
                a.name(),
                b.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::merge_tables;
    use crate::cloud::ParticleSet;
    use crate::error::ProfileError;
    use crate::profile::table::{Statistic, NUMBER_IN_BIN};
    use crate::profile::{
        accumulate, finalize, initialize_bins, standard_elements, ProfileBounds, ProfileSettings,
    };
    use nalgebra::Vector3;

    fn settings() -> ProfileSettings {
        ProfileSettings {
            bin_number: 3,
            ..ProfileSettings::default()
        }
    }

    fn one_point_cloud(radius: f64) -> ParticleSet {
        let mut cloud = ParticleSet::new();
        cloud.push(
            Vector3::new(radius, 0.0, 0.0),
            1.0,
            Vector3::new(0.0, 1.0, 0.0),
        );
        cloud
    }

    fn bounds() -> ProfileBounds {
        ProfileBounds::new(Vector3::zeros(), 3.0, 3).expect("valid bounds")
    }

    fn partial_for(cloud: &ParticleSet) -> crate::profile::BinTable {
        let settings = settings();
        let elements = standard_elements("mass");
        let mut table = initialize_bins(cloud, &elements, &bounds(), &settings).expect("schema");
        accumulate(&mut table, cloud, &elements, &bounds(), &settings).expect("accumulate");
        table
    }

    #[test]
    fn merge_grouping_order_does_not_matter() {
        let clouds = [one_point_cloud(0.5), one_point_cloud(1.5), one_point_cloud(2.5)];
        let elements = standard_elements("mass");

        // (T1 + T2) + T3
        let mut left = partial_for(&clouds[0]);
        merge_tables(&mut left, &partial_for(&clouds[1])).expect("merge");
        merge_tables(&mut left, &partial_for(&clouds[2])).expect("merge");
        finalize(&mut left, &elements).expect("finalize");

        // T1 + (T2 + T3)
        let mut tail = partial_for(&clouds[1]);
        merge_tables(&mut tail, &partial_for(&clouds[2])).expect("merge");
        let mut right = partial_for(&clouds[0]);
        merge_tables(&mut right, &tail).expect("merge");
        finalize(&mut right, &elements).expect("finalize");

        assert_eq!(left, right);
    }

    #[test]
    fn merged_partials_match_the_single_pass_table() {
        let combined = {
            let mut cloud = ParticleSet::new();
            for radius in [0.5, 1.5, 2.5] {
                cloud.push(
                    Vector3::new(radius, 0.0, 0.0),
                    1.0,
                    Vector3::new(0.0, 1.0, 0.0),
                );
            }
            cloud
        };
        let elements = standard_elements("mass");
        let settings = settings();

        let mut whole =
            initialize_bins(&combined, &elements, &bounds(), &settings).expect("schema");
        accumulate(&mut whole, &combined, &elements, &bounds(), &settings).expect("accumulate");
        finalize(&mut whole, &elements).expect("finalize");

        let mut merged = partial_for(&combined.shard(0, 2));
        merge_tables(&mut merged, &partial_for(&combined.shard(1, 2))).expect("merge");
        finalize(&mut merged, &elements).expect("finalize");

        assert_eq!(whole, merged);
        assert_eq!(
            merged
                .value(2, NUMBER_IN_BIN, Statistic::Cumulative)
                .expect("value"),
            crate::cloud::Value::Scalar(3.0)
        );
    }

    #[test]
    fn merge_rejects_differing_row_counts() {
        let cloud = one_point_cloud(0.5);
        let elements = standard_elements("mass");
        let settings = settings();
        let mut three_bins =
            initialize_bins(&cloud, &elements, &bounds(), &settings).expect("schema");
        let wide = ProfileBounds::new(Vector3::zeros(), 4.0, 4).expect("valid bounds");
        let four_bins = initialize_bins(
            &cloud,
            &elements,
            &wide,
            &ProfileSettings {
                bin_number: 4,
                ..ProfileSettings::default()
            },
        )
        .expect("schema");
        let result = merge_tables(&mut three_bins, &four_bins);
        assert!(matches!(result, Err(ProfileError::SchemaMismatch(_))));
    }

    #[test]
    fn merge_rejects_finalized_tables() {
        let cloud = one_point_cloud(0.5);
        let elements = standard_elements("mass");
        let mut finalized = partial_for(&cloud);
        finalize(&mut finalized, &elements).expect("finalize");
        let mut fresh = partial_for(&cloud);
        let result = merge_tables(&mut fresh, &finalized);
        assert!(matches!(result, Err(ProfileError::SchemaMismatch(_))));
    }

    #[test]
    fn merge_rejects_differing_columns() {
        let cloud = one_point_cloud(0.5);
        let settings = settings();
        let with_elements = {
            let elements = standard_elements("mass");
            initialize_bins(&cloud, &elements, &bounds(), &settings).expect("schema")
        };
        let mut without_elements =
            initialize_bins(&cloud, &[], &bounds(), &settings).expect("schema");
        let result = merge_tables(&mut without_elements, &with_elements);
        assert!(matches!(result, Err(ProfileError::SchemaMismatch(_))));
    }
}
