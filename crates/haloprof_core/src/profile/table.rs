//! The per-bin statistics table: fixed rows, fixed columns, additive then
//! multiplicative mutation.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::cloud::Value;
use crate::error::ProfileError;

/// Column holding the per-bin particle count.
pub const NUMBER_IN_BIN: &str = "number in bin";
/// Column holding each bin's outer radius.
pub const BIN_RADIUS: &str = "bin radius";
/// Column holding each bin's inner radius.
pub const BIN_RADIUS_MIN: &str = "bin radius min";

/// Which aggregate of a base quantity a column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Total,
    Average,
    Cumulative,
}

impl Statistic {
    /// Suffix appended to the base name to form the column name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Statistic::Total => "total",
            Statistic::Average => "average",
            Statistic::Cumulative => "cumulative",
        }
    }
}

/// How a cell mutation combines with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Add,
    Multiply,
    Set,
}

/// Merge and finalization class of a column.
///
/// `Edges` columns describe the bin layout and are written once at
/// allocation. `Accumulated` columns are summed across workers.
/// `Postprocessed` columns are written once during finalization; neither
/// of the latter two may be touched by the other phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRole {
    Edges,
    Accumulated,
    Postprocessed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ColumnData {
    Scalar(Vec<f64>),
    Vector(Vec<Vector3<f64>>),
}

impl ColumnData {
    fn zeros(components: usize, bins: usize) -> Result<Self, ProfileError> {
        match components {
            1 => Ok(ColumnData::Scalar(vec![0.0; bins])),
            3 => Ok(ColumnData::Vector(vec![Vector3::zeros(); bins])),
            other => Err(ProfileError::Configuration(format!(
                "columns hold 1 or 3 components, not {other}"
            ))),
        }
    }

    fn components(&self) -> usize {
        match self {
            ColumnData::Scalar(_) => 1,
            ColumnData::Vector(_) => 3,
        }
    }
}

/// One named column group member of the bin table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    base: String,
    statistic: Statistic,
    role: ColumnRole,
    data: ColumnData,
}

impl Column {
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn role(&self) -> ColumnRole {
        self.role
    }

    pub fn components(&self) -> usize {
        self.data.components()
    }

    /// Full column name, `"{base}_{statistic}"`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.base, self.statistic.suffix())
    }

    fn value(&self, bin: usize) -> Value {
        match &self.data {
            ColumnData::Scalar(cells) => Value::Scalar(cells[bin]),
            ColumnData::Vector(cells) => Value::Vector(cells[bin]),
        }
    }

    fn matches(&self, base: &str, statistic: Statistic) -> bool {
        self.base == base && self.statistic == statistic
    }
}

fn combine(current: f64, mode: UpdateMode, update: f64) -> f64 {
    match mode {
        UpdateMode::Add => current + update,
        UpdateMode::Multiply => current * update,
        UpdateMode::Set => update,
    }
}

/// Ordered sequence of radial bins with one column per tracked aggregate.
///
/// Rows are created once by the engine's bin initialization and are never
/// added, removed, or reordered afterwards; only cell values change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinTable {
    bin_count: usize,
    bin_spacing: f64,
    finalized: bool,
    columns: Vec<Column>,
}

impl BinTable {
    pub(crate) fn new(bin_count: usize, bin_spacing: f64) -> Self {
        Self {
            bin_count,
            bin_spacing,
            finalized: false,
            columns: Vec::new(),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn bin_spacing(&self) -> f64 {
        self.bin_spacing
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn has_column(&self, base: &str, statistic: Statistic) -> bool {
        self.columns.iter().any(|c| c.matches(base, statistic))
    }

    /// Appends a zero-filled column. Only the engine extends the schema.
    pub(crate) fn add_column(
        &mut self,
        base: &str,
        statistic: Statistic,
        role: ColumnRole,
        components: usize,
    ) -> Result<(), ProfileError> {
        if self.has_column(base, statistic) {
            return Err(ProfileError::Configuration(format!(
                "duplicate column '{}_{}'",
                base,
                statistic.suffix()
            )));
        }
        self.columns.push(Column {
            base: base.to_string(),
            statistic,
            role,
            data: ColumnData::zeros(components, self.bin_count)?,
        });
        Ok(())
    }

    fn column_mut(&mut self, base: &str, statistic: Statistic) -> Result<&mut Column, ProfileError> {
        self.columns
            .iter_mut()
            .find(|c| c.matches(base, statistic))
            .ok_or_else(|| {
                ProfileError::Configuration(format!(
                    "no column '{}_{}' in the bin table",
                    base,
                    statistic.suffix()
                ))
            })
    }

    /// Value of one cell.
    pub fn value(&self, bin: usize, base: &str, statistic: Statistic) -> Result<Value, ProfileError> {
        self.check_bin(bin)?;
        self.columns
            .iter()
            .find(|c| c.matches(base, statistic))
            .map(|c| c.value(bin))
            .ok_or_else(|| {
                ProfileError::Configuration(format!(
                    "no column '{}_{}' in the bin table",
                    base,
                    statistic.suffix()
                ))
            })
    }

    /// Mutates one cell. Scalar updates broadcast across vector cells;
    /// a vector update against a scalar column is rejected.
    pub fn update(
        &mut self,
        bin: usize,
        mode: UpdateMode,
        base: &str,
        statistic: Statistic,
        update: &Value,
    ) -> Result<(), ProfileError> {
        self.check_bin(bin)?;
        let column = self.column_mut(base, statistic)?;
        match (&mut column.data, update) {
            (ColumnData::Scalar(cells), Value::Scalar(value)) => {
                cells[bin] = combine(cells[bin], mode, *value);
            }
            (ColumnData::Vector(cells), Value::Vector(value)) => {
                for component in 0..3 {
                    cells[bin][component] = combine(cells[bin][component], mode, value[component]);
                }
            }
            (ColumnData::Vector(cells), Value::Scalar(value)) => {
                for component in 0..3 {
                    cells[bin][component] = combine(cells[bin][component], mode, *value);
                }
            }
            (ColumnData::Scalar(_), Value::Vector(_)) => {
                return Err(ProfileError::Configuration(format!(
                    "column '{}_{}' holds scalars but was updated with a vector",
                    base,
                    statistic.suffix()
                )));
            }
        }
        Ok(())
    }

    /// Applies the update to `bin` and every bin beyond it, maintaining
    /// running `Sum(<= bin)` columns.
    pub fn update_cumulative(
        &mut self,
        bin: usize,
        mode: UpdateMode,
        base: &str,
        statistic: Statistic,
        update: &Value,
    ) -> Result<(), ProfileError> {
        self.check_bin(bin)?;
        for target in bin..self.bin_count {
            self.update(target, mode, base, statistic, update)?;
        }
        Ok(())
    }

    /// One row as `(column name, value)` pairs, for consumers exporting or
    /// plotting the finished table.
    pub fn row(&self, bin: usize) -> Result<Vec<(String, Value)>, ProfileError> {
        self.check_bin(bin)?;
        Ok(self
            .columns
            .iter()
            .map(|column| (column.name(), column.value(bin)))
            .collect())
    }

    /// Element-wise sum of every accumulated column of `other` into self.
    /// Callers must have verified the schemas match.
    pub(crate) fn absorb_accumulated(&mut self, other: &BinTable) {
        for (into, from) in self.columns.iter_mut().zip(other.columns.iter()) {
            if into.role != ColumnRole::Accumulated {
                continue;
            }
            match (&mut into.data, &from.data) {
                (ColumnData::Scalar(a), ColumnData::Scalar(b)) => {
                    for (cell, add) in a.iter_mut().zip(b.iter()) {
                        *cell += add;
                    }
                }
                (ColumnData::Vector(a), ColumnData::Vector(b)) => {
                    for (cell, add) in a.iter_mut().zip(b.iter()) {
                        *cell += add;
                    }
                }
                // Unreachable after a schema check; leave mismatched
                // widths untouched rather than guessing.
                _ => {}
            }
        }
    }

    fn check_bin(&self, bin: usize) -> Result<(), ProfileError> {
        if bin >= self.bin_count {
            return Err(ProfileError::Configuration(format!(
                "bin index {bin} out of range for {} bins",
                self.bin_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BinTable, ColumnRole, Statistic, UpdateMode, NUMBER_IN_BIN};
    use crate::cloud::Value;
    use crate::error::ProfileError;
    use nalgebra::Vector3;

    fn small_table() -> BinTable {
        let mut table = BinTable::new(3, 1.0);
        table
            .add_column(NUMBER_IN_BIN, Statistic::Total, ColumnRole::Accumulated, 1)
            .expect("fresh column");
        table
            .add_column("velocity", Statistic::Average, ColumnRole::Accumulated, 3)
            .expect("fresh column");
        table
    }

    #[test]
    fn add_accumulates_and_multiply_scales() {
        let mut table = small_table();
        table
            .update(1, UpdateMode::Add, NUMBER_IN_BIN, Statistic::Total, &Value::Scalar(2.0))
            .expect("update");
        table
            .update(1, UpdateMode::Add, NUMBER_IN_BIN, Statistic::Total, &Value::Scalar(3.0))
            .expect("update");
        table
            .update(1, UpdateMode::Multiply, NUMBER_IN_BIN, Statistic::Total, &Value::Scalar(0.5))
            .expect("update");
        assert_eq!(
            table.value(1, NUMBER_IN_BIN, Statistic::Total).expect("value"),
            Value::Scalar(2.5)
        );
    }

    #[test]
    fn scalar_update_broadcasts_across_vector_cells() {
        let mut table = small_table();
        table
            .update(
                0,
                UpdateMode::Add,
                "velocity",
                Statistic::Average,
                &Value::Vector(Vector3::new(2.0, 4.0, 6.0)),
            )
            .expect("update");
        table
            .update(0, UpdateMode::Multiply, "velocity", Statistic::Average, &Value::Scalar(0.5))
            .expect("update");
        assert_eq!(
            table.value(0, "velocity", Statistic::Average).expect("value"),
            Value::Vector(Vector3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn vector_update_against_scalar_column_is_rejected() {
        let mut table = small_table();
        let result = table.update(
            0,
            UpdateMode::Add,
            NUMBER_IN_BIN,
            Statistic::Total,
            &Value::Vector(Vector3::zeros()),
        );
        assert!(matches!(result, Err(ProfileError::Configuration(_))));
    }

    #[test]
    fn cumulative_update_touches_all_outer_bins() {
        let mut table = small_table();
        table
            .update_cumulative(1, UpdateMode::Add, NUMBER_IN_BIN, Statistic::Total, &Value::Scalar(1.0))
            .expect("update");
        assert_eq!(
            table.value(0, NUMBER_IN_BIN, Statistic::Total).expect("value"),
            Value::Scalar(0.0)
        );
        for bin in 1..3 {
            assert_eq!(
                table.value(bin, NUMBER_IN_BIN, Statistic::Total).expect("value"),
                Value::Scalar(1.0)
            );
        }
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let mut table = small_table();
        let result = table.add_column(NUMBER_IN_BIN, Statistic::Total, ColumnRole::Accumulated, 1);
        assert!(matches!(result, Err(ProfileError::Configuration(_))));
    }

    #[test]
    fn out_of_range_bin_is_rejected() {
        let table = small_table();
        let result = table.value(3, NUMBER_IN_BIN, Statistic::Total);
        assert!(matches!(result, Err(ProfileError::Configuration(_))));
    }

    #[test]
    fn rows_expose_full_column_names() {
        let table = small_table();
        let row = table.row(0).expect("row");
        let names: Vec<&str> = row.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["number in bin_total", "velocity_average"]);
    }
}
