//! Data
//!
//! The observation table used by the estimators and the column-major matrix
//! view handed to learners.
use crate::errors::MtpError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Contiguous Column Major Matrix data container.
///
/// This structure holds a dense matrix of values in a single contiguous memory block,
/// in column-major order (Fortran-style), which allows for efficient column slicing.
///
/// # Type Parameters
/// * `T` - The numeric type of the data (e.g., `f32`, `f64`).
pub struct Matrix<'a, T> {
    /// The raw data stored in a single slice.
    pub data: &'a [T],
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
}

impl<'a, T> Matrix<'a, T> {
    /// Create a new Matrix.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Self {
        Matrix { data, rows, cols }
    }

    /// Get access to a row of the data, as an iterator.
    pub fn get_row_iter(&self, row: usize) -> std::iter::StepBy<std::iter::Skip<std::slice::Iter<'a, T>>> {
        self.data.iter().skip(row).step_by(self.rows)
    }

    /// Get an entire column in the matrix.
    ///
    /// * `col` - The index of the column to get.
    pub fn get_col(&self, col: usize) -> &[T] {
        &self.data[(col * self.rows)..((col + 1) * self.rows)]
    }
}

impl<'a> Matrix<'a, f64> {
    /// Copy a subset of rows into a new design.
    pub fn select_rows(&self, rows: &[usize]) -> Design {
        let mut data = Vec::with_capacity(rows.len() * self.cols);
        for j in 0..self.cols {
            let col = self.get_col(j);
            data.extend(rows.iter().map(|&i| col[i]));
        }
        Design {
            data,
            rows: rows.len(),
            cols: self.cols,
        }
    }
}

impl<'a, T> Display for Matrix<'a, T>
where
    T: Display + Copy,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut val = String::new();
        for i in 0..self.rows {
            let row: Vec<String> = self.get_row_iter(i).map(|v| v.to_string()).collect();
            val.push_str(&row.join(" "));
            val.push('\n');
        }
        write!(f, "{}", val)
    }
}

/// Owned, column-major feature buffer built from a [`Frame`].
#[derive(Debug, Clone)]
pub struct Design {
    /// Values, column after column.
    pub data: Vec<f64>,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns, after categorical expansion.
    pub cols: usize,
}

impl Design {
    /// Borrow the buffer as a [`Matrix`].
    pub fn matrix(&self) -> Matrix<'_, f64> {
        Matrix::new(&self.data, self.rows, self.cols)
    }

    /// Stack two designs with the same columns on top of each other.
    pub fn stack(top: &Design, bottom: &Design) -> Design {
        debug_assert_eq!(top.cols, bottom.cols);
        let rows = top.rows + bottom.rows;
        let mut data = Vec::with_capacity(rows * top.cols);
        for j in 0..top.cols {
            data.extend_from_slice(top.matrix().get_col(j));
            data.extend_from_slice(bottom.matrix().get_col(j));
        }
        Design {
            data,
            rows,
            cols: top.cols,
        }
    }
}

/// Observation table: named `f64` columns of equal length, `NaN` marks a missing value.
///
/// Columns flagged as categorical carry their levels and are expanded into
/// indicator columns (reference level dropped) whenever a design is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    index: HashMap<String, usize>,
    levels: HashMap<String, Vec<f64>>,
    rows: usize,
}

impl Frame {
    /// Create an empty frame with a fixed number of rows.
    pub fn new(rows: usize) -> Self {
        Frame {
            rows,
            ..Default::default()
        }
    }

    /// Build a frame from `(name, values)` pairs.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<f64>)>) -> Result<Self, MtpError> {
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut frame = Frame::new(rows);
        for (name, values) in columns {
            frame.insert(name, values)?;
        }
        Ok(frame)
    }

    /// Add a column, or replace it if the name already exists.
    pub fn insert<S: Into<String>>(&mut self, name: S, values: Vec<f64>) -> Result<(), MtpError> {
        let name = name.into();
        if values.len() != self.rows {
            return Err(MtpError::Data(format!(
                "column {} has {} rows, expected {}",
                name,
                values.len(),
                self.rows
            )));
        }
        match self.index.get(&name) {
            Some(&j) => self.columns[j] = values,
            None => {
                self.index.insert(name.clone(), self.columns.len());
                self.names.push(name);
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows
    }

    /// Column names, in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// True if the column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Result<&[f64], MtpError> {
        self.index
            .get(name)
            .map(|&j| self.columns[j].as_slice())
            .ok_or_else(|| MtpError::MissingColumn(name.to_string()))
    }

    /// Mutably borrow a column by name.
    pub fn column_mut(&mut self, name: &str) -> Result<&mut [f64], MtpError> {
        match self.index.get(name) {
            Some(&j) => Ok(self.columns[j].as_mut_slice()),
            None => Err(MtpError::MissingColumn(name.to_string())),
        }
    }

    /// Mark a column as categorical with the given levels. The first level is the reference.
    pub fn set_levels(&mut self, name: &str, levels: Vec<f64>) -> Result<(), MtpError> {
        if !self.contains(name) {
            return Err(MtpError::MissingColumn(name.to_string()));
        }
        self.levels.insert(name.to_string(), levels);
        Ok(())
    }

    /// Build a design over `columns` for the given `rows`.
    pub fn design(&self, columns: &[String], rows: &[usize]) -> Result<Design, MtpError> {
        self.design_with(columns, rows, None)
    }

    /// Build a design where the columns in `swap.1` are read from the frame `swap.0`.
    ///
    /// This is how "observed history, counterfactual treatment" rows are built.
    pub fn design_swapped(
        &self,
        columns: &[String],
        rows: &[usize],
        other: &Frame,
        swapped: &[String],
    ) -> Result<Design, MtpError> {
        self.design_with(columns, rows, Some((other, swapped)))
    }

    fn design_with(
        &self,
        columns: &[String],
        rows: &[usize],
        swap: Option<(&Frame, &[String])>,
    ) -> Result<Design, MtpError> {
        let mut data = Vec::with_capacity(columns.len() * rows.len());
        let mut cols = 0;
        for name in columns {
            let source = match swap {
                Some((other, swapped)) if swapped.contains(name) => other,
                _ => self,
            };
            let values = source.column(name)?;
            match self.levels.get(name) {
                Some(levels) => {
                    for level in levels.iter().skip(1) {
                        data.extend(rows.iter().map(|&i| if values[i] == *level { 1.0 } else { 0.0 }));
                        cols += 1;
                    }
                }
                None => {
                    data.extend(rows.iter().map(|&i| values[i]));
                    cols += 1;
                }
            }
        }
        Ok(Design {
            data,
            rows: rows.len(),
            cols,
        })
    }
}
