use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufRead, BufReader, Read, Write},
    path::Path,
};

use ndarray::{s, Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use thiserror::Error;

/// Errors raised while building, reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV decoding/encoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Matrix shape does not fit the column list.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    /// Requested column is absent.
    #[error("column `{0}` not found")]
    MissingColumn(String),
    /// Column names must be unique.
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
    /// A data row has the wrong number of fields.
    #[error("row {row}: expected {expected} fields, found {found}")]
    RaggedRow {
        /// 1-based data row number.
        row: usize,
        /// Header width.
        expected: usize,
        /// Fields found.
        found: usize,
    },
    /// A cell could not be parsed as a number.
    #[error("row {row}, column `{column}`: `{value}` is not numeric")]
    NotNumeric {
        /// 1-based data row number.
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },
    /// The file has no header line.
    #[error("csv input has no header")]
    MissingHeader,
}

/// Dense numeric table: ordered column names over a row-major `f64` matrix.
///
/// Missing cells are stored as `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    data: Array2<f64>,
}

impl Frame {
    /// Builds a frame, checking that names are unique and match the matrix width.
    pub fn new(columns: Vec<String>, data: Array2<f64>) -> Result<Self, FrameError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(FrameError::DuplicateColumn(column.clone()));
            }
        }
        if data.ncols() != columns.len() {
            return Err(FrameError::Shape(ndarray::ShapeError::from_kind(
                ndarray::ErrorKind::IncompatibleShape,
            )));
        }
        Ok(Self { columns, data })
    }

    /// Builds a frame from row vectors.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self, FrameError> {
        let width = columns.len();
        let mut flat = Vec::with_capacity(rows.len() * width);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(FrameError::RaggedRow {
                    row: idx + 1,
                    expected: width,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let data = Array2::from_shape_vec((rows.len(), width), flat)?;
        Self::new(columns, data)
    }

    /// Reads a CSV file with a header line. `,` and `;` delimiters are detected.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let path = path.as_ref();
        let mut first_line = String::new();
        BufReader::new(File::open(path)?).read_line(&mut first_line)?;
        let delimiter = sniff_delimiter(&first_line);
        Self::from_reader(File::open(path)?, delimiter)
    }

    /// Reads CSV from any reader using the given delimiter.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, FrameError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let columns: Vec<String> = reader.headers()?.iter().map(ToOwned::to_owned).collect();
        if columns.is_empty() || columns.iter().all(String::is_empty) {
            return Err(FrameError::MissingHeader);
        }
        let width = columns.len();
        let mut flat = Vec::new();
        let mut rows = 0;
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != width {
                return Err(FrameError::RaggedRow {
                    row: idx + 1,
                    expected: width,
                    found: record.len(),
                });
            }
            for (cell, column) in record.iter().zip(&columns) {
                let value = parse_cell(cell).ok_or_else(|| FrameError::NotNumeric {
                    row: idx + 1,
                    column: column.clone(),
                    value: cell.to_owned(),
                })?;
                flat.push(value);
            }
            rows += 1;
        }
        let data = Array2::from_shape_vec((rows, width), flat)?;
        Self::new(columns, data)
    }

    /// Writes the frame as comma-separated CSV with a header; `NaN` becomes an empty cell.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), FrameError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.to_writer(File::create(path)?)
    }

    /// Writes CSV into any writer.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), FrameError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in self.data.rows() {
            writer.write_record(row.iter().map(|value| format_cell(*value)))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Underlying matrix.
    #[must_use]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Consumes the frame into its column names and matrix.
    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, Array2<f64>) {
        (self.columns, self.data)
    }

    /// Position of a column.
    pub fn column_index(&self, name: &str) -> Result<usize, FrameError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| FrameError::MissingColumn(name.to_owned()))
    }

    /// Read-only view of a column.
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, FrameError> {
        let idx = self.column_index(name)?;
        Ok(self.data.column(idx))
    }

    /// Mutable view of a column.
    pub fn column_mut(&mut self, name: &str) -> Result<ArrayViewMut1<'_, f64>, FrameError> {
        let idx = self.column_index(name)?;
        Ok(self.data.column_mut(idx))
    }

    /// Names of every column except `target`, in frame order.
    #[must_use]
    pub fn feature_names(&self, target: &str) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.as_str() != target)
            .cloned()
            .collect()
    }

    /// New frame holding the given rows in the given order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            data: self.data.select(Axis(0), indices),
        }
    }

    /// Separates the target column from the features.
    pub fn split_target(&self, target: &str) -> Result<(Self, Array1<f64>), FrameError> {
        let idx = self.column_index(target)?;
        let keep: Vec<usize> = (0..self.ncols()).filter(|col| *col != idx).collect();
        let features = Self {
            columns: keep.iter().map(|col| self.columns[*col].clone()).collect(),
            data: self.data.select(Axis(1), &keep),
        };
        Ok((features, self.data.column(idx).to_owned()))
    }

    /// Inserts a column at `position` (clamped to the frame width).
    pub fn insert_column(
        &self,
        position: usize,
        name: &str,
        values: &Array1<f64>,
    ) -> Result<Self, FrameError> {
        if values.len() != self.nrows() {
            return Err(FrameError::Shape(ndarray::ShapeError::from_kind(
                ndarray::ErrorKind::IncompatibleShape,
            )));
        }
        let position = position.min(self.ncols());
        let mut columns = self.columns.clone();
        columns.insert(position, name.to_owned());
        let mut data = Array2::zeros((self.nrows(), self.ncols() + 1));
        data.slice_mut(s![.., ..position])
            .assign(&self.data.slice(s![.., ..position]));
        data.column_mut(position).assign(values);
        data.slice_mut(s![.., position + 1..])
            .assign(&self.data.slice(s![.., position..]));
        Self::new(columns, data)
    }
}

/// `;` when the header uses semicolons only, `,` otherwise.
pub(crate) fn sniff_delimiter(header: &str) -> u8 {
    if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    }
}

/// Cell spellings read as a missing value.
pub(crate) const MISSING_TOKENS: [&str; 5] = ["", "NA", "NaN", "nan", "null"];

/// Whether `cell` marks a missing value.
pub(crate) fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell)
}

fn parse_cell(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        Some(f64::NAN)
    } else {
        cell.parse().ok()
    }
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
