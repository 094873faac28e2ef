/// Dense row-major f64 feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

impl Matrix {
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self { data: vec![0.0; n_rows * n_cols], n_rows, n_cols }
    }

    /// Build from row-major data. Panics if the length does not match.
    pub fn from_row_major(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), n_rows * n_cols, "matrix data length mismatch");
        Self { data, n_rows, n_cols }
    }

    /// Build from equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for r in rows {
            assert_eq!(r.len(), n_cols, "ragged rows");
            data.extend_from_slice(r);
        }
        Self { data, n_rows: rows.len(), n_cols }
    }

    /// Build from equally long columns.
    pub fn from_columns(cols: &[Vec<f64>]) -> Self {
        let n_rows = cols.first().map_or(0, Vec::len);
        let mut m = Self::zeros(n_rows, cols.len());
        for (j, c) in cols.iter().enumerate() {
            assert_eq!(c.len(), n_rows, "ragged columns");
            for (i, &v) in c.iter().enumerate() {
                m.set(i, j, v);
            }
        }
        m
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: f64) {
        self.data[row * self.n_cols + col] = v;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.n_cols..(row + 1) * self.n_cols]
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.n_rows).map(|r| self.get(r, col)).collect()
    }

    /// Copy of the given rows and columns, in the given order.
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(rows.len() * cols.len());
        for &r in rows {
            let src = self.row(r);
            data.extend(cols.iter().map(|&c| src[c]));
        }
        Matrix { data, n_rows: rows.len(), n_cols: cols.len() }
    }

    pub fn select_columns(&self, cols: &[usize]) -> Matrix {
        let rows: Vec<usize> = (0..self.n_rows).collect();
        self.select(&rows, cols)
    }
}
