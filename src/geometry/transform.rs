/// 3D affine transform stored as the top three rows of a 4×4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform3 {
    rows: [[f64; 4]; 3],
}

impl AffineTransform3 {
    pub fn identity() -> Self {
        Self::scale([1.0, 1.0, 1.0])
    }

    pub fn scale(s: [f64; 3]) -> Self {
        Self {
            rows: [
                [s[0], 0.0, 0.0, 0.0],
                [0.0, s[1], 0.0, 0.0],
                [0.0, 0.0, s[2], 0.0],
            ],
        }
    }

    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[[f64; 4]; 3] {
        &self.rows
    }

    /// Placement of a downsampled level in level-0 pixel coordinates.
    ///
    /// Pixel centres of the coarser level land at the centre of the block of
    /// finer pixels they summarise: scale by `factors`, then shift by
    /// `(factor - 1) / 2`.
    pub fn mipmap(factors: [f64; 3]) -> Self {
        let mut transform = Self::scale(factors);
        for (axis, factor) in factors.iter().enumerate() {
            transform.rows[axis][3] = (factor - 1.0) / 2.0;
        }
        transform
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn compose(&self, inner: &AffineTransform3) -> AffineTransform3 {
        let mut rows = [[0.0; 4]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for c in 0..4 {
                let mut sum = if c == 3 { self.rows[r][3] } else { 0.0 };
                for k in 0..3 {
                    sum += self.rows[r][k] * inner.rows[k][c];
                }
                row[c] = sum;
            }
        }
        AffineTransform3 { rows }
    }

    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (r, value) in out.iter_mut().enumerate() {
            let row = &self.rows[r];
            *value = row[0] * point[0] + row[1] * point[1] + row[2] * point[2] + row[3];
        }
        out
    }
}

impl Default for AffineTransform3 {
    fn default() -> Self {
        Self::identity()
    }
}
