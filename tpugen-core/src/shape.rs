use crate::error::{BackendError, ErrorStatus};

/// Maximum number of dimensions a tensor descriptor can carry.
pub const MAX_SHAPE_DIMS: usize = 8;

/// Dimension extents of a tensor descriptor.
///
/// Rank is validated on construction and never exceeds [`MAX_SHAPE_DIMS`].
/// Extents are stored as `i32`, which is what the runtimes take.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shape(pub(crate) Box<[i32]>);

impl Shape {
    pub fn new(dims: &[i32]) -> Result<Shape, BackendError> {
        if dims.len() > MAX_SHAPE_DIMS {
            return Err(BackendError::new(
                ErrorStatus::ShapeOverflow,
                format!("{} dims, descriptors hold at most {MAX_SHAPE_DIMS}", dims.len()),
            ));
        }
        Ok(Shape(dims.into()))
    }

    /// Builds a shape from IR extents, which are 64 bit.
    pub fn from_ir(dims: &[i64]) -> Result<Shape, BackendError> {
        let dims = dims
            .iter()
            .map(|&d| {
                i32::try_from(d).map_err(|_| {
                    BackendError::new(ErrorStatus::ShapeOverflow, format!("extent {d} does not fit in i32"))
                })
            })
            .collect::<Result<Vec<i32>, BackendError>>()?;
        Shape::new(&dims)
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements, product of all extents.
    #[must_use]
    pub fn numel(&self) -> i64 {
        self.0.iter().map(|&d| i64::from(d)).product()
    }

    pub fn iter(&self) -> impl Iterator<Item = &i32> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    /// Collapses the shape into 4 canonical axes.
    #[must_use]
    pub fn nchw(&self) -> (i64, i64, i64, i64) {
        let dims: Vec<i64> = self.0.iter().map(|&d| i64::from(d)).collect();
        nchw(&dims)
    }
}

impl core::ops::Index<usize> for Shape {
    type Output = i32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// Splits extents into (batch, channel, height, width).
///
/// First three dims map to n, c and h, all trailing dims fold into w.
/// Missing dims are 1.
#[must_use]
pub fn nchw(shape: &[i64]) -> (i64, i64, i64, i64) {
    let n = shape.first().copied().unwrap_or(1);
    let c = shape.get(1).copied().unwrap_or(1);
    let h = shape.get(2).copied().unwrap_or(1);
    let w = shape.iter().skip(3).product();
    (n, c, h, w)
}
