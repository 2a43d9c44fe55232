//! Binary morphology on boolean masks
//!
//! Pixels outside the mask count as `false` for erosion, so foreground
//! touching the border erodes like foreground next to background.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Structuring element centred on the pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructuringElement {
    /// 3x3 cross: the pixel and its 4-connected neighbours
    Cross,
    /// 3x3 square: the pixel and its 8-connected neighbours
    Square,
}

impl StructuringElement {
    fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            StructuringElement::Cross => &[(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)],
            StructuringElement::Square => &[
                (-1, -1), (-1, 0), (-1, 1),
                (0, -1), (0, 0), (0, 1),
                (1, -1), (1, 0), (1, 1),
            ],
        }
    }
}

fn neighbour(mask: &Array2<bool>, i: usize, j: usize, (di, dj): (isize, isize)) -> Option<bool> {
    let (height, width) = mask.dim();
    let ni = i.checked_add_signed(di)?;
    let nj = j.checked_add_signed(dj)?;
    (ni < height && nj < width).then(|| mask[[ni, nj]])
}

/// A pixel survives when every element position is set
pub fn binary_erosion(mask: &Array2<bool>, element: StructuringElement) -> Array2<bool> {
    let offsets = element.offsets();
    Array2::from_shape_fn(mask.dim(), |(i, j)| {
        offsets
            .iter()
            .all(|&offset| neighbour(mask, i, j, offset).unwrap_or(false))
    })
}

/// A pixel is set when any element position is set
pub fn binary_dilation(mask: &Array2<bool>, element: StructuringElement) -> Array2<bool> {
    let offsets = element.offsets();
    Array2::from_shape_fn(mask.dim(), |(i, j)| {
        offsets
            .iter()
            .any(|&offset| neighbour(mask, i, j, offset).unwrap_or(false))
    })
}

/// Erosion followed by dilation; removes foreground features smaller than
/// the structuring element
pub fn binary_opening(mask: &Array2<bool>, element: StructuringElement) -> Array2<bool> {
    binary_dilation(&binary_erosion(mask, element), element)
}
