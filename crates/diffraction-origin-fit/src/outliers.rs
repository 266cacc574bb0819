use diffraction_origin_core::{Field2, OriginError};
use log::debug;
use serde::{Deserialize, Serialize};

/// Outlier flags for a pair of shift fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlierScore {
    /// `true` at outliers and inside the edge band.
    pub mask: Field2<bool>,
    /// Mean absolute disagreement with the neighbours, summed over both fields.
    pub score: Field2<f64>,
    pub cutoff: f64,
}

/// Flag positions whose shifts disagree with their up to 8 neighbours.
///
/// The score at a position is the sum over neighbours of `|dx| + |dy|`,
/// divided by the number of neighbours. A position is an outlier when its
/// score exceeds `n_sigma` times the population standard deviation of all
/// scores. Positions within `edge_boundary` of any edge are always flagged.
pub fn score_outliers(
    xshift: &Field2<f64>,
    yshift: &Field2<f64>,
    n_sigma: f64,
    edge_boundary: usize,
) -> Result<OutlierScore, OriginError> {
    let (nx, ny) = xshift.shape();
    OriginError::check_shape("yshift", (nx, ny), yshift.shape())?;
    if n_sigma.is_nan() || n_sigma < 0.0 {
        return Err(OriginError::InvalidArgument(format!(
            "n_sigma must be non-negative, got {n_sigma}"
        )));
    }

    let score = Field2::from_fn(nx, ny, |x, y| {
        let (cx, cy) = (xshift.get(x, y), yshift.get(x, y));
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in x.saturating_sub(1)..=(x + 1).min(nx - 1) {
            for j in y.saturating_sub(1)..=(y + 1).min(ny - 1) {
                if (i, j) == (x, y) {
                    continue;
                }
                sum += (cx - xshift.get(i, j)).abs() + (cy - yshift.get(i, j)).abs();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    });

    let n = score.len().max(1) as f64;
    let mean = score.as_slice().iter().sum::<f64>() / n;
    let var = score
        .as_slice()
        .iter()
        .map(|s| (s - mean).powi(2))
        .sum::<f64>()
        / n;
    let cutoff = n_sigma * var.sqrt();

    let b = edge_boundary;
    let mask = Field2::from_fn(nx, ny, |x, y| {
        let near_edge = x < b || y < b || x + b >= nx || y + b >= ny;
        near_edge || *score.get(x, y) > cutoff
    });
    debug!(
        "{} of {} positions flagged (cutoff {cutoff:.4e})",
        mask.as_slice().iter().filter(|&&m| m).count(),
        mask.len()
    );

    Ok(OutlierScore {
        mask,
        score,
        cutoff,
    })
}
