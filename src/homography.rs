use log::{debug, info, warn};
use nalgebra as na;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::math;

/// Maximum distance, in world units, between a projected calibration point
/// and its reference for the pair to count as an inlier.
pub const REPROJECTION_TOLERANCE: f64 = 5.0;

const MAX_ITERATIONS: usize = 2000;
const RANSAC_SEED: u64 = 0x5eed_cafe;

/// Projective transform from image pixels to ground plane meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(na::Matrix3<f64>);

impl Homography {
    pub fn from_matrix(matrix: na::Matrix3<f64>) -> Result<Self, Error> {
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(Error::CalibrationError(
                "homography has non-finite entries".into(),
            ));
        }

        if matrix.determinant().abs() < 1e-12 {
            return Err(Error::CalibrationError("homography is singular".into()));
        }

        Ok(Self(matrix))
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self, Error> {
        Self::from_matrix(na::Matrix3::from_fn(|r, c| rows[r][c]))
    }

    /// Robust fit from at least four pixel to world correspondences. Pairs
    /// reprojecting further than [`REPROJECTION_TOLERANCE`] from the
    /// consensus model are ignored.
    pub fn calibrate(pixels: &[[f64; 2]], world: &[[f64; 2]]) -> Result<Self, Error> {
        if pixels.len() != world.len() {
            return Err(Error::CalibrationError(format!(
                "got {} pixel points but {} world points",
                pixels.len(),
                world.len()
            )));
        }

        if pixels.len() < 4 {
            return Err(Error::CalibrationError(format!(
                "at least 4 point pairs are required, got {}",
                pixels.len()
            )));
        }

        let src: Vec<_> = pixels.iter().map(|p| na::Point2::new(p[0], p[1])).collect();
        let dst: Vec<_> = world.iter().map(|p| na::Point2::new(p[0], p[1])).collect();

        if src.iter().chain(dst.iter()).any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(Error::CalibrationError(
                "calibration points must be finite".into(),
            ));
        }

        let (matrix, inliers) = ransac(&src, &dst).ok_or_else(|| {
            warn!("homography solve did not converge for {} points", src.len());
            Error::CalibrationError("homography solve did not converge".into())
        })?;

        info!(
            "homography calibrated from {} points ({} inliers)",
            src.len(),
            inliers
        );

        Self::from_matrix(matrix)
    }

    #[inline]
    pub fn matrix(&self) -> &na::Matrix3<f64> {
        &self.0
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.0;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    #[inline]
    pub fn project(&self, p: na::Point2<f64>) -> Option<na::Point2<f64>> {
        math::project(&self.0, &p)
    }

    /// Ground distance between two image points.
    #[inline]
    pub fn distance(&self, a: na::Point2<f64>, b: na::Point2<f64>) -> Option<f64> {
        Some(na::distance(&self.project(a)?, &self.project(b)?))
    }

    pub fn reprojection_error(&self, pixel: [f64; 2], world: [f64; 2]) -> Option<f64> {
        let p = self.project(na::Point2::new(pixel[0], pixel[1]))?;

        Some(na::distance(&p, &na::Point2::new(world[0], world[1])))
    }
}

impl Serialize for Homography {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_rows().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Homography {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = <[[f64; 3]; 3]>::deserialize(deserializer)?;

        Homography::from_rows(rows).map_err(de::Error::custom)
    }
}

fn reprojection_errors(
    h: &na::Matrix3<f64>,
    src: &[na::Point2<f64>],
    dst: &[na::Point2<f64>],
) -> Vec<f64> {
    src.iter()
        .zip(dst.iter())
        .map(|(s, d)| {
            math::project(h, s)
                .map(|p| na::distance(&p, d))
                .unwrap_or(f64::INFINITY)
        })
        .collect()
}

/// Every 4-subset in lexicographic order when there are few enough of them,
/// otherwise a seeded random draw.
fn minimal_samples(n: usize) -> Vec<[usize; 4]> {
    let m = n as u128;
    let total = m * (m - 1) * (m - 2) * (m - 3) / 24;

    if total <= MAX_ITERATIONS as u128 {
        let total = total as usize;
        let mut out = Vec::with_capacity(total);
        for a in 0..n {
            for b in a + 1..n {
                for c in b + 1..n {
                    for d in c + 1..n {
                        out.push([a, b, c, d]);
                    }
                }
            }
        }
        out
    } else {
        let mut rng = StdRng::seed_from_u64(RANSAC_SEED);

        (0..MAX_ITERATIONS)
            .map(|_| {
                let idx = rand::seq::index::sample(&mut rng, n, 4).into_vec();
                [idx[0], idx[1], idx[2], idx[3]]
            })
            .collect()
    }
}

fn ransac(
    src: &[na::Point2<f64>],
    dst: &[na::Point2<f64>],
) -> Option<(na::Matrix3<f64>, usize)> {
    let mut best: Option<(Vec<usize>, f64)> = None;

    for sample in minimal_samples(src.len()) {
        let s: Vec<_> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<_> = sample.iter().map(|&i| dst[i]).collect();

        if math::has_collinear_triple(&s) || math::has_collinear_triple(&d) {
            continue;
        }

        let h = match math::homography_dlt(&s, &d) {
            Some(h) => h,
            None => continue,
        };

        let errors = reprojection_errors(&h, src, dst);
        let inliers: Vec<usize> = (0..src.len())
            .filter(|&i| errors[i] <= REPROJECTION_TOLERANCE)
            .collect();
        let residual: f64 = inliers.iter().map(|&i| errors[i]).sum();

        let better = match &best {
            None => inliers.len() >= 4,
            Some((b, r)) => {
                inliers.len() > b.len() || (inliers.len() == b.len() && residual < *r)
            }
        };

        if better {
            debug!(
                "ransac sample {:?}: {} inliers, residual {:.4}",
                sample,
                inliers.len(),
                residual
            );
            best = Some((inliers, residual));
        }
    }

    let (inliers, _) = best?;
    let s: Vec<_> = inliers.iter().map(|&i| src[i]).collect();
    let d: Vec<_> = inliers.iter().map(|&i| dst[i]).collect();
    let refined = math::homography_dlt(&s, &d)?;

    // the refit must still agree with its own consensus set
    let errors = reprojection_errors(&refined, &s, &d);
    if errors.iter().all(|e| *e <= REPROJECTION_TOLERANCE) {
        Some((refined, inliers.len()))
    } else {
        None
    }
}
