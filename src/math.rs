use nalgebra as na;

const COLLINEAR_EPSILON: f64 = 1e-6;

/// Similarity transform moving the centroid to the origin with a mean
/// distance of sqrt(2), together with the transformed points.
pub fn normalize_points(
    points: &[na::Point2<f64>],
) -> Option<(Vec<na::Point2<f64>>, na::Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(na::Vector2::zeros(), |acc, p| acc + p.coords)
        / n;

    let mean_dist = points
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n;

    if !(mean_dist > f64::EPSILON) {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = na::Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    );

    let normalized = points
        .iter()
        .map(|p| na::Point2::from((p.coords - centroid) * s))
        .collect();

    Some((normalized, t))
}

/// Normalized direct linear transform. Solves `dst ~ H * src` in the least
/// squares sense for four or more correspondences.
pub fn homography_dlt(
    src: &[na::Point2<f64>],
    dst: &[na::Point2<f64>],
) -> Option<na::Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let (src_n, src_t) = normalize_points(src)?;
    let (dst_n, dst_t) = normalize_points(dst)?;

    // A^T A accumulated row by row, the null vector of A is its eigenvector
    // with the smallest eigenvalue
    let mut ata = na::SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in src_n.iter().zip(dst_n.iter()) {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);

        let r1 = na::SVector::<f64, 9>::from_column_slice(&[
            -x,
            -y,
            -1.0,
            0.0,
            0.0,
            0.0,
            u * x,
            u * y,
            u,
        ]);
        let r2 = na::SVector::<f64, 9>::from_column_slice(&[
            0.0,
            0.0,
            0.0,
            -x,
            -y,
            -1.0,
            v * x,
            v * y,
            v,
        ]);

        ata += r1 * r1.transpose();
        ata += r2 * r2.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let (idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(idx);

    let hn = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let mut denorm = dst_t.try_inverse()? * hn * src_t;

    let scale = denorm[(2, 2)];
    if scale.abs() > f64::EPSILON {
        denorm /= scale;
    } else {
        denorm /= denorm.norm();
    }

    if denorm.iter().all(|v| v.is_finite()) {
        Some(denorm)
    } else {
        None
    }
}

/// Maps a point through `h`, `None` when it lands on the line at infinity.
#[inline]
pub fn project(h: &na::Matrix3<f64>, p: &na::Point2<f64>) -> Option<na::Point2<f64>> {
    let r = h * na::Vector3::new(p.x, p.y, 1.0);

    if r.z.abs() < 1e-12 {
        return None;
    }

    let out = na::Point2::new(r.x / r.z, r.y / r.z);
    if out.x.is_finite() && out.y.is_finite() {
        Some(out)
    } else {
        None
    }
}

pub fn collinear(a: &na::Point2<f64>, b: &na::Point2<f64>, c: &na::Point2<f64>) -> bool {
    let ab = b - a;
    let ac = c - a;
    let scale = ab.norm() * ac.norm();

    if scale <= f64::EPSILON {
        return true;
    }

    (ab.x * ac.y - ab.y * ac.x).abs() <= COLLINEAR_EPSILON * scale
}

/// True when any three of the points lie on one line.
pub fn has_collinear_triple(points: &[na::Point2<f64>]) -> bool {
    let n = points.len();

    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if collinear(&points[i], &points[j], &points[k]) {
                    return true;
                }
            }
        }
    }

    false
}
