//! Local correlation image of a movie.

use ndarray::{Array2, Array3, Axis};

/// Mean temporal correlation of every pixel with its 8-connected neighbors.
///
/// Each pixel's time course is z-scored; the image value is the average
/// Pearson correlation with the in-bounds neighbors. Pixels with no temporal
/// variance contribute and receive 0.
pub fn correlation_image(movie: &Array3<f64>) -> Array2<f64> {
    let (height, width, nframes) = movie.dim();
    if nframes < 2 {
        return Array2::zeros((height, width));
    }

    // z-scored time courses, zero where the pixel is flat
    let mut z = movie.to_owned();
    for mut lane in z.lanes_mut(Axis(2)) {
        let mean = lane.sum() / nframes as f64;
        let var = lane.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nframes as f64;
        let std = var.sqrt();
        if std > 1e-12 {
            lane.mapv_inplace(|v| (v - mean) / std);
        } else {
            lane.fill(0.0);
        }
    }

    let mut image = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut total = 0.0;
            let mut count = 0usize;
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dy == 0 && dx == 0 {
                        continue;
                    }
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    let r: f64 = (0..nframes)
                        .map(|t| z[[y, x, t]] * z[[ny, nx, t]])
                        .sum::<f64>()
                        / nframes as f64;
                    total += r;
                    count += 1;
                }
            }
            if count > 0 {
                image[[y, x]] = total / count as f64;
            }
        }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_shared_signal_correlates_fully() {
        let movie = Array3::from_shape_fn((4, 5, 20), |(y, x, t)| {
            (t as f64 * 0.7).sin() * (1.0 + y as f64) + x as f64
        });
        let image = correlation_image(&movie);
        for v in image.iter() {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flat_movie_is_zero() {
        let movie = Array3::from_elem((3, 3, 10), 5.0);
        let image = correlation_image(&movie);
        assert_eq!(image, Array2::<f64>::zeros((3, 3)));
    }

    #[test]
    fn test_anticorrelated_neighbors() {
        // Checkerboard of opposite-sign signals: horizontal and vertical
        // neighbors anti-correlate, diagonal neighbors correlate.
        let movie = Array3::from_shape_fn((3, 3, 16), |(y, x, t)| {
            let sign = if (y + x) % 2 == 0 { 1.0 } else { -1.0 };
            sign * (t as f64 * 0.9).cos()
        });
        let image = correlation_image(&movie);
        // Centre: 4 edge neighbors at -1, 4 diagonals at +1
        assert_abs_diff_eq!(image[[1, 1]], 0.0, epsilon = 1e-9);
        // Corner: 2 edge neighbors at -1, 1 diagonal at +1
        assert_abs_diff_eq!(image[[0, 0]], -1.0 / 3.0, epsilon = 1e-9);
    }
}
