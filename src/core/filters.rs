//! Separable neighbourhood kernels shared by the validator, fusion and renderer.
//!
//! All kernels use the half-sample symmetric ("reflect") boundary:
//! `d c b a | a b c d | d c b a`.

use ndarray::{Array2, Array3, Axis};

/// Map an out-of-range index back into `0..n` by mirror reflection
#[inline]
pub fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Correlate every lane of `input` along `axis` with a centred odd-length kernel
pub fn correlate1d(input: &Array2<f32>, kernel: &[f32], axis: usize) -> Array2<f32> {
    let radius = (kernel.len() / 2) as isize;
    let mut output = Array2::<f32>::zeros(input.dim());

    for (lane_in, mut lane_out) in input
        .lanes(Axis(axis))
        .into_iter()
        .zip(output.lanes_mut(Axis(axis)))
    {
        let n = lane_in.len();
        for i in 0..n {
            let mut acc = 0.0f32;
            for (k, w) in kernel.iter().enumerate() {
                let src = reflect_index(i as isize + k as isize - radius, n);
                acc += w * lane_in[src];
            }
            lane_out[i] = acc;
        }
    }

    output
}

/// 3x3 Sobel derivative along `axis` (0 = rows, 1 = columns)
pub fn sobel(input: &Array2<f32>, axis: usize) -> Array2<f32> {
    let derivative = correlate1d(input, &[-1.0, 0.0, 1.0], axis);
    correlate1d(&derivative, &[1.0, 2.0, 1.0], 1 - axis)
}

/// Edge strength `hypot(gx, gy)` from the two Sobel derivatives
pub fn gradient_magnitude(input: &Array2<f32>) -> Array2<f32> {
    let gy = sobel(input, 0);
    let gx = sobel(input, 1);
    let mut magnitude = gy;
    magnitude.zip_mut_with(&gx, |y, &x| *y = y.hypot(x));
    magnitude
}

/// Discrete Laplacian over every axis of a `[C, H, W]` array
pub fn laplace3(input: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = input.dim();
    let mut output = Array3::<f32>::zeros((c, h, w));

    for ch in 0..c {
        for i in 0..h {
            for j in 0..w {
                let center = input[[ch, i, j]];
                let mut acc = -6.0 * center;

                acc += input[[reflect_index(ch as isize - 1, c), i, j]];
                acc += input[[reflect_index(ch as isize + 1, c), i, j]];
                acc += input[[ch, reflect_index(i as isize - 1, h), j]];
                acc += input[[ch, reflect_index(i as isize + 1, h), j]];
                acc += input[[ch, i, reflect_index(j as isize - 1, w)]];
                acc += input[[ch, i, reflect_index(j as isize + 1, w)]];

                output[[ch, i, j]] = acc;
            }
        }
    }

    output
}

/// Normalized 1D Gaussian weights truncated at `truncate` standard deviations
pub fn gaussian_kernel(sigma: f32, truncate: f32) -> Vec<f32> {
    let radius = (truncate * sigma + 0.5) as isize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in kernel.iter_mut() {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian smoothing (4 sigma support)
pub fn gaussian_filter(input: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return input.clone();
    }
    let kernel = gaussian_kernel(sigma, 4.0);
    let rows = correlate1d(input, &kernel, 0);
    correlate1d(&rows, &kernel, 1)
}

/// Bilinear resampling with half-pixel centres (corners not aligned)
pub fn resize_bilinear(input: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = input.dim();
    if (in_h, in_w) == (out_h, out_w) {
        return input.clone();
    }

    let sample = |dst: usize, in_len: usize, out_len: usize| -> (usize, usize, f32) {
        let scale = in_len as f32 / out_len as f32;
        let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(in_len - 1);
        let i1 = (i0 + 1).min(in_len - 1);
        (i0, i1, src - i0 as f32)
    };

    let cols: Vec<(usize, usize, f32)> = (0..out_w).map(|j| sample(j, in_w, out_w)).collect();

    Array2::from_shape_fn((out_h, out_w), |(i, j)| {
        let (r0, r1, fy) = sample(i, in_h, out_h);
        let (c0, c1, fx) = cols[j];
        let top = input[[r0, c0]] * (1.0 - fx) + input[[r0, c1]] * fx;
        let bottom = input[[r1, c0]] * (1.0 - fx) + input[[r1, c1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// Population variance of any iterator of samples
pub fn variance<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> f64 {
    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &v in values {
        let v = v as f64;
        count += 1;
        sum += v;
        sum_sq += v * v;
    }
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 5), 0);
        assert_eq!(reflect_index(-2, 5), 1);
        assert_eq!(reflect_index(5, 5), 4);
        assert_eq!(reflect_index(6, 5), 3);
        assert_eq!(reflect_index(-3, 1), 0);
    }

    #[test]
    fn test_sobel_on_ramp() {
        // Columns rise by one per step
        let ramp = Array2::<f32>::from_shape_fn((5, 5), |(_, j)| j as f32);
        let gx = sobel(&ramp, 1);
        let gy = sobel(&ramp, 0);

        // Interior: central difference 2, smoothed by 1+2+1
        assert_relative_eq!(gx[[2, 2]], 8.0);
        assert_relative_eq!(gy[[2, 2]], 0.0);
    }

    #[test]
    fn test_laplace_of_constant_is_zero() {
        let flat = Array3::<f32>::from_elem((3, 6, 6), 0.5);
        let lap = laplace3(&flat);
        assert!(lap.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_gaussian_preserves_mass() {
        let mut impulse = Array2::<f32>::zeros((21, 21));
        impulse[[10, 10]] = 1.0;
        let smoothed = gaussian_filter(&impulse, 1.2);
        assert_relative_eq!(smoothed.sum(), 1.0, epsilon = 1e-5);
        assert!(smoothed[[10, 10]] < 1.0);
        assert!(smoothed[[10, 11]] > 0.0);
    }

    #[test]
    fn test_resize_bilinear_constant_and_shape() {
        let grid = Array2::<f32>::from_elem((4, 4), 0.7);
        let up = resize_bilinear(&grid, 32, 32);
        assert_eq!(up.dim(), (32, 32));
        assert!(up.iter().all(|v| (v - 0.7).abs() < 1e-6));
    }

    #[test]
    fn test_variance() {
        let values = [1.0f32, 2.0, 3.0, 4.0];
        assert_relative_eq!(variance(values.iter()), 1.25, epsilon = 1e-9);
    }
}
