//! Primitive motion curves that the gait builders compose.
//!
//! Each curve is a fixed-length sample array over one trajectory segment,
//! normalised to unit amplitude. Builders scale by stride or clearance and
//! concatenate segments into per-leg step tables.

/// Evenly spaced samples from `start` to `end` degrees, both inclusive.
pub(crate) fn deg_linspace(start: f32, end: f32, samples: usize) -> Vec<f32> {
    if samples == 0 {
        return Vec::new();
    }
    if samples == 1 {
        return vec![start];
    }
    let step = (end - start) / (samples - 1) as f32;
    (0..samples).map(|i| start + step * i as f32).collect()
}

pub fn zeros(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}

/// Foot lift during swing. Starts slightly into the sine so the foot leaves
/// the ground on the first sample.
pub fn updown(samples: usize) -> Vec<f32> {
    deg_linspace(20.0, 180.0, samples)
        .into_iter()
        .map(|deg| deg.to_radians().sin())
        .collect()
}

/// Forward excursion during swing, 0 → 1.
pub fn stride_forward(samples: usize) -> Vec<f32> {
    deg_linspace(0.0, 90.0, samples)
        .into_iter()
        .map(|deg| deg.to_radians().sin())
        .collect()
}

/// Return from full excursion to neutral, 1 → 0.
pub fn stride_home(samples: usize) -> Vec<f32> {
    deg_linspace(0.0, 90.0, samples)
        .into_iter()
        .map(|deg| deg.to_radians().cos())
        .collect()
}

/// Push past neutral into the backward sweep, 0 → −√2/2.
pub fn stride_back(samples: usize) -> Vec<f32> {
    deg_linspace(90.0, 135.0, samples)
        .into_iter()
        .map(|deg| deg.to_radians().cos())
        .collect()
}

/// Linear stance sweep from full front to full back, 1 → −1.
pub fn stride_front_to_back(samples: usize) -> Vec<f32> {
    if samples == 0 {
        return Vec::new();
    }
    if samples == 1 {
        return vec![1.0];
    }
    let step = 2.0 / (samples - 1) as f32;
    (0..samples).map(|i| 1.0 - step * i as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        let samples = deg_linspace(0.0, 90.0, 4);
        assert_eq!(samples.len(), 4);
        assert_relative_eq!(samples[0], 0.0);
        assert_relative_eq!(samples[3], 90.0);
    }

    #[test]
    fn stride_forward_rises_to_one() {
        let curve = stride_forward(6);
        assert_relative_eq!(curve[0], 0.0);
        assert_relative_eq!(curve[5], 1.0);
        assert!(curve.windows(2).all(|pair| pair[1] >= pair[0]));
    }

    #[test]
    fn stride_home_falls_to_zero() {
        let curve = stride_home(6);
        assert_relative_eq!(curve[0], 1.0);
        assert_relative_eq!(curve[5], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn stride_back_goes_negative() {
        let curve = stride_back(12);
        assert_relative_eq!(curve[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(curve[11], -(2_f32.sqrt()) / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn front_to_back_is_linear_and_symmetric() {
        let curve = stride_front_to_back(5);
        assert_relative_eq!(curve[0], 1.0);
        assert_relative_eq!(curve[2], 0.0);
        assert_relative_eq!(curve[4], -1.0);
    }

    #[test]
    fn updown_lifts_and_lands() {
        let curve = updown(6);
        assert!(curve[0] > 0.3);
        assert_relative_eq!(curve[5], 0.0, epsilon = 1e-6);
        let peak = curve.iter().cloned().fold(f32::MIN, f32::max);
        assert_relative_eq!(peak, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn zeros_is_flat() {
        assert!(zeros(8).iter().all(|&sample| sample == 0.0));
    }
}
