//! Heuristic estimates of how many sources a slice holds and how large they
//! appear. These seed the demixing initialization and are never used as
//! hard limits.

/// Assumed thickness of tissue contributing to one slice (um)
pub const TISSUE_DEPTH_UM: f64 = 10.0;

/// Somatic density (components per cubic micron)
pub const SOMATIC_DENSITY: f64 = 0.0001;

/// Axonal/dendritic tissue yields this many times more components
pub const AXONAL_DENSITY_FACTOR: usize = 10;

/// Assumed soma diameter (um)
pub const NEURON_DIAMETER_UM: f64 = 15.0;

/// Expected number of components in a slice.
///
/// The somatic estimate is the slice volume (`height * width * 10 um`) times
/// the somatic density, rounded. Axonal or dendritic tissue scales that
/// figure by exactly [`AXONAL_DENSITY_FACTOR`].
pub fn estimate_component_count(slice_height_um: f64, slice_width_um: f64, is_axonal: bool) -> usize {
    let volume = slice_height_um.max(0.0) * slice_width_um.max(0.0) * TISSUE_DEPTH_UM;
    let somatic = (volume * SOMATIC_DENSITY).round() as usize;
    if is_axonal {
        somatic * AXONAL_DENSITY_FACTOR
    } else {
        somatic
    }
}

/// Expected soma diameter in pixels, never less than one.
pub fn estimate_neuron_pixel_size(scan_width_um: f64, scan_width_px: usize) -> usize {
    if scan_width_px == 0 || !(scan_width_um > 0.0) {
        return 1;
    }
    let um_per_px = scan_width_um / scan_width_px as f64;
    ((NEURON_DIAMETER_UM / um_per_px).round() as usize).max(1)
}

/// Inflate an estimate by `margin` (e.g. 1.5) for use as an initialization hint.
pub fn with_margin(expected: usize, margin: f64) -> usize {
    ((expected as f64) * margin).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_count_somatic() {
        // 400 x 400 um x 10 um = 1.6e6 um^3 -> 160 components
        assert_eq!(estimate_component_count(400.0, 400.0, false), 160);
        assert_eq!(estimate_component_count(0.0, 400.0, false), 0);
    }

    #[test]
    fn test_component_count_axonal_is_ten_times() {
        for (h, w) in [(100.0, 120.0), (250.0, 250.0), (37.0, 512.0)] {
            let somatic = estimate_component_count(h, w, false);
            let axonal = estimate_component_count(h, w, true);
            assert_eq!(axonal, 10 * somatic);
        }
    }

    #[test]
    fn test_component_count_monotonic_in_volume() {
        let mut last = 0;
        for side in (10..600).step_by(10) {
            let count = estimate_component_count(side as f64, side as f64, false);
            assert!(count >= last);
            last = count;
        }
        assert!(last > 0);
    }

    #[test]
    fn test_neuron_pixel_size() {
        // 1 um per pixel -> 15 px
        assert_eq!(estimate_neuron_pixel_size(256.0, 256), 15);
        // 30 um per pixel -> 0.5 rounds to 1 at worst
        assert_eq!(estimate_neuron_pixel_size(3000.0, 100), 1);
        assert_eq!(estimate_neuron_pixel_size(100.0, 0), 1);
    }

    #[test]
    fn test_margin() {
        assert_eq!(with_margin(160, 1.5), 240);
        assert_eq!(with_margin(3, 1.5), 5);
        assert_eq!(with_margin(0, 1.5), 0);
    }
}
