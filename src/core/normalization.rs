use ndarray::Array2;

/// Affine rescaling of feature matrices between `[lb, ub]` and `[0, 1]`.
pub trait Normalization {
    fn to_unity(&mut self, lb: f64, ub: f64);
    fn from_unity(&mut self, lb: f64, ub: f64);
}

impl Normalization for Array2<f64> {
    fn to_unity(&mut self, lb: f64, ub: f64) {
        let range = ub - lb;

        // A degenerate range maps everything to 0.0
        if range.abs() < f64::EPSILON {
            self.fill(0.0);
        } else {
            self.mapv_inplace(|v| (v - lb) / range);
        }
    }

    fn from_unity(&mut self, lb: f64, ub: f64) {
        let range = ub - lb;

        if range.abs() < f64::EPSILON {
            self.fill(lb);
        } else {
            self.mapv_inplace(|v| v * range + lb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn pixel_range_maps_to_unit_interval() {
        let mut m = array![[0.0, 51.0], [255.0, 127.5]];
        m.to_unity(0.0, 255.0);
        assert_eq!(m, array![[0.0, 0.2], [1.0, 0.5]]);
        m.from_unity(0.0, 255.0);
        assert_eq!(m[[1, 0]], 255.0);
    }

    #[test]
    fn degenerate_range() {
        let mut m = array![[3.0, 4.0]];
        m.to_unity(1.0, 1.0);
        assert_eq!(m, array![[0.0, 0.0]]);
    }
}
