use serde::{Deserialize, Serialize};

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

/// Search accuracy of the precursor measurement
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f64, f64),
    Da(f64, f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Ppm(-10.0, 10.0)
    }
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in m/z) around a theoretical
    /// m/z for a given tolerance
    pub fn bounds(&self, center: f64) -> (f64, f64) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    /// Is the experimental m/z `rhs` within tolerance of the theoretical `center`?
    pub fn contains(&self, center: f64, rhs: f64) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }

    /// Deviation of the experimental m/z from the theoretical one, in ppm
    pub fn ppm_error(theoretical: f64, experimental: f64) -> f64 {
        if theoretical == 0.0 {
            return 0.0;
        }
        (experimental - theoretical) / theoretical * 1_000_000.0
    }
}

#[cfg(test)]
mod test {
    use super::Tolerance;

    #[test]
    fn ppm_window() {
        let tol = Tolerance::Ppm(-10.0, 10.0);
        let (lo, hi) = tol.bounds(1000.0);
        assert!((lo - 999.99).abs() < 1e-9);
        assert!((hi - 1000.01).abs() < 1e-9);
        assert!(tol.contains(1000.0, 1000.005));
        assert!(!tol.contains(1000.0, 1000.02));
    }

    #[test]
    fn dalton_window() {
        let tol = Tolerance::Da(-0.02, 0.05);
        assert!(tol.contains(500.0, 499.99));
        assert!(tol.contains(500.0, 500.05));
        assert!(!tol.contains(500.0, 499.97));
    }

    #[test]
    fn ppm_error_sign() {
        assert!((Tolerance::ppm_error(1000.0, 1000.001) - 1.0).abs() < 1e-6);
        assert!(Tolerance::ppm_error(1000.0, 999.999) < 0.0);
        assert_eq!(Tolerance::ppm_error(0.0, 10.0), 0.0);
    }

    #[test]
    fn deserialize_tolerance() {
        let tol: Tolerance = serde_json::from_str(r#"{"ppm": [-20, 20]}"#).unwrap();
        assert_eq!(tol, Tolerance::Ppm(-20.0, 20.0));
        let tol: Tolerance = serde_json::from_str(r#"{"da": [-0.5, 0.5]}"#).unwrap();
        assert_eq!(tol, Tolerance::Da(-0.5, 0.5));
    }
}
