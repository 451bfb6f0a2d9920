use crate::error::BeamError;

/// Horizontal station layout of the array.
///
/// Offsets are in degrees of arc relative to the reference station, which is
/// always the first entry and sits at (0, 0). The slowness grid is in s/deg,
/// so steering phases come out dimensionless as `2*pi*f*(sx*rx + sy*ry)`.
#[derive(Debug, Clone)]
pub struct ArrayGeometry {
    rx: Vec<f64>,
    ry: Vec<f64>,
}

impl ArrayGeometry {
    pub fn from_offsets_deg(rx: Vec<f64>, ry: Vec<f64>) -> Result<Self, BeamError> {
        if rx.len() != ry.len() {
            return Err(BeamError::config(format!(
                "rx/ry offset lists differ in length: {} vs {}",
                rx.len(),
                ry.len()
            )));
        }
        if rx.len() < 2 {
            return Err(BeamError::config(
                "array needs at least 2 stations for beamforming",
            ));
        }
        if rx[0] != 0.0 || ry[0] != 0.0 {
            return Err(BeamError::config(
                "reference station must be first and sit at offset (0, 0)",
            ));
        }
        if rx.iter().chain(ry.iter()).any(|v| !v.is_finite()) {
            return Err(BeamError::config("station offsets must be finite"));
        }
        Ok(Self { rx, ry })
    }

    /// Build offsets from station latitude/longitude in degrees.
    ///
    /// The first station is the reference. East offsets are scaled by
    /// cos(reference latitude) so that rx and ry are both great-circle
    /// degrees, matching the s/deg slowness convention.
    pub fn from_latlon_deg(lat_deg: &[f64], lon_deg: &[f64]) -> Result<Self, BeamError> {
        if lat_deg.len() != lon_deg.len() {
            return Err(BeamError::config(format!(
                "latitude/longitude lists differ in length: {} vs {}",
                lat_deg.len(),
                lon_deg.len()
            )));
        }
        if lat_deg.is_empty() {
            return Err(BeamError::config("no stations supplied"));
        }
        let lat0 = lat_deg[0];
        let lon0 = lon_deg[0];
        let cos_lat0 = lat0.to_radians().cos();
        let rx: Vec<f64> = lon_deg.iter().map(|&lon| (lon - lon0) * cos_lat0).collect();
        let ry: Vec<f64> = lat_deg.iter().map(|&lat| lat - lat0).collect();
        Self::from_offsets_deg(rx, ry)
    }

    pub fn station_count(&self) -> usize {
        self.rx.len()
    }

    pub fn rx(&self) -> &[f64] {
        &self.rx
    }

    pub fn ry(&self) -> &[f64] {
        &self.ry
    }

    /// Largest inter-station offset magnitude, used for aperture reporting.
    pub fn aperture_deg(&self) -> f64 {
        let mut max_sq = 0.0f64;
        for i in 0..self.rx.len() {
            for j in (i + 1)..self.rx.len() {
                let dx = self.rx[i] - self.rx[j];
                let dy = self.ry[i] - self.ry[j];
                max_sq = max_sq.max(dx * dx + dy * dy);
            }
        }
        max_sq.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::ArrayGeometry;

    #[test]
    fn latlon_offsets_are_relative_to_first_station() {
        let lat = [10.0, 10.1, 9.9];
        let lon = [120.0, 120.2, 119.8];
        let geom = ArrayGeometry::from_latlon_deg(&lat, &lon).unwrap();
        assert_eq!(geom.station_count(), 3);
        assert_eq!(geom.rx()[0], 0.0);
        assert_eq!(geom.ry()[0], 0.0);
        let cos_lat0 = 10.0f64.to_radians().cos();
        assert!((geom.rx()[1] - 0.2 * cos_lat0).abs() < 1e-12);
        assert!((geom.ry()[2] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_single_station_and_shifted_reference() {
        assert!(ArrayGeometry::from_offsets_deg(vec![0.0], vec![0.0]).is_err());
        assert!(ArrayGeometry::from_offsets_deg(vec![0.1, 0.2], vec![0.0, 0.1]).is_err());
    }

    #[test]
    fn aperture_spans_widest_pair() {
        let geom =
            ArrayGeometry::from_offsets_deg(vec![0.0, 0.3, -0.3], vec![0.0, 0.0, 0.0]).unwrap();
        assert!((geom.aperture_deg() - 0.6).abs() < 1e-12);
    }
}
