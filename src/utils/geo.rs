//! Geospatial helpers: haversine distance and the coarse grid used to
//! bucket open clusters for candidate lookup.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True if the coordinates are finite and inside the valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Round coordinates to 4 decimal places (~11 m) for identity hashing.
    pub fn rounded(&self) -> (f64, f64) {
        ((self.lat * 1e4).round() / 1e4, (self.lng * 1e4).round() / 1e4)
    }
}

/// Great-circle distance between two locations in kilometres.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Index of one coarse grid cell. Rows span at least the configured
/// spatial threshold in latitude. Columns share the same degree width
/// and wrap at the antimeridian; because a longitude degree shrinks by
/// cos(lat) away from the equator, the candidate search widens its
/// column radius with latitude (see [`x_search_radius`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
}

impl GridCell {
    /// Compute the cell containing `loc` for the given cell edge in km.
    pub fn containing(loc: Location, cell_km: f64) -> Self {
        let cell_deg = cell_km / KM_PER_DEGREE;
        let columns = columns_for(cell_deg);
        Self {
            x: (((loc.lng + 180.0) / cell_deg).floor() as i64).rem_euclid(columns) as i32,
            y: (loc.lat / cell_deg).floor() as i32,
        }
    }

    /// Cells within `x_radius` columns and one row of this cell, with
    /// columns wrapping across the antimeridian.
    pub fn neighborhood(&self, cell_km: f64, x_radius: i32) -> Vec<GridCell> {
        let cell_deg = cell_km / KM_PER_DEGREE;
        let columns = columns_for(cell_deg);
        let span = (2 * i64::from(x_radius) + 1).min(columns);
        let mut cells = Vec::with_capacity(span as usize * 3);
        for dy in -1..=1 {
            for i in 0..span {
                let dx = i - span / 2;
                let x = (i64::from(self.x) + dx).rem_euclid(columns) as i32;
                cells.push(GridCell { x, y: self.y + dy });
            }
        }
        cells
    }
}

/// Number of grid columns covering the full longitude circle.
fn columns_for(cell_deg: f64) -> i64 {
    ((360.0 / cell_deg).ceil() as i64).max(1)
}

/// Columns to search on each side of a cell so the window covers at
/// least `cell_km` of east-west ground distance at latitude `lat`.
/// Evaluated at the poleward edge of the searched rows; near the poles
/// the window is capped at the full circle of latitude.
pub fn x_search_radius(lat: f64, cell_km: f64) -> i32 {
    let cell_deg = cell_km / KM_PER_DEGREE;
    let edge = (lat.abs() + cell_deg).min(89.9);
    let shrink = edge.to_radians().cos().max(1e-6);
    // One extra column absorbs the narrower seam cell at the
    // antimeridian, where 360 degrees rarely divides evenly.
    let needed = (1.0 / shrink).ceil() as i64 + 1;
    needed.min(columns_for(cell_deg) / 2 + 1) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Nairobi to Mombasa, roughly 440 km
        let nairobi = Location::new(-1.2921, 36.8219);
        let mombasa = Location::new(-4.0435, 39.6682);
        let d = haversine_km(nairobi, mombasa);
        assert!((d - 440.0).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = Location::new(0.0512, 40.3129);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn nearby_points_share_neighborhood() {
        // ~800 m apart, must land in the same cell or adjacent cells at 50 km
        let a = GridCell::containing(Location::new(0.0512, 40.3129), 50.0);
        let b = GridCell::containing(Location::new(0.0520, 40.3135), 50.0);
        assert!(a.neighborhood(50.0, x_search_radius(0.0512, 50.0)).contains(&b));
    }

    #[test]
    fn distant_points_do_not_share_neighborhood() {
        let a = GridCell::containing(Location::new(0.0, 40.0), 50.0);
        let b = GridCell::containing(Location::new(10.0, 40.0), 50.0);
        assert!(!a.neighborhood(50.0, x_search_radius(0.0, 50.0)).contains(&b));
    }

    #[test]
    fn high_latitude_east_west_points_stay_within_the_search_radius() {
        // 45 km apart east-west at 60N. Longitude degrees are half
        // width there, so the points sit two columns apart and a fixed
        // one-column radius would miss them.
        let a = Location::new(60.0, 25.0);
        let b = Location::new(60.0, 25.8084);
        assert!(haversine_km(a, b) < 50.0);
        let ca = GridCell::containing(a, 50.0);
        let cb = GridCell::containing(b, 50.0);
        assert!((ca.x - cb.x).abs() >= 2);
        assert!(ca.neighborhood(50.0, x_search_radius(60.0, 50.0)).contains(&cb));
    }

    #[test]
    fn columns_wrap_across_the_antimeridian() {
        let a = GridCell::containing(Location::new(0.0, 179.95), 50.0);
        let b = GridCell::containing(Location::new(0.0, -179.95), 50.0);
        assert_ne!(a, b);
        assert!(a.neighborhood(50.0, x_search_radius(0.0, 50.0)).contains(&b));
        assert!(b.neighborhood(50.0, x_search_radius(0.0, 50.0)).contains(&a));
    }

    #[test]
    fn polar_radius_is_capped_at_the_full_circle() {
        let radius = x_search_radius(89.95, 50.0);
        let cell = GridCell::containing(Location::new(89.95, 0.0), 50.0);
        // The searched window never repeats a column.
        let cells = cell.neighborhood(50.0, radius);
        let row: Vec<i32> = cells.iter().filter(|c| c.y == cell.y).map(|c| c.x).collect();
        let mut deduped = row.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(row.len(), deduped.len());
    }

    #[test]
    fn location_validation() {
        assert!(Location::new(0.0, 0.0).is_valid());
        assert!(!Location::new(91.0, 0.0).is_valid());
        assert!(!Location::new(0.0, 181.0).is_valid());
        assert!(!Location::new(f64::NAN, 0.0).is_valid());
    }
}
