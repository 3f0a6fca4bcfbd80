//! Market registry and great-circle distance
//!
//! Coordinates are decimal degrees (latitude north, longitude east);
//! distances are statute miles on a spherical Earth.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Mean Earth radius in statute miles
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

const DEG_TO_RAD: f64 = PI / 180.0;

/// A real-estate market with a representative coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub name: String,
    /// Two-letter state code
    pub state: String,
    pub lat: f64,
    pub lon: f64,
}

impl Market {
    pub fn new(name: impl Into<String>, state: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            lat,
            lon,
        }
    }

    /// True if `query` names this market, either `"Boulder"` or
    /// `"Boulder, CO"`, ignoring case and surrounding whitespace
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.eq_ignore_ascii_case(&self.name) {
            return true;
        }
        match query.rsplit_once(',') {
            Some((name, state)) => {
                name.trim().eq_ignore_ascii_case(&self.name)
                    && state.trim().eq_ignore_ascii_case(&self.state)
            }
            None => false,
        }
    }

    /// Great-circle distance to another market in miles
    pub fn distance_to(&self, other: &Market) -> f64 {
        haversine_miles((self.lat, self.lon), (other.lat, other.lon))
    }
}

/// Great-circle distance between two `(lat, lon)` points in miles
///
/// ```
/// use market_cache::warmer::haversine_miles;
///
/// let denver = (39.7392, -104.9903);
/// let boulder = (40.0150, -105.2705);
/// let d = haversine_miles(denver, boulder);
/// assert!(d > 20.0 && d < 30.0);
/// ```
pub fn haversine_miles(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0 * DEG_TO_RAD, from.1 * DEG_TO_RAD);
    let (lat2, lon2) = (to.0 * DEG_TO_RAD, to.1 * DEG_TO_RAD);

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Set of known markets
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    markets: Vec<Market>,
}

impl MarketRegistry {
    pub fn new(markets: Vec<Market>) -> Self {
        Self { markets }
    }

    /// Colorado, Utah and Idaho markets
    pub fn builtin() -> Self {
        let markets = [
            // Colorado
            ("Denver", "CO", 39.7392, -104.9903),
            ("Boulder", "CO", 40.0150, -105.2705),
            ("Aurora", "CO", 39.7294, -104.8319),
            ("Lakewood", "CO", 39.7047, -105.0814),
            ("Longmont", "CO", 40.1672, -105.1019),
            ("Castle Rock", "CO", 39.3722, -104.8561),
            ("Fort Collins", "CO", 40.5853, -105.0844),
            ("Loveland", "CO", 40.3978, -105.0750),
            ("Greeley", "CO", 40.4233, -104.7091),
            ("Colorado Springs", "CO", 38.8339, -104.8214),
            ("Pueblo", "CO", 38.2544, -104.6091),
            ("Grand Junction", "CO", 39.0639, -108.5506),
            // Utah
            ("Salt Lake City", "UT", 40.7608, -111.8910),
            ("West Valley City", "UT", 40.6916, -112.0011),
            ("Sandy", "UT", 40.5649, -111.8389),
            ("Park City", "UT", 40.6461, -111.4980),
            ("Ogden", "UT", 41.2230, -111.9738),
            ("Logan", "UT", 41.7370, -111.8338),
            ("Provo", "UT", 40.2338, -111.6585),
            ("Orem", "UT", 40.2969, -111.6946),
            ("St. George", "UT", 37.0965, -113.5684),
            // Idaho
            ("Boise", "ID", 43.6150, -116.2023),
            ("Meridian", "ID", 43.6121, -116.3915),
            ("Nampa", "ID", 43.5407, -116.5635),
            ("Twin Falls", "ID", 42.5630, -114.4609),
            ("Pocatello", "ID", 42.8713, -112.4455),
            ("Idaho Falls", "ID", 43.4917, -112.0339),
            ("Coeur d'Alene", "ID", 47.6777, -116.7805),
        ]
        .into_iter()
        .map(|(name, state, lat, lon)| Market::new(name, state, lat, lon))
        .collect();

        Self { markets }
    }

    pub fn find(&self, query: &str) -> Option<&Market> {
        self.markets.iter().find(|m| m.matches(query))
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Other markets within `radius_miles` of `center`, nearest first
    pub fn within(&self, center: &Market, radius_miles: f64) -> Vec<(Market, f64)> {
        let mut nearby: Vec<(Market, f64)> = self
            .markets
            .iter()
            .filter(|m| !(m.name.eq_ignore_ascii_case(&center.name) && m.state == center.state))
            .map(|m| (m.clone(), center.distance_to(m)))
            .filter(|(_, d)| *d <= radius_miles)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby
    }
}
