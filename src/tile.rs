/// geohash alphabet (no a, i, l, o)
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// precision 6 gives cells of roughly 1.2km x 0.6km
pub const DEFAULT_PRECISION: usize = 6;

/// returns the tile key for the given coordinates at the default precision
///
/// every point inside the same ~1.2km cell maps to the same key,
/// which is what lets the reverse geocoding cache share entries between nearby fixes
pub fn tile_key(lat: f64, lng: f64) -> String {
    tile_key_with_precision(lat, lng, DEFAULT_PRECISION)
}

/// standard geohash encoding: bits alternate between longitude and latitude,
/// starting with longitude, five bits per character
pub fn tile_key_with_precision(lat: f64, lng: f64, precision: usize) -> String {
    let mut lat_range = (-90.0, 90.0);
    let mut lng_range = (-180.0, 180.0);

    let mut key = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0;
    let mut ch = 0usize;

    while key.len() < precision {
        let (range, value) = if even {
            (&mut lng_range, lng)
        } else {
            (&mut lat_range, lat)
        };

        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            ch = (ch << 1) | 1;
            range.0 = mid;
        } else {
            ch <<= 1;
            range.1 = mid;
        }

        even = !even;
        bits += 1;

        if bits == 5 {
            key.push(BASE32[ch] as char);
            bits = 0;
            ch = 0;
        }
    }

    key
}
