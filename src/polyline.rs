//! Encoded-polyline codec.
//!
//! Google-style variable-length encoding: each coordinate is the delta to
//! the previous one in fixed-point, zigzag-folded into 5-bit chunks with
//! continuation bit 0x20, offset by 63 into printable ASCII.
//! See: <https://developers.google.com/maps/documentation/utilities/polylinealgorithm>
//!
//! The wire order is (lat, lon); decoding flips pairs into the crate-wide
//! (lon, lat) convention. Precision is a parameter: the classic format uses
//! 5 decimal places, Valhalla route shapes use 6.

use crate::checkpoints::Coordinate;

/// Fixed-point scale of the classic polyline format (5 decimal places).
pub const PRECISION_E5: f64 = 1e5;
/// Fixed-point scale of Valhalla route shapes (6 decimal places).
pub const PRECISION_E6: f64 = 1e6;

/// Decodes an encoded polyline into (lon, lat) coordinates.
pub fn decode(encoded: &str, precision: f64) -> Vec<Coordinate> {
    let mut coords = Vec::new();
    let mut lat = 0i64;
    let mut lon = 0i64;
    let bytes = encoded.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let (lat_delta, consumed) = decode_value(&bytes[i..]);
        i += consumed;
        lat += lat_delta;

        if i >= bytes.len() {
            break;
        }

        let (lon_delta, consumed) = decode_value(&bytes[i..]);
        i += consumed;
        lon += lon_delta;

        coords.push(Coordinate::new(lon as f64 / precision, lat as f64 / precision));
    }

    coords
}

/// Decodes a single value, returning (value, bytes_consumed).
fn decode_value(bytes: &[u8]) -> (i64, usize) {
    let mut result = 0i64;
    let mut shift = 0;
    let mut consumed = 0;

    for &b in bytes {
        consumed += 1;
        let chunk = (b as i64) - 63;
        result |= (chunk & 0x1f) << shift;
        shift += 5;

        if chunk < 0x20 {
            break;
        }
    }

    // Unfold the sign (LSB carries it)
    if result & 1 != 0 {
        result = !(result >> 1);
    } else {
        result >>= 1;
    }

    (result, consumed)
}

/// Encodes (lon, lat) coordinates into a polyline string.
pub fn encode(coords: &[Coordinate], precision: f64) -> String {
    let mut result = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for coord in coords {
        let lat_fixed = (coord.lat * precision).round() as i64;
        let lon_fixed = (coord.lon * precision).round() as i64;

        encode_value(lat_fixed - prev_lat, &mut result);
        encode_value(lon_fixed - prev_lon, &mut result);

        prev_lat = lat_fixed;
        prev_lon = lon_fixed;
    }

    result
}

/// Encodes a single signed value using the polyline algorithm.
fn encode_value(value: i64, output: &mut String) {
    let mut encoded = if value < 0 { !(value << 1) } else { value << 1 };

    while encoded >= 0x20 {
        output.push(char::from_u32(((encoded & 0x1f) | 0x20) as u32 + 63).unwrap());
        encoded >>= 5;
    }
    output.push(char::from_u32(encoded as u32 + 63).unwrap());
}
