use chrono::Utc;
use rtree_rs::{RTree, Rect};

use super::{DomainCodes, RegionCodeMapping, RegionInfo};
use crate::tile::tile_key;

struct FallbackRegion {
    /// lower wins when boxes overlap
    priority: usize,
    administrative_code: &'static str,
    sido_name: &'static str,
    sgg_name: &'static str,
    sgg_code: u32,
}

// [min_lng, min_lat], [max_lng, max_lat]
static BOXES: &[([f64; 2], [f64; 2], FallbackRegion)] = &[
    (
        [127.02, 37.49],
        [127.13, 37.56],
        FallbackRegion {
            priority: 0,
            administrative_code: "1168000000",
            sido_name: "서울특별시",
            sgg_name: "강남구",
            sgg_code: 11680,
        },
    ),
    (
        [126.95, 37.47],
        [127.05, 37.52],
        FallbackRegion {
            priority: 1,
            administrative_code: "1165000000",
            sido_name: "서울특별시",
            sgg_name: "서초구",
            sgg_code: 11650,
        },
    ),
];

static DEFAULT_REGION: FallbackRegion = FallbackRegion {
    priority: usize::MAX,
    administrative_code: "1114000000",
    sido_name: "서울특별시",
    sgg_name: "중구",
    sgg_code: 11140,
};

/// Hardcoded nearest-region table used when reverse geocoding is unavailable.
pub struct FallbackRegions {
    tree: RTree<2, f64, usize>,
}

impl Default for FallbackRegions {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackRegions {
    pub fn new() -> Self {
        let mut tree = RTree::new();
        for (i, (min, max, _)) in BOXES.iter().enumerate() {
            tree.insert(Rect::new(*min, *max), i);
        }

        Self { tree }
    }

    /// always returns a region; 서울특별시 중구 when no box contains the point
    ///
    /// the result is marked degraded since it is only an approximation
    pub fn nearest(&self, lat: f64, lng: f64) -> RegionInfo {
        let region = self
            .tree
            .search(Rect::new_point([lng, lat]))
            .map(|item| &BOXES[*item.data].2)
            .min_by_key(|r| r.priority)
            .unwrap_or(&DEFAULT_REGION);

        RegionInfo {
            tile_key: tile_key(lat, lng),
            administrative_code: region.administrative_code.to_string(),
            sido_name: region.sido_name.to_string(),
            sgg_name: region.sgg_name.to_string(),
            dong_name: String::new(),
            address_name: format!("서울 {}", region.sgg_name),
            domain_codes: DomainCodes::from(RegionCodeMapping {
                kindergarten_sido_code: region.sgg_code / 1000,
                kindergarten_sgg_code: region.sgg_code,
                childcare_arcode: region.sgg_code.to_string(),
            }),
            degraded: true,
            cached_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gangnam_box() {
        let r = FallbackRegions::new().nearest(37.5172, 127.0473);
        assert_eq!(r.sgg_name, "강남구");
        assert_eq!(r.domain_codes.kindergarten.sgg_code, 11680);
        assert_eq!(r.domain_codes.childcare.arcode, "11680");
        assert!(r.degraded);
    }

    #[test]
    fn test_overlap_prefers_gangnam() {
        // inside both the gangnam and seocho boxes
        let r = FallbackRegions::new().nearest(37.50, 127.03);
        assert_eq!(r.sgg_name, "강남구");
    }

    #[test]
    fn test_seocho_box() {
        let r = FallbackRegions::new().nearest(37.48, 126.99);
        assert_eq!(r.sgg_name, "서초구");
        assert_eq!(r.administrative_code, "1165000000");
    }

    #[test]
    fn test_default_is_jung_gu() {
        // busan
        let r = FallbackRegions::new().nearest(35.1796, 129.0756);
        assert_eq!(r.sido_name, "서울특별시");
        assert_eq!(r.sgg_name, "중구");
        assert_eq!(r.domain_codes, DomainCodes::seoul_jung_gu());
        assert_eq!(r.tile_key, "wy7b1h");
    }
}
