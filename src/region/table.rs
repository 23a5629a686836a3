//! Static sido/sgg name ↔ administrative code table.
//!
//! The 5-digit sgg code doubles as the kindergarten registry's `sggCode`
//! and the childcare portal's `arcode`; the first two digits are the `sidoCode`.

use super::{RegionCode, RegionCodeMapping, RegionCodeMappingTable};

type Sgg = (&'static str, u32);

static REGIONS: &[(&str, u32, &[Sgg])] = &[
    (
        "서울특별시",
        11,
        &[
            ("종로구", 11110),
            ("중구", 11140),
            ("용산구", 11170),
            ("성동구", 11200),
            ("광진구", 11215),
            ("동대문구", 11230),
            ("중랑구", 11260),
            ("성북구", 11290),
            ("강북구", 11305),
            ("도봉구", 11320),
            ("노원구", 11350),
            ("은평구", 11380),
            ("서대문구", 11410),
            ("마포구", 11440),
            ("양천구", 11470),
            ("강서구", 11500),
            ("구로구", 11530),
            ("금천구", 11545),
            ("영등포구", 11560),
            ("동작구", 11590),
            ("관악구", 11620),
            ("서초구", 11650),
            ("강남구", 11680),
            ("송파구", 11710),
            ("강동구", 11740),
        ],
    ),
    (
        "부산광역시",
        26,
        &[
            ("중구", 26110),
            ("서구", 26140),
            ("동구", 26170),
            ("영도구", 26200),
            ("부산진구", 26230),
            ("동래구", 26260),
            ("남구", 26290),
            ("북구", 26320),
            ("해운대구", 26350),
            ("사하구", 26380),
            ("금정구", 26410),
            ("강서구", 26440),
            ("연제구", 26470),
            ("수영구", 26500),
            ("사상구", 26530),
            ("기장군", 26710),
        ],
    ),
    (
        "대구광역시",
        27,
        &[
            ("중구", 27110),
            ("동구", 27140),
            ("서구", 27170),
            ("남구", 27200),
            ("북구", 27230),
            ("수성구", 27260),
            ("달서구", 27290),
            ("달성군", 27710),
            ("군위군", 27720),
        ],
    ),
    (
        "인천광역시",
        28,
        &[
            ("중구", 28110),
            ("동구", 28140),
            ("미추홀구", 28177),
            ("연수구", 28185),
            ("남동구", 28200),
            ("부평구", 28237),
            ("계양구", 28245),
            ("서구", 28260),
            ("강화군", 28710),
            ("옹진군", 28720),
        ],
    ),
    (
        "광주광역시",
        29,
        &[
            ("동구", 29110),
            ("서구", 29140),
            ("남구", 29155),
            ("북구", 29170),
            ("광산구", 29200),
        ],
    ),
    (
        "대전광역시",
        30,
        &[
            ("동구", 30110),
            ("중구", 30140),
            ("서구", 30170),
            ("유성구", 30200),
            ("대덕구", 30230),
        ],
    ),
    (
        "울산광역시",
        31,
        &[
            ("중구", 31110),
            ("남구", 31140),
            ("동구", 31170),
            ("북구", 31200),
            ("울주군", 31710),
        ],
    ),
    ("세종특별자치시", 36, &[("세종특별자치시", 36110)]),
    (
        "경기도",
        41,
        &[
            ("수원시", 41110),
            ("수원시 장안구", 41111),
            ("수원시 권선구", 41113),
            ("수원시 팔달구", 41115),
            ("수원시 영통구", 41117),
            ("성남시", 41130),
            ("성남시 수정구", 41131),
            ("성남시 중원구", 41133),
            ("성남시 분당구", 41135),
            ("의정부시", 41150),
            ("안양시", 41170),
            ("안양시 만안구", 41171),
            ("안양시 동안구", 41173),
            ("부천시 원미구", 41192),
            ("부천시 소사구", 41194),
            ("부천시 오정구", 41196),
            ("광명시", 41210),
            ("평택시", 41220),
            ("동두천시", 41250),
            ("안산시 상록구", 41271),
            ("안산시 단원구", 41273),
            ("고양시 덕양구", 41281),
            ("고양시 일산동구", 41285),
            ("고양시 일산서구", 41287),
            ("과천시", 41290),
            ("구리시", 41310),
            ("남양주시", 41360),
            ("오산시", 41370),
            ("시흥시", 41390),
            ("군포시", 41410),
            ("의왕시", 41430),
            ("하남시", 41450),
            ("용인시 처인구", 41461),
            ("용인시 기흥구", 41463),
            ("용인시 수지구", 41465),
            ("파주시", 41480),
            ("이천시", 41500),
            ("안성시", 41550),
            ("김포시", 41570),
            ("화성시", 41590),
            ("광주시", 41610),
            ("양주시", 41630),
            ("포천시", 41650),
            ("여주시", 41670),
            ("연천군", 41800),
            ("가평군", 41820),
            ("양평군", 41830),
        ],
    ),
    (
        "제주특별자치도",
        50,
        &[("제주시", 50110), ("서귀포시", 50130)],
    ),
];

/// Region lookups backed by the compiled-in table.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegionTable;

impl RegionTable {
    /// query-by-name convenience: returns the canonical 5-digit code
    pub fn code_for(&self, sido_name: &str, sgg_name: &str) -> Option<RegionCode> {
        self.sgg_code(sido_name, sgg_name)
            .map(|(_, sgg)| RegionCode::from_sgg_code(sgg))
    }

    /// display names for a code, looked up by its sgg prefix
    pub fn names_for(&self, code: &RegionCode) -> Option<(&'static str, &'static str)> {
        let sgg: u32 = code.sgg_code().parse().ok()?;

        REGIONS.iter().find_map(|(sido_name, _, sggs)| {
            sggs.iter()
                .find(|(_, c)| *c == sgg)
                .map(|(sgg_name, _)| (*sido_name, *sgg_name))
        })
    }

    /// "서울특별시 강남구", or None for codes outside the table
    pub fn display_name(&self, code: &RegionCode) -> Option<String> {
        self.names_for(code)
            .map(|(sido, sgg)| format!("{sido} {sgg}"))
    }

    fn sgg_code(&self, sido_name: &str, sgg_name: &str) -> Option<(u32, u32)> {
        let (_, sido, sggs) = REGIONS
            .iter()
            .find(|(name, _, _)| *name == sido_name.trim())?;

        sggs.iter()
            .find(|(name, _)| *name == sgg_name.trim())
            .map(|(_, sgg)| (*sido, *sgg))
    }
}

impl RegionCodeMappingTable for RegionTable {
    fn lookup(&self, sido_name: &str, sgg_name: &str) -> Option<RegionCodeMapping> {
        self.sgg_code(sido_name, sgg_name)
            .map(|(sido, sgg)| RegionCodeMapping {
                kindergarten_sido_code: sido,
                kindergarten_sgg_code: sgg,
                childcare_arcode: sgg.to_string(),
            })
    }
}
