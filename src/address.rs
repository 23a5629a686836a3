use std::sync::OnceLock;

use regex::Regex;

struct Patterns {
    parenthetical: Regex,
    unit: Regex,
    floor: Regex,
    whitespace: Regex,
    trailing: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();

    PATTERNS.get_or_init(|| Patterns {
        parenthetical: Regex::new(r"\([^)]*\)").expect("valid regex"),
        // "101동 1203호" and whatever comes after it
        unit: Regex::new(r"\d+동\s*\d+호.*$").expect("valid regex"),
        floor: Regex::new(r"\d+층.*$").expect("valid regex"),
        whitespace: Regex::new(r"\s+").expect("valid regex"),
        trailing: Regex::new(r"[,\s]+$").expect("valid regex"),
    })
}

/// canonical form of a free-text address, used only as a cache key
///
/// returns an empty string for empty input; callers must not cache or query with it
pub fn normalize_address(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let p = patterns();

    let s = p.parenthetical.replace_all(raw, "");
    let s = p.unit.replace(&s, "");
    let s = p.floor.replace(&s, "");
    let s = p.whitespace.replace_all(&s, " ");
    let s = p.trailing.replace(&s, "");

    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(normalize_address(""), "");
        assert_eq!(normalize_address("   \t "), "");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(
            normalize_address("서울특별시   강남구\t테헤란로  152"),
            "서울특별시 강남구 테헤란로 152"
        );
    }

    #[test]
    fn test_strips_parenthetical_notes() {
        assert_eq!(
            normalize_address("서울특별시 강남구 역삼로 180 (역삼동)"),
            "서울특별시 강남구 역삼로 180"
        );
    }

    #[test]
    fn test_strips_unit_and_floor() {
        assert_eq!(
            normalize_address("서울특별시 송파구 올림픽로 300 101동 1203호"),
            "서울특별시 송파구 올림픽로 300"
        );
        assert_eq!(
            normalize_address("서울특별시 마포구 월드컵로 10, 3층 어린이집"),
            "서울특별시 마포구 월드컵로 10"
        );
    }

    #[test]
    fn test_strips_trailing_commas() {
        assert_eq!(normalize_address("부산광역시 해운대구 ,, "), "부산광역시 해운대구");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "",
            "서울특별시 강남구 역삼로 180 (역삼동)",
            "서울  (중구)  세종대로 110 ,",
            "경기도 성남시 분당구 판교로 1 2층(상가), ",
            "가 (3층",
            "인천광역시 연수구 101동  202호 ,",
            "대전광역시 유성구 대학로 99",
        ];

        for input in inputs {
            let once = normalize_address(input);
            assert_eq!(normalize_address(&once), once, "input: {input:?}");
        }
    }
}
