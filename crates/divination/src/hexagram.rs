//! Number-casting of a hexagram and its changing line.
//!
//! Three numbers select the upper trigram (`a mod 8`), the lower trigram
//! (`b mod 8`) and the changing line (`c mod 6`). A remainder of zero counts as
//! the last position (8 or 6). Trigrams are numbered in Earlier-Heaven order:
//! 乾1 兑2 离3 震4 巽5 坎6 艮7 坤8.

use crate::types::{HexagramResult, LineIndex};

/// Trigram lines from bottom to top (`true` = solid), Earlier-Heaven order.
const TRIGRAM_LINES: [[bool; 3]; 8] = [
    [true, true, true],    // 乾
    [true, true, false],   // 兑
    [true, false, true],   // 离
    [true, false, false],  // 震
    [false, true, true],   // 巽
    [false, true, false],  // 坎
    [false, false, true],  // 艮
    [false, false, false], // 坤
];

/// `HEXAGRAM_NAMES[upper][lower]`, both indexed in Earlier-Heaven order.
const HEXAGRAM_NAMES: [[&str; 8]; 8] = [
    ["乾为天", "天泽履", "天火同人", "天雷无妄", "天风姤", "天水讼", "天山遁", "天地否"],
    ["泽天夬", "兑为泽", "泽火革", "泽雷随", "泽风大过", "泽水困", "泽山咸", "泽地萃"],
    ["火天大有", "火泽睽", "离为火", "火雷噬嗑", "火风鼎", "火水未济", "火山旅", "火地晋"],
    ["雷天大壮", "雷泽归妹", "雷火丰", "震为雷", "雷风恒", "雷水解", "雷山小过", "雷地豫"],
    ["风天小畜", "风泽中孚", "风火家人", "风雷益", "巽为风", "风水涣", "风山渐", "风地观"],
    ["水天需", "水泽节", "水火既济", "水雷屯", "水风井", "坎为水", "水山蹇", "水地比"],
    ["山天大畜", "山泽损", "山火贲", "山雷颐", "山风蛊", "山水蒙", "艮为山", "山地剥"],
    ["地天泰", "地泽临", "地火明夷", "地雷复", "地风升", "地水师", "地山谦", "坤为地"],
];

const POSITION_NAMES: [&str; 4] = ["二", "三", "四", "五"];

/// Casts a hexagram from three numbers.
///
/// Pure and total: every input triple yields a result.
///
/// ```
/// let result = divination::compute_hexagram(123, 456, 789);
/// assert_eq!(result.hexagram_name, "火地晋");
/// assert_eq!(result.line_text, "六三");
/// assert_eq!(result.line_index.get(), 3);
/// ```
pub fn compute_hexagram(a: u32, b: u32, c: u32) -> HexagramResult {
    let upper = trigram_index(a);
    let lower = trigram_index(b);
    let line = changing_line(c);

    let solid = if line.get() <= 3 {
        TRIGRAM_LINES[lower][usize::from(line.get() - 1)]
    } else {
        TRIGRAM_LINES[upper][usize::from(line.get() - 4)]
    };

    HexagramResult {
        hexagram_name: HEXAGRAM_NAMES[upper][lower].to_string(),
        line_text: line_designation(line, solid),
        line_index: line,
    }
}

/// Zero-based Earlier-Heaven index for a casting number.
fn trigram_index(n: u32) -> usize {
    // 1..=8 maps to 0..=7; a remainder of 0 is the eighth trigram.
    match n % 8 {
        0 => 7,
        r => (r - 1) as usize,
    }
}

fn changing_line(n: u32) -> LineIndex {
    let position = match n % 6 {
        0 => 6,
        r => r as u8,
    };
    // `position` is always in 1..=6 here.
    LineIndex::new(position).unwrap_or(LineIndex::MIN)
}

/// Canonical designation of a line: `初九`, `六二`, ..., `上六`.
fn line_designation(line: LineIndex, solid: bool) -> String {
    let polarity = if solid { "九" } else { "六" };
    match line.get() {
        1 => format!("初{polarity}"),
        6 => format!("上{polarity}"),
        n => format!("{polarity}{}", POSITION_NAMES[usize::from(n - 2)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_cast() {
        let result = compute_hexagram(123, 456, 789);
        assert_eq!(result.hexagram_name, "火地晋");
        assert_eq!(result.line_text, "六三");
        assert_eq!(result.line_index.get(), 3);
    }

    #[test]
    fn zero_remainders_take_the_last_position() {
        // 800 % 8 == 0 -> 坤 over 坤; 600 % 6 == 0 -> top line.
        let result = compute_hexagram(800, 800, 600);
        assert_eq!(result.hexagram_name, "坤为地");
        assert_eq!(result.line_text, "上六");
        assert_eq!(result.line_index.get(), 6);
    }

    #[test]
    fn line_polarity_comes_from_the_owning_trigram() {
        // 101 % 8 == 5 -> 巽 (upper), 105 % 8 == 1 -> 乾 (lower), 100 % 6 == 4.
        let result = compute_hexagram(101, 105, 100);
        assert_eq!(result.hexagram_name, "风天小畜");
        // Line 4 is the bottom line of 巽, which is broken.
        assert_eq!(result.line_text, "六四");

        // 105 % 6 == 3 -> third line, top of 乾, solid.
        let result = compute_hexagram(101, 105, 105);
        assert_eq!(result.line_text, "九三");

        // 103 % 6 == 1 -> first line, bottom of 乾, solid.
        assert_eq!(compute_hexagram(101, 105, 103).line_text, "初九");
    }

    #[test]
    fn casting_is_deterministic() {
        assert_eq!(compute_hexagram(321, 654, 987), compute_hexagram(321, 654, 987));
    }

    #[test]
    fn every_name_is_distinct() {
        let mut names: Vec<&str> = HEXAGRAM_NAMES.iter().flatten().copied().collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 64);
    }
}
