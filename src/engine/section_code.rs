// ==========================================
// 教学班分配引擎 - 教学班编码生成
// ==========================================
// 规则: 双射 26 进制 (0→A, 25→Z, 26→AA, 27→AB, ...)
// 红线: 生成结果不得与已用编码（规范化后）重复
// ==========================================

use std::collections::HashSet;

pub use crate::domain::section::normalize_section_code as normalize_code;

/// 序号转编码
///
/// 每消费一位后 n = n / 26 - 1,没有“零”字母
pub fn index_to_code(index: usize) -> String {
    let mut n = index;
    let mut letters: Vec<u8> = Vec::new();
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// 从 start 开始查找第一个未被使用的编码
///
/// # 参数
/// - used: 已用编码（调用方保证已规范化）
/// - start: 起始序号
///
/// # 返回
/// (编码, 该编码的序号)
///
/// 说明：used 有限,因此一定终止,碰撞次数不超过 used.len()
pub fn next_available_code(used: &HashSet<String>, start: usize) -> (String, usize) {
    let mut index = start;
    loop {
        let code = index_to_code(index);
        if !used.contains(&code) {
            return (code, index);
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_code_boundaries() {
        assert_eq!(index_to_code(0), "A");
        assert_eq!(index_to_code(1), "B");
        assert_eq!(index_to_code(25), "Z");
        assert_eq!(index_to_code(26), "AA");
        assert_eq!(index_to_code(27), "AB");
        assert_eq!(index_to_code(51), "AZ");
        assert_eq!(index_to_code(52), "BA");
        assert_eq!(index_to_code(701), "ZZ");
        assert_eq!(index_to_code(702), "AAA");
    }

    #[test]
    fn test_codes_are_distinct_over_a_range() {
        let codes: HashSet<String> = (0..2_000).map(index_to_code).collect();
        assert_eq!(codes.len(), 2_000);
    }

    #[test]
    fn test_next_available_skips_used() {
        let used: HashSet<String> = ["A", "B", "D"].iter().map(|s| s.to_string()).collect();

        assert_eq!(next_available_code(&used, 0), ("C".to_string(), 2));
        assert_eq!(next_available_code(&used, 3), ("E".to_string(), 4));
        assert_eq!(next_available_code(&HashSet::new(), 26), ("AA".to_string(), 26));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab "), "AB");
    }
}
