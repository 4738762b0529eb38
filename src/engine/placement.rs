// ==========================================
// 教学班分配引擎 - 座位分配器
// ==========================================
// 规则: 在有空位的教学班中选择 剩余座位最多 → 当前人数最少 → section_id 最小
// 约束: 选中后立即在内存中 +1,同一批次的下一个学生看到更新后的余量
// 约束: 内存增量按教学班累积,由写入方每批次提交一次（相对更新）
// ==========================================

use crate::domain::section::{SeatCapacity, Section};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

// ==========================================
// SeatSlot - 快照中的一个教学班
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSlot {
    pub section_id: i64,
    pub code: String,
    pub capacity: i32,
    pub occupancy: i32,
}

impl SeatCapacity for SeatSlot {
    fn capacity(&self) -> i32 {
        self.capacity
    }

    fn occupancy(&self) -> i32 {
        self.occupancy
    }
}

/// 从候选中选出一个教学班
///
/// # 返回
/// - Some(index): 选中的下标
/// - None: 所有教学班都已满
pub fn choose_slot<S>(slots: &[S], section_id_of: impl Fn(&S) -> i64) -> Option<usize>
where
    S: SeatCapacity,
{
    slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.has_room())
        .min_by_key(|(_, s)| (Reverse(s.remaining_seats()), s.occupancy(), section_id_of(s)))
        .map(|(i, _)| i)
}

// ==========================================
// OccupancySnapshot - 课程的占用快照
// ==========================================
#[derive(Debug, Clone)]
pub struct OccupancySnapshot {
    course_id: i64,
    slots: Vec<SeatSlot>,
    deltas: BTreeMap<i64, i32>, // section_id → 尚未提交的增量
}

impl OccupancySnapshot {
    /// 以缓存计数 enrolled_count 构造（仅 ACTIVE 教学班）
    pub fn from_sections(course_id: i64, sections: &[Section]) -> Self {
        Self::build(course_id, sections, |s| s.enrolled_count)
    }

    /// 以真实计数构造（修复操作使用）
    pub fn from_real_counts(course_id: i64, sections: &[Section], real: &HashMap<i64, i32>) -> Self {
        Self::build(course_id, sections, |s| {
            real.get(&s.section_id).copied().unwrap_or(0)
        })
    }

    fn build(course_id: i64, sections: &[Section], occupancy_of: impl Fn(&Section) -> i32) -> Self {
        let mut slots: Vec<SeatSlot> = sections
            .iter()
            .filter(|s| s.course_id == course_id && s.is_active())
            .map(|s| SeatSlot {
                section_id: s.section_id,
                code: s.code.clone(),
                capacity: s.capacity,
                occupancy: occupancy_of(s),
            })
            .collect();
        slots.sort_by_key(|s| s.section_id);

        Self {
            course_id,
            slots,
            deltas: BTreeMap::new(),
        }
    }

    pub fn course_id(&self) -> i64 {
        self.course_id
    }

    pub fn slots(&self) -> &[SeatSlot] {
        &self.slots
    }

    /// 是否还有任何空位
    pub fn has_room(&self) -> bool {
        self.slots.iter().any(|s| s.has_room())
    }

    pub fn occupancy_of(&self, section_id: i64) -> Option<i32> {
        self.slot(section_id).map(|s| s.occupancy)
    }

    /// 只选择,不占位
    pub fn pick(&self) -> Option<i64> {
        choose_slot(&self.slots, |s| s.section_id).map(|i| self.slots[i].section_id)
    }

    /// 选择并立即占位
    pub fn reserve(&mut self) -> Option<i64> {
        let section_id = self.pick()?;
        self.occupy(section_id);
        Some(section_id)
    }

    /// 占用一个座位
    pub fn occupy(&mut self, section_id: i64) {
        self.adjust(section_id, 1);
    }

    /// 释放一个座位（撤销占位或迁出）
    pub fn vacate(&mut self, section_id: i64) {
        self.adjust(section_id, -1);
    }

    fn adjust(&mut self, section_id: i64, delta: i32) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.section_id == section_id) {
            slot.occupancy += delta;
            let pending = self.deltas.entry(section_id).or_insert(0);
            *pending += delta;
            if *pending == 0 {
                self.deltas.remove(&section_id);
            }
        }
    }

    fn slot(&self, section_id: i64) -> Option<&SeatSlot> {
        self.slots.iter().find(|s| s.section_id == section_id)
    }

    /// 取出尚未提交的增量（按 section_id 升序,不含 0）
    pub fn take_deltas(&mut self) -> Vec<(i64, i32)> {
        std::mem::take(&mut self.deltas).into_iter().collect()
    }

    /// 全部教学班的剩余座位之和
    pub fn free_seats(&self) -> i32 {
        self.slots.iter().map(|s| s.remaining_seats()).sum()
    }

    /// 超出容量的教学班（按 section_id 升序）
    pub fn over_capacity(&self) -> Vec<(i64, i32)> {
        self.slots
            .iter()
            .filter(|s| s.is_over_capacity())
            .map(|s| (s.section_id, s.excess_seats()))
            .collect()
    }
}
