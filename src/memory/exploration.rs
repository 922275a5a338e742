//! 探索记忆（战争迷雾）
//!
//! 每个地点一份「已访问坐标」集合，只增不减；frontier 按需计算（Chebyshev 半径内未访问的格子），
//! 不保存任何增量状态，崩溃后从持久化集合即可完整恢复。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// 地点内的局部坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn chebyshev(&self, other: &Coord) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn manhattan(&self, other: &Coord) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// 地点声明的边界：合法坐标为 0..width × 0..height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapBounds {
    pub width: u32,
    pub height: u32,
}

impl MapBounds {
    pub fn contains(&self, c: &Coord) -> bool {
        c.x >= 0 && c.y >= 0 && (c.x as i64) < self.width as i64 && (c.y as i64) < self.height as i64
    }

    pub fn total_cells(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// 探索地图：location_id -> 已访问坐标集合
///
/// 序列化格式为 `{location_id: [coordinate, ...]}`；边界不持久化，由每回合的观测重新声明。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExplorationMap {
    visited: BTreeMap<String, BTreeSet<Coord>>,
    #[serde(skip)]
    bounds: HashMap<String, MapBounds>,
}

impl ExplorationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记已访问；返回 true 表示集合发生了变化，重复标记为 no-op
    pub fn mark_visited(&mut self, location: &str, coordinate: Coord) -> bool {
        let inserted = self
            .visited
            .entry(location.to_string())
            .or_default()
            .insert(coordinate);
        if inserted {
            tracing::debug!(location, %coordinate, "explored new tile");
        }
        inserted
    }

    pub fn is_visited(&self, location: &str, coordinate: &Coord) -> bool {
        self.visited
            .get(location)
            .is_some_and(|set| set.contains(coordinate))
    }

    /// 声明地点边界（未知时不做边界过滤，探索率也无定义）
    pub fn declare_bounds(&mut self, location: &str, bounds: MapBounds) {
        self.bounds.insert(location.to_string(), bounds);
    }

    pub fn bounds(&self, location: &str) -> Option<MapBounds> {
        self.bounds.get(location).copied()
    }

    /// 以 coordinate 为中心、Chebyshev 距离 radius 内所有未访问坐标（不含中心）；按曼哈顿距离由近到远排序
    pub fn frontier(&self, location: &str, coordinate: Coord, radius: u32) -> Vec<Coord> {
        let radius = radius as i32;
        let visited = self.visited.get(location);
        let bounds = self.bounds.get(location);

        let mut cells = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let c = Coord::new(coordinate.x + dx, coordinate.y + dy);
                if visited.is_some_and(|set| set.contains(&c)) {
                    continue;
                }
                if bounds.is_some_and(|b| !b.contains(&c)) {
                    continue;
                }
                cells.push(c);
            }
        }
        cells.sort_by_key(|c| (c.manhattan(&coordinate), c.y, c.x));
        cells
    }

    /// |visited| / |declared_total_cells|；边界未知时返回 None
    pub fn exploration_ratio(&self, location: &str) -> Option<f64> {
        let bounds = self.bounds.get(location)?;
        let total = bounds.total_cells();
        if total == 0 {
            return None;
        }
        let visited = self.visited_count(location) as f64;
        Some((visited / total as f64).min(1.0))
    }

    pub fn visited_count(&self, location: &str) -> usize {
        self.visited.get(location).map_or(0, |s| s.len())
    }

    pub fn visited(&self, location: &str) -> Vec<Coord> {
        self.visited
            .get(location)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn location_count(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn town() -> ExplorationMap {
        let mut map = ExplorationMap::new();
        map.mark_visited("town", Coord::new(0, 0));
        map.mark_visited("town", Coord::new(0, 1));
        map.mark_visited("town", Coord::new(1, 0));
        map
    }

    #[test]
    fn test_frontier_around_origin() {
        let map = town();
        let frontier = map.frontier("town", Coord::new(0, 0), 1);
        for c in [(1, 1), (-1, 0), (0, -1), (-1, -1), (-1, 1), (1, -1)] {
            assert!(frontier.contains(&Coord::new(c.0, c.1)), "missing {:?}", c);
        }
        assert!(!frontier.contains(&Coord::new(0, 1)));
        assert!(!frontier.contains(&Coord::new(1, 0)));
        assert!(!frontier.contains(&Coord::new(0, 0)));
        assert_eq!(frontier.len(), 6);
    }

    #[test]
    fn test_mark_visited_idempotent() {
        let mut once = ExplorationMap::new();
        assert!(once.mark_visited("cave", Coord::new(3, 4)));

        let mut twice = ExplorationMap::new();
        twice.mark_visited("cave", Coord::new(3, 4));
        assert!(!twice.mark_visited("cave", Coord::new(3, 4)));

        assert_eq!(once, twice);
        assert_eq!(twice.visited_count("cave"), 1);
    }

    #[test]
    fn test_frontier_respects_bounds() {
        let mut map = town();
        map.declare_bounds("town", MapBounds { width: 10, height: 10 });
        let frontier = map.frontier("town", Coord::new(0, 0), 1);
        assert_eq!(frontier, vec![Coord::new(1, 1)]);
    }

    #[test]
    fn test_frontier_sorted_nearest_first() {
        let map = ExplorationMap::new();
        let frontier = map.frontier("field", Coord::new(5, 5), 2);
        assert_eq!(frontier.len(), 24);
        assert_eq!(frontier[0], Coord::new(5, 4));
        let dists: Vec<i32> = frontier.iter().map(|c| c.manhattan(&Coord::new(5, 5))).collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exploration_ratio_unknown_without_bounds() {
        let map = town();
        assert_eq!(map.exploration_ratio("town"), None);
        assert_eq!(map.exploration_ratio("nowhere"), None);
    }

    #[test]
    fn test_exploration_ratio_monotonic() {
        let mut map = ExplorationMap::new();
        map.declare_bounds("route", MapBounds { width: 4, height: 4 });
        let mut last = map.exploration_ratio("route").unwrap();
        assert_eq!(last, 0.0);
        let path = [(0, 0), (0, 1), (0, 1), (1, 1), (2, 1), (1, 1), (3, 3)];
        for (x, y) in path {
            map.mark_visited("route", Coord::new(x, y));
            let ratio = map.exploration_ratio("route").unwrap();
            assert!(ratio >= last);
            last = ratio;
        }
        assert!((last - 5.0 / 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serializes_as_location_map() {
        let map = town();
        let json = serde_json::to_value(&map).unwrap();
        let cells = json.get("town").and_then(|v| v.as_array()).unwrap();
        assert_eq!(cells.len(), 3);
        let back: ExplorationMap = serde_json::from_value(json).unwrap();
        assert_eq!(back.visited("town"), map.visited("town"));
    }
}
