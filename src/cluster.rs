// src/cluster.rs

//! 基于密度的空间聚类 (DBSCAN)。

use nalgebra::Point2;
use std::collections::VecDeque;

/// 噪声点的标签
pub const NOISE: i32 = -1;

/// 对二维点做 DBSCAN 聚类。
///
/// 邻域包含点自身：某点半径 `eps` 内（含边界）的点数不少于 `min_samples` 时为核心点。
/// 簇标签从 0 开始，按首个核心点出现的顺序分配。
///
/// # 参数
/// * `points` - 待聚类的点。
/// * `eps` - 邻域半径。
/// * `min_samples` - 核心点所需的最少邻居数。
///
/// # 返回值
/// 与 `points` 等长的标签向量，噪声为 [`NOISE`]。
pub fn dbscan(points: &[Point2<f64>], eps: f64, min_samples: usize) -> Vec<i32> {
    let n = points.len();
    let eps_sq = eps * eps;
    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| (points[i] - points[j]).norm_squared() <= eps_sq)
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbors.iter().map(|nb| nb.len() >= min_samples).collect();

    let mut labels = vec![NOISE; n];
    let mut next_label = 0;
    for start in 0..n {
        if labels[start] != NOISE || !is_core[start] {
            continue;
        }
        labels[start] = next_label;
        let mut queue = VecDeque::from([start]);
        while let Some(p) = queue.pop_front() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighbors[p] {
                if labels[q] == NOISE {
                    labels[q] = next_label;
                    queue.push_back(q);
                }
            }
        }
        next_label += 1;
    }
    labels
}

/// 成员最多的簇的标签，并列时取标签较小者；没有任何簇时返回 `None`
pub fn largest_cluster(labels: &[i32]) -> Option<i32> {
    let max_label = labels.iter().copied().max().filter(|&l| l >= 0)?;
    let mut counts = vec![0usize; max_label as usize + 1];
    for &l in labels.iter().filter(|&&l| l >= 0) {
        counts[l as usize] += 1;
    }
    let mut best = 0;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    Some(best as i32)
}
