//! 三维点云上的 k-d 树, 仅支持最近邻距离查询.

use crate::Point3;

/// 叶子节点最多容纳的点数.
const LEAF_SIZE: usize = 16;

#[derive(Copy, Clone, Debug)]
enum Node {
    /// `points[start..end]`.
    Leaf { start: usize, end: usize },

    /// 左子树各点在 `dim` 维上的坐标 `<= value`, 右子树 `>= value`.
    Split {
        dim: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

/// 静态三维 k-d 树. 建树时按跨度最大的维度在中位数处切分.
#[derive(Clone, Debug)]
pub struct KdTree {
    points: Vec<Point3>,
    nodes: Vec<Node>,
}

#[inline]
fn dist2(a: &Point3, b: &Point3) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// 跨度最大的维度.
fn widest_dim(points: &[Point3]) -> usize {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for p in points {
        for d in 0..3 {
            lo[d] = lo[d].min(p[d]);
            hi[d] = hi[d].max(p[d]);
        }
    }
    (0..3)
        .max_by(|&a, &b| (hi[a] - lo[a]).total_cmp(&(hi[b] - lo[b])))
        .unwrap_or(0)
}

impl KdTree {
    /// 建树. 会重排 `points`.
    pub fn new(mut points: Vec<Point3>) -> Self {
        let mut nodes = Vec::with_capacity(2 * points.len() / LEAF_SIZE + 1);
        if !points.is_empty() {
            let n = points.len();
            Self::build(&mut points, &mut nodes, 0, n);
        }
        Self { points, nodes }
    }

    fn build(points: &mut [Point3], nodes: &mut Vec<Node>, start: usize, end: usize) -> usize {
        let id = nodes.len();
        if end - start <= LEAF_SIZE {
            nodes.push(Node::Leaf { start, end });
            return id;
        }

        let dim = widest_dim(&points[start..end]);
        let mid = start + (end - start) / 2;
        points[start..end]
            .select_nth_unstable_by(mid - start, |a, b| a[dim].total_cmp(&b[dim]));
        let value = points[mid][dim];

        // 先占位, 子树建好后回填.
        nodes.push(Node::Leaf { start, end });
        let left = Self::build(points, nodes, start, mid);
        let right = Self::build(points, nodes, mid, end);
        nodes[id] = Node::Split {
            dim,
            value,
            left,
            right,
        };
        id
    }

    /// 点数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 是否为空树.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `q` 到树中最近点的欧氏距离. 空树返回 `None`.
    pub fn nearest(&self, q: &Point3) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut best = f64::INFINITY;
        self.search(0, q, &mut best);
        Some(best.sqrt())
    }

    fn search(&self, node: usize, q: &Point3, best: &mut f64) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for p in &self.points[start..end] {
                    *best = best.min(dist2(p, q));
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = q[dim] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.search(near, q, best);
                if diff * diff < *best {
                    self.search(far, q, best);
                }
            }
        }
    }
}
