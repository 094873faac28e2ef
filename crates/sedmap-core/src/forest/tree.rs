//! CART regression tree with per-split feature subsampling.
//!
//! Array-based node storage; splits minimise the summed squared error of the
//! children (equivalently maximise Σ_child sum² / n). Features ≤ threshold go
//! left.
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::matrix::Matrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    /// Features tried at each split.
    pub mtry: usize,
    /// Nodes with at most this many rows become leaves.
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    /// Grow a tree on `rows` of `x` (duplicates allowed, e.g. a bootstrap).
    pub fn fit<R: Rng>(x: &Matrix, y: &[f64], rows: &[usize], params: &TreeParams, rng: &mut R) -> Self {
        let mut tree = Self { nodes: Vec::new(), n_features: x.n_cols() };
        let mut idx = rows.to_vec();
        if idx.is_empty() {
            tree.nodes.push(Node::Leaf { value: f64::NAN });
            return tree;
        }
        tree.grow(x, y, &mut idx, 0, params, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        x: &Matrix,
        y: &[f64],
        idx: &mut [usize],
        depth: usize,
        params: &TreeParams,
        rng: &mut R,
    ) -> usize {
        let n = idx.len();
        let sum: f64 = idx.iter().map(|&i| y[i]).sum();
        let mean = sum / n as f64;
        let spread = idx.iter().map(|&i| (y[i] - mean).abs()).fold(0f64, f64::max);

        let at_limit = n <= params.min_node_size.max(1)
            || params.max_depth.is_some_and(|d| depth >= d)
            || spread < 1e-12;
        let split = if at_limit { None } else { self.best_split(x, y, idx, sum, params, rng) };

        let Some(split) = split else {
            let id = self.nodes.len();
            self.nodes.push(Node::Leaf { value: mean });
            return id;
        };

        // partition rows in place: left block first
        let mut n_left = 0;
        for k in 0..n {
            if x.get(idx[k], split.feature) <= split.threshold {
                idx.swap(k, n_left);
                n_left += 1;
            }
        }

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });
        let (left_rows, right_rows) = idx.split_at_mut(n_left);
        let left = self.grow(x, y, left_rows, depth + 1, params, rng);
        let right = self.grow(x, y, right_rows, depth + 1, params, rng);
        self.nodes[id] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        id
    }

    fn best_split<R: Rng>(
        &self,
        x: &Matrix,
        y: &[f64],
        idx: &[usize],
        sum: f64,
        params: &TreeParams,
        rng: &mut R,
    ) -> Option<BestSplit> {
        let n = idx.len();
        let mtry = params.mtry.clamp(1, self.n_features);
        let parent_score = sum * sum / n as f64;
        let mut best: Option<BestSplit> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in index::sample(rng, self.n_features, mtry).into_iter() {
            pairs.clear();
            pairs.extend(idx.iter().map(|&i| (x.get(i, feature), y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0f64;
            for k in 0..n - 1 {
                left_sum += pairs[k].1;
                let (lo, hi) = (pairs[k].0, pairs[k + 1].0);
                if lo == hi {
                    continue;
                }
                let n_left = (k + 1) as f64;
                let n_right = (n - k - 1) as f64;
                let right_sum = sum - left_sum;
                let score = left_sum * left_sum / n_left + right_sum * right_sum / n_right;
                if score > parent_score + 1e-12 && best.as_ref().map_or(true, |b| score > b.score) {
                    let mid = 0.5 * (lo + hi);
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(BestSplit { feature, threshold, score });
                }
            }
        }
        best
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0usize;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Longest root-to-leaf path, in edges.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(mtry: usize) -> TreeParams {
        TreeParams { mtry, min_node_size: 1, max_depth: None }
    }

    #[test]
    fn step_function_is_learned_exactly() {
        let x = Matrix::from_columns(&[vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]]);
        let y = [1.0, 1.0, 1.0, 7.0, 7.0, 7.0];
        let rows: Vec<usize> = (0..6).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, &params(1), &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.predict(&[0.5]), 1.0);
        assert_eq!(tree.predict(&[4.5]), 7.0);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_nodes(), 3);
    }

    #[test]
    fn irrelevant_feature_is_not_chosen_when_all_are_tried() {
        let x = Matrix::from_columns(&[vec![5.0, 5.0, 5.0, 5.0], vec![0.0, 1.0, 2.0, 3.0]]);
        let y = [0.0, 0.0, 10.0, 10.0];
        let rows: Vec<usize> = (0..4).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, &params(2), &mut StdRng::seed_from_u64(3));
        assert_eq!(tree.predict(&[5.0, 0.2]), 0.0);
        assert_eq!(tree.predict(&[5.0, 2.8]), 10.0);
    }

    #[test]
    fn min_node_size_and_depth_limit_growth() {
        let x = Matrix::from_columns(&[(0..32).map(|v| v as f64).collect()]);
        let y: Vec<f64> = (0..32).map(|v| (v as f64).sin()).collect();
        let rows: Vec<usize> = (0..32).collect();
        let shallow = TreeParams { mtry: 1, min_node_size: 1, max_depth: Some(2) };
        let tree = RegressionTree::fit(&x, &y, &rows, &shallow, &mut StdRng::seed_from_u64(1));
        assert!(tree.depth() <= 2);
        let stump = TreeParams { mtry: 1, min_node_size: 64, max_depth: None };
        let tree = RegressionTree::fit(&x, &y, &rows, &stump, &mut StdRng::seed_from_u64(1));
        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn constant_response_gives_single_leaf() {
        let x = Matrix::from_columns(&[vec![0.0, 1.0, 2.0]]);
        let rows = [0, 1, 2];
        let tree = RegressionTree::fit(&x, &[4.0; 3], &rows, &params(1), &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict(&[100.0]), 4.0);
    }
}
