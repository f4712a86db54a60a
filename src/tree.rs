use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per node; `None` considers all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary tree grown by squared-error reduction. On 0/1 targets this picks the
/// same splits as Gini impurity. The caller supplies the leaf rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

#[derive(Debug, Clone)]
pub struct TreeFit {
    pub tree: RegressionTree,
    /// Unnormalized squared-error decrease per feature.
    pub importances: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a> {
    x: &'a [Vec<f64>],
    target: &'a [f64],
    params: TreeParams,
    leaf_value: &'a dyn Fn(&[usize]) -> f64,
    n_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl RegressionTree {
    /// Grows a tree over `indices` (duplicates allowed, e.g. a bootstrap draw).
    /// `leaf_value` maps the rows reaching a leaf to that leaf's output.
    pub fn fit<R: Rng + ?Sized>(
        x: &[Vec<f64>],
        target: &[f64],
        indices: &mut [usize],
        params: TreeParams,
        leaf_value: &dyn Fn(&[usize]) -> f64,
        rng: &mut R,
    ) -> TreeFit {
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut grower = Grower {
            x,
            target,
            params,
            leaf_value,
            n_features,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        grower.grow(indices, 0, rng);
        TreeFit {
            tree: RegressionTree {
                nodes: grower.nodes,
                n_features,
            },
            importances: grower.importances,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Grower<'_> {
    fn grow<R: Rng + ?Sized>(&mut self, indices: &mut [usize], depth: usize, rng: &mut R) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });

        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let splittable = depth < self.params.max_depth
            && n >= self.params.min_samples_split.max(2)
            && n >= 2 * min_leaf;

        if splittable && let Some(best) = self.best_split(indices, rng) {
            let x = self.x;
            let mid = partition(indices, |i| x[i][best.feature] <= best.threshold);
            if mid > 0 && mid < n {
                self.importances[best.feature] += best.gain;
                let (left_rows, right_rows) = indices.split_at_mut(mid);
                let left = self.grow(left_rows, depth + 1, rng);
                let right = self.grow(right_rows, depth + 1, rng);
                self.nodes[id] = Node::Split {
                    feature: best.feature,
                    threshold: best.threshold,
                    left,
                    right,
                };
                return id;
            }
        }

        self.nodes[id] = Node::Leaf {
            value: (self.leaf_value)(indices),
        };
        id
    }

    fn best_split<R: Rng + ?Sized>(&self, indices: &[usize], rng: &mut R) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let features = match self.params.max_features {
            Some(k) if k > 0 && k < self.n_features => index::sample(rng, self.n_features, k).into_vec(),
            _ => (0..self.n_features).collect(),
        };

        let total: f64 = indices.iter().map(|&i| self.target[i]).sum();
        let parent = total * total / n as f64;

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);
        for feature in features {
            pairs.clear();
            pairs.extend(indices.iter().map(|&i| (self.x[i][feature], self.target[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0_f64;
            for k in 1..n {
                left_sum += pairs[k - 1].1;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let (lo, hi) = (pairs[k - 1].0, pairs[k].0);
                if lo >= hi {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
                let gain = score - parent;
                if gain <= MIN_SPLIT_GAIN {
                    continue;
                }
                if best.is_none_or(|b| gain > b.gain + MIN_SPLIT_GAIN) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn partition(indices: &mut [usize], mut goes_left: impl FnMut(usize) -> bool) -> usize {
    let mut mid = 0usize;
    for j in 0..indices.len() {
        if goes_left(indices[j]) {
            indices.swap(mid, j);
            mid += 1;
        }
    }
    mid
}

/// Mean of `target` over `indices`; 0 for an empty slice.
pub fn mean_of(target: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| target[i]).sum::<f64>() / indices.len() as f64
}

/// Scales importances to sum to one (all zeros stay zero).
pub fn normalize_importances(raw: &mut [f64]) {
    let total: f64 = raw.iter().sum();
    if total > 0.0 && total.is_finite() {
        for v in raw.iter_mut() {
            *v /= total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params(depth: usize) -> TreeParams {
        TreeParams {
            max_depth: depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn separable_feature_is_split_exactly() {
        let x = (0..20).map(|i| vec![i as f64, 0.0]).collect::<Vec<_>>();
        let y = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect::<Vec<_>>();
        let mut idx = (0..20).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(1);
        let leaf = |rows: &[usize]| mean_of(&y, rows);
        let fit = RegressionTree::fit(&x, &y, &mut idx, params(3), &leaf, &mut rng);

        assert_eq!(fit.tree.predict(&[2.0, 0.0]), 0.0);
        assert_eq!(fit.tree.predict(&[15.0, 0.0]), 1.0);
        assert_eq!(fit.tree.depth(), 1);
        assert!(fit.importances[0] > 0.0);
        assert_eq!(fit.importances[1], 0.0);
    }

    #[test]
    fn depth_zero_is_a_single_leaf() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0.0, 1.0, 1.0, 0.0];
        let mut idx = vec![0, 1, 2, 3];
        let mut rng = StdRng::seed_from_u64(7);
        let leaf = |rows: &[usize]| mean_of(&y, rows);
        let fit = RegressionTree::fit(&x, &y, &mut idx, params(0), &leaf, &mut rng);
        assert_eq!(fit.tree.node_count(), 1);
        assert!((fit.tree.predict(&[9.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn min_leaf_blocks_tiny_children() {
        let x = (0..6).map(|i| vec![i as f64]).collect::<Vec<_>>();
        let y = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let mut idx = (0..6).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(3);
        let leaf = |rows: &[usize]| mean_of(&y, rows);
        let p = TreeParams {
            min_samples_leaf: 3,
            ..params(4)
        };
        let fit = RegressionTree::fit(&x, &y, &mut idx, p, &leaf, &mut rng);
        assert!((fit.tree.predict(&[0.0]) - 1.0 / 3.0).abs() < 1e-12);
    }
}
