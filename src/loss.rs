use std::cmp::Reverse;
use std::collections::BinaryHeap;

use anyhow::{ensure, Result};
use ordered_float::OrderedFloat;

use crate::matrix::Matrix;
use crate::model::State;
use crate::rng::Rng;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: f32 = 8.0;
const LOG_TABLE_SIZE: usize = 512;
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// (log-probability, target id) pairs, best first.
pub type Predictions = Vec<(f32, i32)>;

fn std_log(x: f32) -> f32 {
    (x + 1e-5).ln()
}

/// Size-capped min-heap over (score, id). Always retains the k best items
/// seen so far, evicting the worst on overflow. Equal scores evict the
/// higher id first, so earlier-discovered targets win ties deterministically.
struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<i32>)>>,
}

impl TopK {
    fn new(k: usize) -> TopK {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn full(&self) -> bool {
        self.heap.len() >= self.k
    }

    fn worst_score(&self) -> f32 {
        match self.heap.peek() {
            Some(Reverse((score, _))) => score.0,
            None => f32::NEG_INFINITY,
        }
    }

    fn push(&mut self, score: f32, id: i32) {
        self.heap.push(Reverse((OrderedFloat(score), Reverse(id))));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    fn into_predictions(self) -> Predictions {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse((score, Reverse(id)))| (score.0, id))
            .collect()
    }
}

struct Node {
    parent: i32,
    left: i32,
    right: i32,
    count: i64,
    binary: bool,
}

enum LossKind {
    Softmax,
    OneVsAll,
    NegativeSampling {
        neg: i32,
        negatives: Vec<i32>,
    },
    HierarchicalSoftmax {
        paths: Vec<Vec<i32>>,
        codes: Vec<Vec<bool>>,
        tree: Vec<Node>,
        osz: usize,
    },
}

/// A loss function plus the piecewise lookup tables every variant shares.
///
/// Probabilities go through 512-entry sigmoid/log approximations clamped
/// outside their domain; a deliberate speed/accuracy tradeoff.
pub struct Loss {
    t_sigmoid: Vec<f32>,
    t_log: Vec<f32>,
    kind: LossKind,
}

/// Huffman-style merge over target frequency counts (descending order is
/// assumed, which is how the dictionary hands them out). Leaves are targets;
/// each leaf's path to the root and its binary code are precomputed.
fn build_tree(counts: &[i64]) -> (Vec<Vec<i32>>, Vec<Vec<bool>>, Vec<Node>) {
    let osz = counts.len();
    let mut tree: Vec<Node> = (0..2 * osz - 1)
        .map(|_| Node {
            parent: -1,
            left: -1,
            right: -1,
            count: 1_000_000_000_000_000,
            binary: false,
        })
        .collect();
    for i in 0..osz {
        tree[i].count = counts[i];
    }

    let mut leaf = osz as i64 - 1;
    let mut node = osz;
    for i in osz..2 * osz - 1 {
        let mut mini = [0usize; 2];
        for m in mini.iter_mut() {
            if leaf >= 0 && tree[leaf as usize].count < tree[node].count {
                *m = leaf as usize;
                leaf -= 1;
            } else {
                *m = node;
                node += 1;
            }
        }
        tree[i].left = mini[0] as i32;
        tree[i].right = mini[1] as i32;
        tree[i].count = tree[mini[0]].count + tree[mini[1]].count;
        tree[mini[0]].parent = i as i32;
        tree[mini[1]].parent = i as i32;
        tree[mini[1]].binary = true;
    }

    let mut paths = Vec::with_capacity(osz);
    let mut codes = Vec::with_capacity(osz);
    for i in 0..osz {
        let mut path = Vec::new();
        let mut code = Vec::new();
        let mut j = i;
        while tree[j].parent != -1 {
            path.push(tree[j].parent - osz as i32);
            code.push(tree[j].binary);
            j = tree[j].parent as usize;
        }
        paths.push(path);
        codes.push(code);
    }
    (paths, codes, tree)
}

/// Bounded depth-first search over the tree, pruning subtrees whose
/// accumulated log-score cannot beat the threshold or the current k-th
/// best. One mutable bounded heap is threaded through the recursion.
fn dfs(
    wo: &Matrix,
    tree: &[Node],
    osz: usize,
    k: usize,
    threshold: f32,
    node: i32,
    score: f32,
    heap: &mut TopK,
    hidden: &[f32],
) -> Result<()> {
    if score < std_log(threshold) {
        return Ok(());
    }
    if heap.full() && score < heap.worst_score() {
        return Ok(());
    }

    let n = &tree[node as usize];
    if n.left == -1 && n.right == -1 {
        heap.push(score, node);
        return Ok(());
    }

    let f = wo.dot_row(hidden, node as usize - osz)?;
    let f = 1.0 / (1.0 + (-f).exp());

    dfs(wo, tree, osz, k, threshold, n.left, score + std_log(1.0 - f), heap, hidden)?;
    dfs(wo, tree, osz, k, threshold, n.right, score + std_log(f), heap, hidden)
}

impl Loss {
    fn with_kind(kind: LossKind) -> Loss {
        let t_sigmoid = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as f32 - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect();
        let t_log = (0..=LOG_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 + 1e-5) / LOG_TABLE_SIZE as f32;
                x.ln()
            })
            .collect();
        Loss {
            t_sigmoid,
            t_log,
            kind,
        }
    }

    pub fn softmax() -> Loss {
        Loss::with_kind(LossKind::Softmax)
    }

    pub fn one_vs_all() -> Loss {
        Loss::with_kind(LossKind::OneVsAll)
    }

    /// Builds the frequency^0.5-weighted sampling table once from the
    /// target counts.
    pub fn negative_sampling(neg: i32, target_counts: &[i64]) -> Loss {
        let z: f32 = target_counts.iter().map(|&c| (c as f32).sqrt()).sum();
        let mut negatives = Vec::with_capacity(NEGATIVE_TABLE_SIZE);
        for (i, &count) in target_counts.iter().enumerate() {
            let c = (count as f32).sqrt();
            let n = (c * NEGATIVE_TABLE_SIZE as f32 / z).ceil() as usize;
            for _ in 0..n {
                negatives.push(i as i32);
            }
        }
        Loss::with_kind(LossKind::NegativeSampling { neg, negatives })
    }

    pub fn hierarchical_softmax(target_counts: &[i64]) -> Loss {
        let (paths, codes, tree) = build_tree(target_counts);
        Loss::with_kind(LossKind::HierarchicalSoftmax {
            paths,
            codes,
            tree,
            osz: target_counts.len(),
        })
    }

    fn log(&self, x: f32) -> f32 {
        if x > 1.0 {
            return 0.0;
        }
        self.t_log[(x * LOG_TABLE_SIZE as f32) as usize]
    }

    fn sigmoid(&self, x: f32) -> f32 {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32 / MAX_SIGMOID / 2.0) as usize;
            self.t_sigmoid[i]
        }
    }

    /// Shared binary-logistic core: score one output row against the hidden
    /// vector and, when training, fold `lr * (label - score)` into both the
    /// gradient buffer and the row itself.
    fn binary_logistic(
        &self,
        wo: &Matrix,
        target: i32,
        state: &mut State,
        label_is_positive: bool,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        let score = self.sigmoid(wo.dot_row(state.hidden.as_slice(), target as usize)?);

        if backprop {
            let alpha = lr * (label_is_positive as i32 as f32 - score);
            state.grad.add_row_scaled(wo, target as usize, alpha);
            wo.add_vector_to_row(state.hidden.as_slice(), target as usize, alpha)?;
        }

        if label_is_positive {
            Ok(-self.log(score))
        } else {
            Ok(-self.log(1.0 - score))
        }
    }

    /// One forward (and optionally backward) pass. Returns the example loss.
    pub fn forward(
        &self,
        wo: &Matrix,
        targets: &[i32],
        target_index: i32,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        match &self.kind {
            LossKind::Softmax => {
                ensure!(
                    target_index >= 0 && (target_index as usize) < targets.len(),
                    "target index {target_index} out of range"
                );
                self.compute_output(wo, state)?;
                let target = targets[target_index as usize];
                if backprop {
                    let osz = wo.rows();
                    for i in 0..osz {
                        let label = if i as i32 == target { 1.0 } else { 0.0 };
                        let alpha = lr * (label - state.output.get(i));
                        state.grad.add_row_scaled(wo, i, alpha);
                        wo.add_vector_to_row(state.hidden.as_slice(), i, alpha)?;
                    }
                }
                Ok(-self.log(state.output.get(target as usize)))
            }
            LossKind::OneVsAll => {
                let mut loss = 0.0;
                for i in 0..wo.rows() as i32 {
                    let is_match = targets.contains(&i);
                    loss += self.binary_logistic(wo, i, state, is_match, lr, backprop)?;
                }
                Ok(loss)
            }
            LossKind::NegativeSampling { neg, negatives } => {
                ensure!(
                    target_index >= 0 && (target_index as usize) < targets.len(),
                    "target index {target_index} out of range"
                );
                let target = targets[target_index as usize];
                let mut loss = self.binary_logistic(wo, target, state, true, lr, backprop)?;
                for _ in 0..*neg {
                    let negative = get_negative(negatives, target, &mut state.rng);
                    loss += self.binary_logistic(wo, negative, state, false, lr, backprop)?;
                }
                Ok(loss)
            }
            LossKind::HierarchicalSoftmax { paths, codes, .. } => {
                ensure!(
                    target_index >= 0 && (target_index as usize) < targets.len(),
                    "target index {target_index} out of range"
                );
                let target = targets[target_index as usize] as usize;
                let mut loss = 0.0;
                for (node, &code) in paths[target].iter().zip(codes[target].iter()) {
                    loss += self.binary_logistic(wo, *node, state, code, lr, backprop)?;
                }
                Ok(loss)
            }
        }
    }

    /// Fills `state.output` with the model's output distribution: softmax
    /// probabilities, or per-row sigmoid scores for the binary-logistic
    /// variants.
    pub fn compute_output(&self, wo: &Matrix, state: &mut State) -> Result<()> {
        state.output.mul_matrix_vec(wo, &state.hidden)?;
        match self.kind {
            LossKind::Softmax => {
                let out = state.output.as_mut_slice();
                let mut max = out[0];
                for &x in out.iter() {
                    max = max.max(x);
                }
                let mut z = 0.0;
                for x in out.iter_mut() {
                    *x = (*x - max).exp();
                    z += *x;
                }
                for x in out.iter_mut() {
                    *x /= z;
                }
            }
            _ => {
                for i in 0..state.output.size() {
                    let s = self.sigmoid(state.output.get(i));
                    state.output.set(i, s);
                }
            }
        }
        Ok(())
    }

    /// Top-k targets scoring at least `threshold`, best first.
    pub fn predict(
        &self,
        wo: &Matrix,
        k: usize,
        threshold: f32,
        heap: &mut Predictions,
        state: &mut State,
    ) -> Result<()> {
        let mut topk = TopK::new(k);
        match &self.kind {
            LossKind::HierarchicalSoftmax { tree, osz, .. } => {
                dfs(
                    wo,
                    tree,
                    *osz,
                    k,
                    threshold,
                    2 * *osz as i32 - 2,
                    0.0,
                    &mut topk,
                    state.hidden.as_slice(),
                )?;
            }
            _ => {
                self.compute_output(wo, state)?;
                find_k_best(threshold, &mut topk, state.output.as_slice());
            }
        }
        *heap = topk.into_predictions();
        Ok(())
    }

}

fn find_k_best(threshold: f32, heap: &mut TopK, output: &[f32]) {
    for (i, &p) in output.iter().enumerate() {
        if p < threshold {
            continue;
        }
        if heap.full() && std_log(p) < heap.worst_score() {
            continue;
        }
        heap.push(std_log(p), i as i32);
    }
}

fn get_negative(negatives: &[i32], target: i32, rng: &mut Rng) -> i32 {
    loop {
        let negative = negatives[rng.below(negatives.len())];
        if negative != target {
            return negative;
        }
    }
}
