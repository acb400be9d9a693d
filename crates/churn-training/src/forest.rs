//! Random-forest classifier (CART trees, Gini impurity, bootstrap aggregation).
//!
//! Trees are stored as flat node arenas so a fitted forest serializes to plain
//! JSON. Leaf distributions are aligned with [`RandomForest::classes`].

use crate::dataset::{Dataset, FeatureRow, NUM_FEATURES};
use crate::error::{TrainingError, TrainingResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` grows every tree until its leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self { n_trees: 100, max_depth: None, min_samples_split: 2, seed: 42 }
    }
}

impl ForestParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.n_trees == 0 {
            return Err(TrainingError::InvalidSpec("n_trees must be >= 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(TrainingError::InvalidSpec("min_samples_split must be >= 2".to_string()));
        }
        if self.max_depth == Some(0) {
            return Err(TrainingError::InvalidSpec("max_depth must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Split { feature: usize, threshold: f64, left: usize, right: usize },
    Leaf { distribution: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    rows: &'a [FeatureRow],
    targets: &'a [usize],
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / total).powi(2)).sum::<f64>()
}

impl TreeBuilder<'_> {
    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.targets[i]] += 1;
        }
        counts
    }

    fn push_leaf(&mut self, counts: &[usize], total: usize) -> usize {
        let distribution = counts.iter().map(|&c| c as f64 / total as f64).collect();
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let counts = self.class_counts(&indices);
        let total = indices.len();

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || total < self.params.min_samples_split {
            return self.push_leaf(&counts, total);
        }

        let Some(best) = self.find_split(&indices, rng) else {
            return self.push_leaf(&counts, total);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| self.rows[i][best.feature] <= best.threshold);

        // reserve this node's slot before the children so the root stays at 0
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { distribution: Vec::new() });
        let left = self.grow(left_idx, depth + 1, rng);
        let right = self.grow(right_idx, depth + 1, rng);
        self.nodes[slot] = Node::Split { feature: best.feature, threshold: best.threshold, left, right };
        slot
    }

    /// Examine features in random order; stop once `max_features` have been
    /// examined and at least one valid split exists.
    fn find_split(&self, indices: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..NUM_FEATURES).collect();
        features.shuffle(rng);

        let mut best: Option<BestSplit> = None;
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            if let Some(candidate) = self.best_split_on(feature, indices) {
                if best.as_ref().is_none_or(|b| candidate.impurity < b.impurity) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn best_split_on(&self, feature: usize, indices: &[usize]) -> Option<BestSplit> {
        let mut sorted = indices.to_vec();
        sorted.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

        let total = sorted.len();
        let mut right = self.class_counts(&sorted);
        let mut left = vec![0usize; self.n_classes];
        let mut best: Option<BestSplit> = None;

        for pos in 0..total - 1 {
            let class = self.targets[sorted[pos]];
            left[class] += 1;
            right[class] -= 1;

            let here = self.rows[sorted[pos]][feature];
            let next = self.rows[sorted[pos + 1]][feature];
            if here >= next {
                continue;
            }

            let n_left = pos + 1;
            let n_right = total - n_left;
            let impurity = (n_left as f64).mul_add(
                gini(&left, n_left),
                n_right as f64 * gini(&right, n_right),
            ) / total as f64;

            if best.as_ref().is_none_or(|b| impurity < b.impurity) {
                let mut threshold = (here + next) / 2.0;
                // midpoint can round up to `next` for adjacent floats
                if threshold >= next {
                    threshold = here;
                }
                best = Some(BestSplit { feature, threshold, impurity });
            }
        }
        best
    }
}

impl DecisionTree {
    fn fit(
        rows: &[FeatureRow],
        targets: &[usize],
        n_classes: usize,
        sample: Vec<usize>,
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Self {
        let max_features = ((NUM_FEATURES as f64).sqrt() as usize).max(1);
        let mut builder = TreeBuilder { rows, targets, n_classes, max_features, params, nodes: Vec::new() };
        builder.grow(sample, 0, rng);
        Self { nodes: builder.nodes }
    }

    fn distribution(&self, row: &FeatureRow) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { distribution } => return distribution,
            }
        }
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Bagged ensemble of [`DecisionTree`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    /// Sorted distinct labels seen during fitting.
    classes: Vec<u8>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest. Each tree sees a bootstrap sample of the rows and its own
    /// RNG stream derived from `params.seed`, so results are reproducible.
    pub fn fit(dataset: &Dataset, params: &ForestParams) -> TrainingResult<Self> {
        params.validate()?;
        if dataset.is_empty() {
            return Err(TrainingError::Data("cannot fit a forest on an empty dataset".to_string()));
        }

        let classes: Vec<u8> = dataset.distinct_labels().into_iter().collect();
        let targets: Vec<usize> = dataset
            .labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let n = dataset.len();
        let mut seeder = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_trees)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(seeder.next_u64());
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(&dataset.features, &targets, classes.len(), sample, params, &mut rng)
            })
            .collect();

        Ok(Self { classes, trees })
    }

    #[must_use]
    pub fn classes(&self) -> &[u8] {
        &self.classes
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean class distribution over all trees, aligned with [`Self::classes`].
    #[must_use]
    pub fn predict_proba(&self, row: &FeatureRow) -> Vec<f64> {
        let mut proba = vec![0f64; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.distribution(row)) {
                *acc += p;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Probability of label 1, or `None` when the forest was fitted on a
    /// single class and has no positive column.
    #[must_use]
    pub fn positive_proba(&self, row: &FeatureRow) -> Option<f64> {
        if self.classes.len() < 2 {
            return None;
        }
        let col = self.classes.iter().position(|&c| c == 1)?;
        Some(self.predict_proba(row)[col])
    }

    #[must_use]
    pub fn predict(&self, row: &FeatureRow) -> u8 {
        let proba = self.predict_proba(row);
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        self.classes[best]
    }

    /// Fraction of rows whose predicted label matches.
    #[must_use]
    pub fn accuracy(&self, dataset: &Dataset) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        let correct = dataset
            .features
            .iter()
            .zip(&dataset.labels)
            .filter(|(row, label)| self.predict(row) == **label)
            .count();
        correct as f64 / dataset.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> Dataset {
        let mut ds = Dataset::default();
        for i in 0..n {
            let churn = u8::from(i % 2 == 0);
            let complaints = if churn == 1 { 5.0 + (i % 3) as f64 } else { (i % 2) as f64 };
            let tenure = if churn == 1 { (i % 6) as f64 } else { 24.0 + (i % 12) as f64 };
            ds.features.push([tenure, 1.0 + (i % 4) as f64, complaints]);
            ds.labels.push(churn);
        }
        ds
    }

    fn small_params() -> ForestParams {
        ForestParams { n_trees: 15, ..ForestParams::default() }
    }

    #[test]
    fn test_params_validate() {
        assert!(ForestParams::default().validate().is_ok());
        assert!(ForestParams { n_trees: 0, ..ForestParams::default() }.validate().is_err());
        assert!(ForestParams { min_samples_split: 1, ..ForestParams::default() }.validate().is_err());
        assert!(ForestParams { max_depth: Some(0), ..ForestParams::default() }.validate().is_err());
    }

    #[test]
    fn test_fit_learns_separable_data() {
        let ds = separable(60);
        let forest = RandomForest::fit(&ds, &small_params()).unwrap();

        assert_eq!(forest.classes(), &[0, 1]);
        assert_eq!(forest.n_trees(), 15);
        assert!(forest.accuracy(&ds) > 0.95);
        assert_eq!(forest.predict(&[1.0, 2.0, 7.0]), 1);
        assert_eq!(forest.predict(&[30.0, 2.0, 0.0]), 0);
    }

    #[test]
    fn test_probabilities_are_bounded_and_sum_to_one() {
        let ds = separable(40);
        let forest = RandomForest::fit(&ds, &small_params()).unwrap();

        for row in &ds.features {
            let proba = forest.predict_proba(row);
            let sum: f64 = proba.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            let positive = forest.positive_proba(row).unwrap();
            assert!((0.0..=1.0).contains(&positive));
        }
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let ds = separable(30);
        let a = RandomForest::fit(&ds, &small_params()).unwrap();
        let b = RandomForest::fit(&ds, &small_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_class_forest_has_no_positive_proba() {
        let ds = Dataset { features: vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], labels: vec![1, 1] };
        let forest = RandomForest::fit(&ds, &small_params()).unwrap();

        assert_eq!(forest.classes(), &[1]);
        assert_eq!(forest.positive_proba(&[1.0, 2.0, 3.0]), None);
        assert_eq!(forest.predict(&[1.0, 2.0, 3.0]), 1);
    }

    #[test]
    fn test_max_depth_limits_tree_size() {
        let ds = separable(50);
        let params = ForestParams { n_trees: 3, max_depth: Some(1), ..ForestParams::default() };
        let forest = RandomForest::fit(&ds, &params).unwrap();
        assert!(forest.trees.iter().all(|t| t.node_count() <= 3));
    }

    #[test]
    fn test_forest_serde_roundtrip_preserves_predictions() {
        let ds = separable(20);
        let forest = RandomForest::fit(&ds, &small_params()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(forest.predict_proba(&ds.features[0]), restored.predict_proba(&ds.features[0]));
    }

    #[test]
    fn test_fit_rejects_empty_dataset() {
        assert!(RandomForest::fit(&Dataset::default(), &small_params()).is_err());
    }
}
