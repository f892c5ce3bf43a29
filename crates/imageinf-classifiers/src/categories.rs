//! Collapse fine-grained taxonomy labels into coarse categories
//!
//! Matching is a keyword-substring heuristic and is sensitive to declaration
//! order: categories are scanned in the order below, keywords within a
//! category likewise, and the first hit decides the category for a prediction.

use crate::classifier::sort_descending;
use imageinf_core::Prediction;

/// Category name and its keywords, in scan order
pub type CategoryTable = &'static [(&'static str, &'static [&'static str])];

/// Built-in category table
pub const CATEGORIES: CategoryTable = &[
    ("damage", &["wreck", "rubble", "debris", "ruin", "crash"]),
    (
        "vehicle",
        &[
            "car", "truck", "bus", "van", "jeep", "ambulance", "limousine", "pickup", "trailer",
            "tractor", "fire engine", "motor scooter", "moped", "bicycle", "tricycle",
        ],
    ),
    (
        "building",
        &[
            "house", "home", "church", "mosque", "palace", "monastery", "barn", "boathouse",
            "greenhouse", "library", "prison", "restaurant", "shop", "store", "cinema", "castle",
            "dome", "bell cote",
        ],
    ),
    (
        "infrastructure",
        &[
            "bridge", "viaduct", "dam", "pier", "breakwater", "street sign", "traffic light",
            "pole", "fence", "manhole", "parking",
        ],
    ),
    (
        "vegetation",
        &[
            "tree", "forest", "plant", "flower", "daisy", "corn", "hay", "mushroom", "acorn",
            "rapeseed",
        ],
    ),
    (
        "water",
        &[
            "lake", "sea", "ocean", "river", "shore", "coast", "flood", "fountain", "geyser",
            "water",
        ],
    ),
    (
        "landscape",
        &["valley", "cliff", "volcano", "alp", "mountain", "promontory", "sandbar", "desert"],
    ),
    (
        "animal",
        &[
            "cat", "dog", "tabby", "persian", "terrier", "retriever", "bird", "horse", "cow",
            "sheep", "goat",
        ],
    ),
    ("person", &["person", "people", "groom", "diver", "player"]),
];

/// Keyword-based category aggregator
#[derive(Debug, Clone, Copy)]
pub struct CategoryAggregator {
    table: CategoryTable,
}

impl Default for CategoryAggregator {
    fn default() -> Self {
        Self { table: CATEGORIES }
    }
}

impl CategoryAggregator {
    /// Aggregator over a custom table
    pub fn new(table: CategoryTable) -> Self {
        Self { table }
    }

    /// Number of declared categories
    pub fn category_count(&self) -> usize {
        self.table.len()
    }

    /// Declared category names in scan order
    pub fn category_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.iter().map(|(name, _)| *name)
    }

    /// Category of a single fine label, if any keyword matches.
    ///
    /// The label is split on commas; the first synonym with any match wins.
    pub fn categorize(&self, label: &str) -> Option<usize> {
        label.split(',').find_map(|part| {
            let part = part.trim().to_lowercase();
            if part.is_empty() {
                return None;
            }
            self.table.iter().position(|(_, keywords)| {
                keywords.iter().any(|keyword| part.contains(keyword))
            })
        })
    }

    /// One prediction per matched category carrying the maximum score among
    /// its fine predictions, sorted descending. Unmatched labels are dropped.
    pub fn aggregate(&self, predictions: &[Prediction]) -> Vec<Prediction> {
        let mut best: Vec<Option<f32>> = vec![None; self.table.len()];

        for prediction in predictions {
            if let Some(idx) = self.categorize(&prediction.label) {
                let slot = &mut best[idx];
                *slot = Some(slot.map_or(prediction.score, |s| s.max(prediction.score)));
            }
        }

        let mut aggregated: Vec<Prediction> = self
            .table
            .iter()
            .zip(best)
            .filter_map(|((name, _), score)| score.map(|s| Prediction::new(*name, s)))
            .collect();
        sort_descending(&mut aggregated);
        aggregated
    }
}

/// Aggregate with the built-in table
pub fn aggregate_predictions(predictions: &[Prediction]) -> Vec<Prediction> {
    CategoryAggregator::default().aggregate(predictions)
}
