use anyhow::{bail, Error};
use serde::{self, Deserialize, Serialize};
use std::collections::HashMap;

/// Groups item indices (in practice, cell indices) under string labels such as batch names.
/// The members of `labels[i]` are `indices[offsets[i]..offsets[i + 1]]`, or up to the end of
/// `indices` for the last label.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LabelClass {
    /// Distinct labels, in first-seen order
    pub labels: Vec<String>,
    /// Start of each label's run in `indices`
    pub offsets: Vec<usize>,
    /// Item indices, grouped by label and ascending within a label
    #[serde(deserialize_with = "default_if_empty")]
    pub indices: Vec<usize>,
}

impl LabelClass {
    /// Build a `LabelClass` from its raw parts, checking that the offsets describe valid runs.
    pub fn new(labels: Vec<String>, offsets: Vec<usize>, indices: Vec<usize>) -> Result<LabelClass, Error> {
        if labels.len() != offsets.len() {
            bail!("Label and offsets length unequal");
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) || offsets.last().is_some_and(|&o| o > indices.len()) {
            bail!("Offsets must be non-decreasing and within the index list");
        }
        Ok(LabelClass {
            labels,
            offsets,
            indices,
        })
    }

    /// A `LabelClass` with no labels.
    pub fn blank() -> LabelClass {
        LabelClass::default()
    }

    /// Group items by their label, one label per item.
    pub fn from_item_labels<S: AsRef<str>>(item_labels: &[S]) -> LabelClass {
        let mut order: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut labels = Vec::new();
        for (i, label) in item_labels.iter().enumerate() {
            let label = label.as_ref();
            let slot = *order.entry(label).or_insert_with(|| {
                labels.push(label.to_string());
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(i);
        }

        let mut offsets = Vec::with_capacity(groups.len());
        let mut indices = Vec::with_capacity(item_labels.len());
        for group in groups {
            offsets.push(indices.len());
            indices.extend(group);
        }
        LabelClass {
            labels,
            offsets,
            indices,
        }
    }

    /// Number of distinct labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if there are no labels
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Total number of grouped items
    pub fn n_items(&self) -> usize {
        self.indices.len()
    }

    /// Get the index of a label string. Returns None if the label string is not found.
    fn get_label_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|x| x == label)
    }

    /// Members of the `idx`-th label.
    pub fn members(&self, idx: usize) -> &[usize] {
        let start = self.offsets[idx];
        let end = self.offsets.get(idx + 1).copied().unwrap_or(self.indices.len());
        &self.indices[start..end]
    }

    /// Returns either the set of indices pointing to the given label or None is the label doesn't exist.
    pub fn get_indices(&self, label: &str) -> Option<&[usize]> {
        self.get_label_index(label).map(|idx| self.members(idx))
    }

    /// Iterate over `(label, members)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> + '_ {
        (0..self.len()).map(move |i| (self.labels[i].as_str(), self.members(i)))
    }

    /// For each item `0..n_items`, the index of the label it belongs to. Requires the indices to
    /// cover `0..n_items` exactly once, as `from_item_labels` produces.
    pub fn item_label_indices(&self) -> Result<Vec<usize>, Error> {
        let mut out = vec![usize::MAX; self.n_items()];
        for (label_idx, (_, members)) in self.iter().enumerate() {
            for &item in members {
                if item >= out.len() || out[item] != usize::MAX {
                    bail!("LabelClass indices are not a permutation of 0..{}", out.len());
                }
                out[item] = label_idx;
            }
        }
        Ok(out)
    }

    /// Split off labels with fewer than `min_size` members. Returns the retained groups and the
    /// `(label, size)` of every dropped group.
    pub fn retain_min_size(&self, min_size: usize) -> (LabelClass, Vec<(String, usize)>) {
        let mut kept = LabelClass::blank();
        let mut dropped = Vec::new();
        for (label, members) in self.iter() {
            if members.len() < min_size {
                dropped.push((label.to_string(), members.len()));
            } else {
                kept.labels.push(label.to_string());
                kept.offsets.push(kept.indices.len());
                kept.indices.extend_from_slice(members);
            }
        }
        (kept, dropped)
    }
}

/// Deserialize a missing or null field as its default value.
pub fn default_if_empty<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de> + Default,
{
    Option::<T>::deserialize(de).map(std::option::Option::unwrap_or_default)
}

#[cfg(test)]
mod test {
    use super::*;

    fn batches() -> LabelClass {
        LabelClass::from_item_labels(&["b", "a", "b", "c", "a", "b"])
    }

    #[test]
    fn test_from_item_labels() {
        let x = batches();
        assert_eq!(x.labels, vec!["b", "a", "c"]);
        assert_eq!(x.offsets, vec![0, 3, 5]);
        assert_eq!(x.indices, vec![0, 2, 5, 1, 4, 3]);
        assert_eq!(x.get_indices("a"), Some(&[1, 4][..]));
        assert_eq!(x.get_indices("c"), Some(&[3][..]));
        assert_eq!(x.get_indices("d"), None);
        assert_eq!(x.n_items(), 6);
    }

    #[test]
    fn test_item_label_indices() {
        let x = batches();
        assert_eq!(x.item_label_indices().unwrap(), vec![0, 1, 0, 2, 1, 0]);

        let broken = LabelClass::new(vec!["a".into()], vec![0], vec![0, 0]).unwrap();
        assert!(broken.item_label_indices().is_err());
    }

    #[test]
    fn test_retain_min_size() {
        let (kept, dropped) = batches().retain_min_size(2);
        assert_eq!(kept.labels, vec!["b", "a"]);
        assert_eq!(kept.offsets, vec![0, 3]);
        assert_eq!(kept.indices, vec![0, 2, 5, 1, 4]);
        assert_eq!(dropped, vec![("c".to_string(), 1)]);
    }

    #[test]
    fn test_new_validates() {
        assert!(LabelClass::new(vec!["a".into()], vec![], vec![]).is_err());
        assert!(LabelClass::new(vec!["a".into(), "b".into()], vec![2, 1], vec![0, 1, 2]).is_err());
        assert!(LabelClass::new(vec!["a".into()], vec![4], vec![0, 1]).is_err());
    }

    #[test]
    fn test_deserialize_missing_indices() {
        let x: LabelClass = serde_json::from_str(r#"{"labels": ["a"], "offsets": [0], "indices": null}"#).unwrap();
        assert_eq!(x.labels, vec!["a"]);
        assert!(x.indices.is_empty());
    }
}
