use ahash::AHashMap;

use crate::{geometry::TilePoint, style::Text};

/// A labelled line that may be joined with others carrying the same text.
pub trait LineFeature {
    fn text(&self) -> Option<&str>;

    /// The line merged with its neighbours, `None` when the feature has no
    /// geometry.
    fn line_mut(&mut self) -> Option<&mut Vec<TilePoint>>;

    fn line(&self) -> Option<&[TilePoint]>;
}

type Key = (Text, i32, i32);

fn key(text: &str, point: TilePoint) -> Key {
    (text.into(), point.x, point.y)
}

fn endpoints<F: LineFeature>(feature: &F) -> Option<(Key, Key)> {
    let text = feature.text()?;
    let line = feature.line()?;
    Some((key(text, *line.first()?), key(text, *line.last()?)))
}

/// Joins lines with identical text whose endpoints touch, so labels can run
/// across the split. Features without text are passed through.
pub fn merge_lines<F: LineFeature>(features: Vec<F>) -> Vec<F> {
    let mut left_index: AHashMap<Key, usize> = AHashMap::new();
    let mut right_index: AHashMap<Key, usize> = AHashMap::new();
    let mut merged: Vec<Option<F>> = Vec::with_capacity(features.len());

    for mut feature in features {
        let Some((left_key, right_key)) = endpoints(&feature) else {
            merged.push(Some(feature));
            continue;
        };

        let before = right_index.get(&left_key).copied();
        let after = left_index.get(&right_key).copied();

        match (before, after) {
            (Some(i), Some(j)) if i != j => {
                // Lines on both ends: prepend this line to `j`, then `j` to `i`
                left_index.remove(&right_key);
                prepend(&mut merged[j], &mut feature);

                right_index.remove(&left_key);
                if let Some(mut tail) = merged[j].take() {
                    append(&mut merged[i], &mut tail);
                }

                left_index.remove(&left_key);
                right_index.remove(&right_key);
                if let Some((_, end)) = merged[i].as_ref().and_then(endpoints) {
                    right_index.insert(end, i);
                }
            }
            (Some(i), _) => {
                right_index.remove(&left_key);
                right_index.insert(right_key, i);
                append(&mut merged[i], &mut feature);
            }
            (None, Some(j)) => {
                left_index.remove(&right_key);
                left_index.insert(left_key, j);
                prepend(&mut merged[j], &mut feature);
            }
            (None, None) => {
                merged.push(Some(feature));
                left_index.insert(left_key, merged.len() - 1);
                right_index.insert(right_key, merged.len() - 1);
            }
        }
    }

    merged.into_iter().flatten().collect()
}

fn append<F: LineFeature>(target: &mut Option<F>, feature: &mut F) {
    let (Some(target), Some(line)) = (target.as_mut().and_then(|t| t.line_mut()), feature.line_mut()) else {
        return;
    };
    target.pop();
    target.append(line);
}

fn prepend<F: LineFeature>(target: &mut Option<F>, feature: &mut F) {
    let (Some(target), Some(line)) = (target.as_mut().and_then(|t| t.line_mut()), feature.line_mut()) else {
        return;
    };
    let mut joined = std::mem::take(line);
    joined.extend(target.drain(..).skip(1));
    *target = joined;
}
