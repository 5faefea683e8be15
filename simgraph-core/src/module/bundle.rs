//! Value bundles.

use indexmap::IndexMap;

use crate::backend::Array;
use crate::error::Result;

/// Many parameter values at once.
///
/// - `Array`: every dynamic value flattened and concatenated along the last
///   axis, with any leading axes treated as a batch prefix
/// - `List`: one array per dynamic parameter, in cache order
/// - `Map`: keyed by child, nesting for sub-modules
#[derive(Debug, Clone, PartialEq)]
pub enum Bundle {
    Array(Array),
    List(Vec<Array>),
    Map(IndexMap<String, Bundle>),
}

impl Bundle {
    /// Start an empty mapping bundle.
    pub fn map() -> Self {
        Bundle::Map(IndexMap::new())
    }

    /// Add an entry to a mapping bundle. Other variants are returned unchanged.
    pub fn with(mut self, key: &str, entry: impl Into<Bundle>) -> Self {
        if let Bundle::Map(entries) = &mut self {
            entries.insert(key.to_string(), entry.into());
        }
        self
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Bundle::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Array]> {
        match self {
            Bundle::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Bundle> {
        match self {
            Bundle::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Short description of the layout, for error messages.
    pub(crate) fn form(&self) -> &'static str {
        match self {
            Bundle::Array(_) => "an array",
            Bundle::List(_) => "a list",
            Bundle::Map(_) => "a mapping",
        }
    }

    /// Apply `f` to every array, keeping the bundle's layout.
    pub fn try_map(&self, f: &mut impl FnMut(&Array) -> Result<Array>) -> Result<Bundle> {
        Ok(match self {
            Bundle::Array(array) => Bundle::Array(f(array)?),
            Bundle::List(list) => Bundle::List(list.iter().map(&mut *f).collect::<Result<_>>()?),
            Bundle::Map(entries) => Bundle::Map(
                entries
                    .iter()
                    .map(|(key, entry)| Ok((key.clone(), entry.try_map(&mut *f)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Elementwise comparison within `tol`, requiring the same layout.
    pub fn allclose(&self, other: &Bundle, tol: f64) -> bool {
        match (self, other) {
            (Bundle::Array(a), Bundle::Array(b)) => a.shape() == b.shape() && a.allclose(b, tol),
            (Bundle::List(a), Bundle::List(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(a, b)| a.shape() == b.shape() && a.allclose(b, tol))
            }
            (Bundle::Map(a), Bundle::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, entry)| {
                        b.get(key).is_some_and(|other| entry.allclose(other, tol))
                    })
            }
            _ => false,
        }
    }
}

impl From<Array> for Bundle {
    fn from(array: Array) -> Self {
        Bundle::Array(array)
    }
}

impl From<f64> for Bundle {
    fn from(value: f64) -> Self {
        Bundle::Array(Array::scalar(value))
    }
}

impl From<Vec<Array>> for Bundle {
    fn from(list: Vec<Array>) -> Self {
        Bundle::List(list)
    }
}

impl From<IndexMap<String, Bundle>> for Bundle {
    fn from(entries: IndexMap<String, Bundle>) -> Self {
        Bundle::Map(entries)
    }
}
