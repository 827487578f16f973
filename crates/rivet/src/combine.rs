use indexmap::IndexSet;
use std::path::PathBuf;

pub trait Combine {
    /// Combine two values, preferring the values in `self`.
    ///
    /// The logic follows that of Cargo's `config.toml`: a key set in a higher
    /// precedence layer wins, whatever its value. Sets are joined with the
    /// higher precedence items placed first. Ordered lists (extensions, rules,
    /// stages) are replaced as a whole.
    #[must_use]
    fn combine(self, other: Self) -> Self;
}

macro_rules! impl_combine_or {
    ($name:ty) => {
        impl $crate::combine::Combine for Option<$name> {
            fn combine(self, other: Option<$name>) -> Option<$name> {
                self.or(other)
            }
        }
    };
}

pub(crate) use impl_combine_or;

impl_combine_or!(String);
impl_combine_or!(bool);
impl_combine_or!(usize);
impl_combine_or!(PathBuf);
impl_combine_or!(Vec<String>);

impl<T> Combine for Option<IndexSet<T>>
where
    T: Eq + std::hash::Hash,
{
    /// Combine two IndexSets by extending the set in `self` with the set in `other`, if they're
    /// both `Some`.
    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a, b) => a.or(b),
        }
    }
}
