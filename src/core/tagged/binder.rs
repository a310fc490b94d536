//! Schema-driven binding of tagged fields onto typed records.
//!
//! Each result type declares a [`Schema`] once: a list of fields, each with
//! the server key it answers to and a setter. A field declared by name gets
//! its key by lower-casing the first letter (`HeadRev` -> `headRev`); list
//! fields get the bracketed form (`[otherAction]`). Keys with a numeric
//! suffix (`otherAction3`) address element 3 of a bracketed list, which is
//! grown with default values as needed. A bracket may name several keys
//! (`[depotFile,action,rev]`) when the list holds records; the element is then
//! bound recursively with the base key.
//!
//! Lookup walks the fields in declaration order and, per field, tries an
//! exact key match before an indexed match.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::Record;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("no matching field for {key}")]
    NoField { key: String },

    #[error("couldn't convert '{value}' to {target} for {key}")]
    Conversion {
        key: String,
        value: String,
        target: &'static str,
    },
}

/// Value could not be parsed into the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertError {
    pub target: &'static str,
}

/// Conversion from a tagged string value.
pub trait FromTagged: Sized {
    fn from_tagged(value: &str) -> Result<Self, ConvertError>;
}

impl FromTagged for String {
    fn from_tagged(value: &str) -> Result<Self, ConvertError> {
        Ok(value.to_string())
    }
}

/// Presence of the key is the value.
impl FromTagged for bool {
    fn from_tagged(_value: &str) -> Result<Self, ConvertError> {
        Ok(true)
    }
}

macro_rules! int_from_tagged {
    ($($t:ty),*) => {$(
        impl FromTagged for $t {
            fn from_tagged(value: &str) -> Result<Self, ConvertError> {
                if value.is_empty() {
                    return Ok(0);
                }
                value.parse().map_err(|_| ConvertError { target: stringify!($t) })
            }
        }
    )*};
}

int_from_tagged!(i32, i64, u32, u64);

impl<V: FromTagged> FromTagged for Option<V> {
    fn from_tagged(value: &str) -> Result<Self, ConvertError> {
        V::from_tagged(value).map(Some)
    }
}

/// A record type with a binding schema.
pub trait Tagged: Default + 'static {
    fn schema() -> &'static Schema<Self>;
}

type ScalarSetter<T> = Box<dyn Fn(&mut T, &str) -> Result<(), ConvertError> + Send + Sync>;
type IndexedSetter<T> =
    Box<dyn Fn(&mut T, usize, &str, &str, bool) -> Result<(), BindError> + Send + Sync>;

enum Slot<T> {
    Scalar(ScalarSetter<T>),
    Indexed {
        names: Vec<String>,
        set: IndexedSetter<T>,
    },
}

struct Field<T> {
    key: String,
    slot: Slot<T>,
}

/// Field table for one record type.
pub struct Schema<T> {
    fields: Vec<Field<T>>,
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

/// Default key for a field name: first letter lower-cased.
pub fn derive_key(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

static INDEXED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\D+)(\d+)$").expect("indexed key pattern"));

fn split_indexed(key: &str) -> Option<(&str, usize)> {
    let caps = INDEXED_KEY.captures(key)?;
    let base = caps.get(1)?.as_str();
    caps.get(2)?.as_str().parse().ok().map(|idx| (base, idx))
}

fn grow<V: Default>(list: &mut Vec<V>, idx: usize) {
    while list.len() <= idx {
        list.push(V::default());
    }
}

fn bracket_names(tag: &str) -> Vec<String> {
    tag.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(str::to_string)
        .collect()
}

impl<T: 'static> Schema<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalar field keyed by its derived name.
    pub fn field<V: FromTagged + 'static>(self, name: &str, access: fn(&mut T) -> &mut V) -> Self {
        self.tagged(&derive_key(name), access)
    }

    /// Scalar field with an explicit key.
    pub fn tagged<V: FromTagged + 'static>(mut self, key: &str, access: fn(&mut T) -> &mut V) -> Self {
        let set: ScalarSetter<T> = Box::new(move |target, value| {
            *access(target) = V::from_tagged(value)?;
            Ok(())
        });
        self.fields.push(Field {
            key: key.to_string(),
            slot: Slot::Scalar(set),
        });
        self
    }

    /// List field keyed by its derived name in brackets.
    pub fn list<V>(self, name: &str, access: fn(&mut T) -> &mut Vec<V>) -> Self
    where
        V: FromTagged + Default + 'static,
    {
        self.list_tagged(&format!("[{}]", derive_key(name)), access)
    }

    /// List field with an explicit bracketed key, e.g. `[otherAction]`.
    pub fn list_tagged<V>(mut self, tag: &str, access: fn(&mut T) -> &mut Vec<V>) -> Self
    where
        V: FromTagged + Default + 'static,
    {
        let set: IndexedSetter<T> = Box::new(move |target, idx, base, value, _must_match| {
            let list = access(target);
            grow(list, idx);
            list[idx] = V::from_tagged(value).map_err(|e| BindError::Conversion {
                key: format!("{base}{idx}"),
                value: value.to_string(),
                target: e.target,
            })?;
            Ok(())
        });
        self.fields.push(Field {
            key: tag.to_string(),
            slot: Slot::Indexed {
                names: bracket_names(tag),
                set,
            },
        });
        self
    }

    /// List of records; each name in `tag` is bound into the element.
    pub fn group<E: Tagged>(mut self, tag: &str, access: fn(&mut T) -> &mut Vec<E>) -> Self {
        let set: IndexedSetter<T> = Box::new(move |target, idx, base, value, must_match| {
            let list = access(target);
            grow(list, idx);
            E::schema().bind(&mut list[idx], base, value, must_match)
        });
        self.fields.push(Field {
            key: tag.to_string(),
            slot: Slot::Indexed {
                names: bracket_names(tag),
                set,
            },
        });
        self
    }

    /// Bind one key/value onto `target`. Unknown keys are ignored unless
    /// `must_match` is set.
    pub fn bind(&self, target: &mut T, key: &str, value: &str, must_match: bool) -> Result<(), BindError> {
        let indexed = split_indexed(key);

        for field in &self.fields {
            match &field.slot {
                Slot::Scalar(set) if field.key == key => {
                    return set(target, value).map_err(|e| BindError::Conversion {
                        key: key.to_string(),
                        value: value.to_string(),
                        target: e.target,
                    });
                }
                Slot::Indexed { names, set } => {
                    if let Some((base, idx)) = indexed {
                        if names.iter().any(|n| n == base) {
                            return set(target, idx, base, value, must_match);
                        }
                    }
                }
                Slot::Scalar(_) => {}
            }
        }

        if must_match {
            Err(BindError::NoField {
                key: key.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Bind one key/value onto a tagged record.
pub fn bind<T: Tagged>(target: &mut T, key: &str, value: &str, must_match: bool) -> Result<(), BindError> {
    T::schema().bind(target, key, value, must_match)
}

/// Bind every entry of `record`, logging the ones that do not convert.
pub fn bind_record<T: Tagged>(target: &mut T, record: &Record) {
    for (key, value) in record {
        if let Err(e) = bind(target, key, value, false) {
            warn!("Couldn't set field {key}: {e}");
        }
    }
}

/// Build a fresh `T` from one record.
pub fn from_record<T: Tagged>(record: &Record) -> T {
    let mut out = T::default();
    bind_record(&mut out, record);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Entry {
        depot_file: String,
        rev: i32,
    }

    impl Tagged for Entry {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: LazyLock<Schema<Entry>> = LazyLock::new(|| {
                Schema::new()
                    .field("DepotFile", |e: &mut Entry| &mut e.depot_file)
                    .tagged("rev", |e: &mut Entry| &mut e.rev)
            });
            &SCHEMA
        }
    }

    #[derive(Debug, Default)]
    struct Sample {
        head_rev: i64,
        shelved: bool,
        other_lock0: bool,
        other_open: i32,
        other_opens: Vec<String>,
        changes: Vec<i32>,
        files: Vec<Entry>,
    }

    impl Tagged for Sample {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: LazyLock<Schema<Sample>> = LazyLock::new(|| {
                Schema::new()
                    .field("HeadRev", |s: &mut Sample| &mut s.head_rev)
                    .field("Shelved", |s: &mut Sample| &mut s.shelved)
                    .field("OtherLock0", |s: &mut Sample| &mut s.other_lock0)
                    .field("OtherOpen", |s: &mut Sample| &mut s.other_open)
                    .list_tagged("[otherOpen]", |s: &mut Sample| &mut s.other_opens)
                    .list("Change", |s: &mut Sample| &mut s.changes)
                    .group("[depotFile,rev]", |s: &mut Sample| &mut s.files)
            });
            &SCHEMA
        }
    }

    #[test]
    fn derived_keys() {
        assert_eq!(derive_key("HeadRev"), "headRev");
        assert_eq!(derive_key("x"), "x");
        assert_eq!(derive_key(""), "");
    }

    #[test]
    fn scalar_conversions() {
        let mut s = Sample::default();
        bind(&mut s, "headRev", "42", true).unwrap();
        bind(&mut s, "shelved", "", true).unwrap();
        assert_eq!(s.head_rev, 42);
        assert!(s.shelved);
    }

    #[test]
    fn empty_int_is_zero() {
        let mut s = Sample { head_rev: 9, ..Sample::default() };
        bind(&mut s, "headRev", "", true).unwrap();
        assert_eq!(s.head_rev, 0);
    }

    #[test]
    fn conversion_error_differs_from_missing_field() {
        let mut s = Sample::default();
        let err = bind(&mut s, "headRev", "abc", false).unwrap_err();
        assert!(matches!(err, BindError::Conversion { target: "i64", .. }));
        let err = bind(&mut s, "nope", "1", true).unwrap_err();
        assert_eq!(err, BindError::NoField { key: "nope".into() });
        assert!(bind(&mut s, "nope", "1", false).is_ok());
    }

    #[test]
    fn exact_match_wins_over_index() {
        let mut s = Sample::default();
        bind(&mut s, "otherLock0", "", true).unwrap();
        bind(&mut s, "otherOpen", "2", true).unwrap();
        bind(&mut s, "otherOpen1", "bob@ws", true).unwrap();
        assert!(s.other_lock0);
        assert_eq!(s.other_open, 2);
        assert_eq!(s.other_opens, vec![String::new(), "bob@ws".to_string()]);
    }

    #[test]
    fn indexed_growth_out_of_order() {
        let mut s = Sample::default();
        bind(&mut s, "change2", "30", true).unwrap();
        bind(&mut s, "change0", "10", true).unwrap();
        assert_eq!(s.changes, vec![10, 0, 30]);
    }

    #[test]
    fn group_binds_nested_records() {
        let mut s = Sample::default();
        bind(&mut s, "rev1", "4", true).unwrap();
        bind(&mut s, "depotFile0", "//a", true).unwrap();
        bind(&mut s, "depotFile1", "//b", true).unwrap();
        assert_eq!(
            s.files,
            vec![
                Entry { depot_file: "//a".into(), rev: 0 },
                Entry { depot_file: "//b".into(), rev: 4 },
            ]
        );
    }

    proptest::proptest! {
        #[test]
        fn indexed_binding_ignores_arrival_order(
            values in proptest::collection::btree_map(0usize..12, 1i32..1000, 0..8),
            seed in proptest::prelude::any::<u64>(),
        ) {
            let mut pairs: Vec<(usize, i32)> = values.iter().map(|(&i, &v)| (i, v)).collect();
            let len = pairs.len().max(1) as u64;
            pairs.rotate_left((seed % len) as usize);
            pairs.reverse();

            let mut s = Sample::default();
            for (idx, value) in &pairs {
                bind(&mut s, &format!("change{idx}"), &value.to_string(), true).unwrap();
            }

            let expected_len = values.keys().next_back().map_or(0, |&max| max + 1);
            proptest::prop_assert_eq!(s.changes.len(), expected_len);
            for (i, got) in s.changes.iter().enumerate() {
                proptest::prop_assert_eq!(*got, values.get(&i).copied().unwrap_or(0));
            }
        }
    }
}
