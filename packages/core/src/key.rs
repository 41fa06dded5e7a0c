//! Lock keys and their normalization.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Identifier of one serialization domain.
///
/// Numeric keys are stored in their string form, so `15` and `"15"` address
/// the same queue. The default key is used whenever no key is supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum LockKey {
    /// The key used when the caller does not name one.
    #[default]
    Default,
    /// A caller-supplied key.
    Named(String),
}

impl LockKey {
    /// Create a named key.
    pub fn named(key: impl Into<String>) -> Self {
        Self::Named(key.into())
    }

    /// Check if this is the default key.
    pub fn is_default(&self) -> bool {
        matches!(self, LockKey::Default)
    }

    /// The key's name, if it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LockKey::Default => None,
            LockKey::Named(key) => Some(key),
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Default => write!(f, "default"),
            LockKey::Named(key) => write!(f, "{}", key),
        }
    }
}

impl From<Option<String>> for LockKey {
    fn from(key: Option<String>) -> Self {
        key.map_or(LockKey::Default, LockKey::Named)
    }
}

impl From<LockKey> for Option<String> {
    fn from(key: LockKey) -> Self {
        match key {
            LockKey::Default => None,
            LockKey::Named(key) => Some(key),
        }
    }
}

/// A value that cannot be used as a lock key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} (got: \"{actual}\")")]
pub struct InvalidKey {
    pub expected: &'static str,
    pub actual: String,
}

const KEY_EXPECTATION: &str = "a string, a finite number, or no key";

/// Conversion into a single lock key.
pub trait IntoLockKey {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey>;
}

/// Conversion into the ordered, deduplicated key list of one acquisition.
///
/// A single key yields one entry, a list yields its distinct entries in
/// first-seen order, and an empty list yields no keys at all.
pub trait IntoLockKeys {
    fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey>;
}

impl IntoLockKey for LockKey {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(self)
    }
}

impl IntoLockKey for &LockKey {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(self.clone())
    }
}

impl IntoLockKey for () {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(LockKey::Default)
    }
}

impl IntoLockKey for &str {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(LockKey::named(self))
    }
}

impl IntoLockKey for String {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(LockKey::Named(self))
    }
}

impl IntoLockKey for &String {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        Ok(LockKey::named(self.as_str()))
    }
}

macro_rules! integer_keys {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoLockKey for $ty {
                fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
                    Ok(LockKey::Named(self.to_string()))
                }
            }
        )*
    };
}

integer_keys!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// Whole numbers below 2^53 are spelled as integers, so `15.0` shares a
/// queue with `15` and `"15"`. Every other finite value uses `f64`'s
/// `Display`, which never switches to exponent notation: `0.5` is `"0.5"`
/// and `1e21` is `"1000000000000000000000"`, not `"1e+21"`.
impl IntoLockKey for f64 {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        if !self.is_finite() {
            return Err(InvalidKey {
                expected: KEY_EXPECTATION,
                actual: self.to_string(),
            });
        }
        // Whole numbers share a queue with their integer spelling.
        if self.fract() == 0.0 && self.abs() < 9_007_199_254_740_992.0 {
            return Ok(LockKey::Named(format!("{}", self as i64)));
        }
        Ok(LockKey::Named(self.to_string()))
    }
}

impl IntoLockKey for f32 {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        f64::from(self).into_lock_key()
    }
}

impl<K: IntoLockKey> IntoLockKey for Option<K> {
    fn into_lock_key(self) -> Result<LockKey, InvalidKey> {
        match self {
            Some(key) => key.into_lock_key(),
            None => Ok(LockKey::Default),
        }
    }
}

macro_rules! single_key_lists {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoLockKeys for $ty {
                fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey> {
                    Ok(vec![self.into_lock_key()?])
                }
            }
        )*
    };
}

single_key_lists!(
    LockKey, &LockKey, (), &str, String, &String, i8, i16, i32, i64, isize, u8, u16, u32, u64,
    usize, f32, f64,
);

impl<K: IntoLockKey> IntoLockKeys for Option<K> {
    fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey> {
        Ok(vec![self.into_lock_key()?])
    }
}

impl<K: IntoLockKey> IntoLockKeys for Vec<K> {
    fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey> {
        normalize(self)
    }
}

impl<K: IntoLockKey, const N: usize> IntoLockKeys for [K; N] {
    fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey> {
        normalize(self)
    }
}

impl<K: IntoLockKey + Clone> IntoLockKeys for &[K] {
    fn into_lock_keys(self) -> Result<Vec<LockKey>, InvalidKey> {
        normalize(self.iter().cloned())
    }
}

/// Convert every key and drop repeats, keeping first-seen order.
pub fn normalize<I>(keys: I) -> Result<Vec<LockKey>, InvalidKey>
where
    I: IntoIterator,
    I::Item: IntoLockKey,
{
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for key in keys {
        let key = key.into_lock_key()?;
        if seen.insert(key.clone()) {
            normalized.push(key);
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_share_queue_with_their_string_form() -> Result<(), InvalidKey> {
        assert_eq!(15_i32.into_lock_key()?, "15".into_lock_key()?);
        assert_eq!(15.0_f64.into_lock_key()?, LockKey::named("15"));
        assert_eq!(1.5_f64.into_lock_key()?, LockKey::named("1.5"));
        assert_ne!(15_u64.into_lock_key()?, 16_u64.into_lock_key()?);
        Ok(())
    }

    #[test]
    fn other_floats_use_plain_decimal_spelling() -> Result<(), InvalidKey> {
        assert_eq!(0.1_f64.into_lock_key()?, LockKey::named("0.1"));
        assert_eq!(1e21_f64.into_lock_key()?, LockKey::named("1000000000000000000000"));
        assert_eq!(9_007_199_254_740_992.0_f64.into_lock_key()?, LockKey::named("9007199254740992"));
        assert_eq!((-0.0_f64).into_lock_key()?, LockKey::named("0"));
        Ok(())
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert!(f64::NAN.into_lock_key().is_err());
        assert!(f64::INFINITY.into_lock_keys().is_err());
        assert!(vec![1.0, f64::NEG_INFINITY].into_lock_keys().is_err());
    }

    #[test]
    fn absent_keys_map_to_the_default_key() -> Result<(), InvalidKey> {
        assert_eq!(().into_lock_keys()?, vec![LockKey::Default]);
        assert_eq!(None::<&str>.into_lock_keys()?, vec![LockKey::Default]);
        assert_eq!(Some("a").into_lock_keys()?, vec![LockKey::named("a")]);
        // The empty string is a real key, distinct from the default one.
        assert_eq!("".into_lock_keys()?, vec![LockKey::named("")]);
        Ok(())
    }

    #[test]
    fn key_lists_are_deduplicated_in_order() -> Result<(), InvalidKey> {
        let keys = vec![Some("a"), Some("b"), None, Some("c"), None, Some("a")].into_lock_keys()?;
        assert_eq!(
            keys,
            vec![
                LockKey::named("a"),
                LockKey::named("b"),
                LockKey::Default,
                LockKey::named("c"),
            ]
        );
        assert!(Vec::<&str>::new().into_lock_keys()?.is_empty());
        assert_eq!(["x", "x"].into_lock_keys()?, vec![LockKey::named("x")]);
        Ok(())
    }

    #[test]
    fn keys_serialize_as_optional_strings() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&LockKey::Default)?, "null");
        assert_eq!(serde_json::to_string(&LockKey::named("a"))?, "\"a\"");
        let key: LockKey = serde_json::from_str("\"b\"")?;
        assert_eq!(key, LockKey::named("b"));
        Ok(())
    }
}
