use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key for single-row databases.
/// LMDB rejects zero-sized keys, so this encodes to a single byte.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnitKey;

impl Serialize for UnitKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(0)
    }
}

impl<'de> Deserialize<'de> for UnitKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let _ = u8::deserialize(deserializer)?;
        Ok(UnitKey)
    }
}
