use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::hash::Hasher;
use uuid::Uuid;

/// Content-addressed identifier a URL resolves to. Derived from the stored
/// bytes, so two URLs pointing at identical content share one id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ContentId(pub u128);
impl ContentId {
    pub const fn null() -> Self {
        ContentId(0)
    }

    pub fn is_null(&self) -> bool {
        return self.0 == 0;
    }

    /// Hash raw content bytes into an id (128-bit siphash).
    pub fn from_data(data: &[u8]) -> Self {
        use siphasher::sip128::Hasher128;
        let mut hasher = siphasher::sip128::SipHasher13::new();
        hasher.write(data);
        ContentId(hasher.finish128().as_u128())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        ContentId(uuid.as_u128())
    }

    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_u128(self.0)
    }

    pub fn from_u128(u: u128) -> Self {
        Self(u)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Debug for ContentId {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_tuple("ContentId")
            .field(&format_args!("{:032x}", self.0))
            .finish()
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("{:032x}", self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

struct ContentIdVisitor;

impl<'a> Visitor<'a> for ContentIdVisitor {
    type Value = ContentId;

    fn expecting(
        &self,
        fmt: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(fmt, "a 32-character hex string")
    }

    fn visit_str<E: de::Error>(
        self,
        s: &str,
    ) -> Result<Self::Value, E> {
        u128::from_str_radix(s, 16)
            .map(ContentId)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_string(ContentIdVisitor)
        } else {
            Ok(ContentId(u128::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_data_is_stable() {
        let a = ContentId::from_data(b"scene data");
        let b = ContentId::from_data(b"scene data");
        assert_eq!(a, b);
        assert!(!a.is_null());
    }

    #[test]
    fn from_data_differs_by_content() {
        let a = ContentId::from_data(b"mesh a");
        let b = ContentId::from_data(b"mesh b");
        assert_ne!(a, b);
    }
}
