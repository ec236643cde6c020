use serde::{Deserialize, Serialize};

pub mod asset;
pub mod contributor;
pub mod edition;
pub mod enrichment_result;
pub mod pending_ingest;
pub mod user;
pub mod work;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Serde codecs shared by every stored type.
///
/// SurrealDB hands record ids back as `Thing` values and datetimes as its
/// own wrapper; these adapters keep the Rust structs on plain strings and
/// `chrono` types.
pub mod serde_support {
    use chrono::{DateTime, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use surrealdb::sql::Thing;

    struct FlexibleIdVisitor;

    impl<'de> Visitor<'de> for FlexibleIdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a Thing")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(thing.id.to_raw())
        }
    }

    pub fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlexibleIdVisitor)
    }

    pub fn datetime_to_surreal<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
    }

    pub fn datetime_from_surreal<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = surrealdb::sql::Datetime::deserialize(deserializer)?;
        Ok(DateTime::<Utc>::from(value))
    }

    pub fn option_datetime_to_surreal<S>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(value) => {
                serializer.serialize_some(&Into::<surrealdb::sql::Datetime>::into(*value))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn option_datetime_from_surreal<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<surrealdb::sql::Datetime>::deserialize(deserializer)?;
        Ok(value.map(DateTime::<Utc>::from))
    }
}

/// Declares a stored row type: `id`, `created_at` and `updated_at` columns
/// plus the listed fields, wired into [`StoredObject`] and the SurrealDB
/// serde adapters. One invocation per module; the generated codec shims
/// delegate to [`serde_support`].
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Serialize};

        fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            $crate::storage::types::serde_support::flexible_id(deserializer)
        }

        fn serialize_datetime<S>(
            date: &DateTime<Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            $crate::storage::types::serde_support::datetime_to_surreal(date, serializer)
        }

        fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            $crate::storage::types::serde_support::datetime_from_surreal(deserializer)
        }

        #[allow(dead_code)]
        fn serialize_option_datetime<S>(
            date: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            $crate::storage::types::serde_support::option_datetime_to_surreal(date, serializer)
        }

        #[allow(dead_code)]
        fn deserialize_option_datetime<'de, D>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            $crate::storage::types::serde_support::option_datetime_from_surreal(deserializer)
        }

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            pub id: String,
            #[serde(
                serialize_with = "serialize_datetime",
                deserialize_with = "deserialize_datetime",
                default
            )]
            pub created_at: DateTime<Utc>,
            #[serde(
                serialize_with = "serialize_datetime",
                deserialize_with = "deserialize_datetime",
                default
            )]
            pub updated_at: DateTime<Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::storage::types::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
