pub mod error;
pub mod tags;
pub mod upload;

pub mod storage {
    pub mod blob;
    pub mod db;
    pub mod indexes;
    pub mod types {
        pub mod memory_record;
        pub mod pipeline;

        use serde::{Deserialize, Serialize};

        pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
            fn table_name() -> &'static str;
            fn get_id(&self) -> &str;
        }

        /// Defines a struct backed by a SurrealDB table: an `id`, `created_at`/`updated_at`
        /// timestamps, and the listed fields. Mirrors the ergonomics SurrealDB's loosely
        /// typed `Thing` ids and datetimes need on the serde boundary.
        #[macro_export]
        macro_rules! stored_object {
            ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
                #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
                pub struct $name {
                    #[serde(deserialize_with = "$crate::storage::types::deserialize_flexible_id")]
                    pub id: String,
                    #[serde(
                        serialize_with = "$crate::storage::types::serialize_datetime",
                        deserialize_with = "$crate::storage::types::deserialize_datetime",
                        default
                    )]
                    pub created_at: chrono::DateTime<chrono::Utc>,
                    #[serde(
                        serialize_with = "$crate::storage::types::serialize_datetime",
                        deserialize_with = "$crate::storage::types::deserialize_datetime",
                        default
                    )]
                    pub updated_at: chrono::DateTime<chrono::Utc>,
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

        struct FlexibleIdVisitor;

        impl<'de> serde::de::Visitor<'de> for FlexibleIdVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a Thing")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(value.to_string())
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(value)
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let thing = <surrealdb::sql::Thing as serde::Deserialize>::deserialize(
                    serde::de::value::MapAccessDeserializer::new(map),
                )?;
                Ok(thing.id.to_raw())
            }
        }

        pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(FlexibleIdVisitor)
        }

        pub fn serialize_datetime<S>(
            date: &chrono::DateTime<chrono::Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            serde::Serialize::serialize(&Into::<surrealdb::sql::Datetime>::into(*date), serializer)
        }

        pub fn deserialize_datetime<'de, D>(
            deserializer: D,
        ) -> Result<chrono::DateTime<chrono::Utc>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let dt = <surrealdb::sql::Datetime as serde::Deserialize>::deserialize(deserializer)?;
            Ok(chrono::DateTime::<chrono::Utc>::from(dt))
        }
    }
}

pub mod collaborators {
    pub mod decoder;
    pub mod embedding;
    pub mod generator;
}

pub mod utils {
    pub mod config;
    pub mod tokenizer;
}
