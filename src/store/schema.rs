//! Versioned schemas for the notification and preferences databases.

use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const NOTIFICATIONS_TABLE: Table = Table {
    name: "notifications",
    columns: &[
        Column {
            name: "id",
            sql_type: &SqlType::Text,
            is_primary_key: true,
            non_null: false,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "user_id",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "notification_type",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "created_at",
            sql_type: &SqlType::Integer,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "params",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "confirmation_token",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: false,
            is_unique: true,
            default_value: None,
        },
        Column {
            name: "push_state",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "push_date",
            sql_type: &SqlType::Integer,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "push_error_message",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: false,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "push_error_count",
            sql_type: &SqlType::Integer,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: Some("0"),
        },
    ],
    indices: &[
        // fetch_next_due filters on state and orders by date
        ("idx_notifications_due", "push_state, push_date"),
        ("idx_notifications_user", "user_id"),
    ],
};

const PREFERENCES_TABLE: Table = Table {
    name: "preferences",
    columns: &[
        Column {
            name: "user_id",
            sql_type: &SqlType::Text,
            is_primary_key: true,
            non_null: false,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "secret",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
        Column {
            name: "channel_prefs",
            sql_type: &SqlType::Text,
            is_primary_key: false,
            non_null: true,
            is_unique: false,
            default_value: None,
        },
    ],
    indices: &[],
};

pub const NOTIFICATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[NOTIFICATIONS_TABLE],
    migration: None,
}];

pub const PREFERENCES_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[PREFERENCES_TABLE],
    migration: None,
}];
