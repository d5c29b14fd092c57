//! Esquema Diesel (generado manualmente). Reemplazable con `diesel
//! print-schema`.
//!
//! Tablas:
//! - `event_log`: log append-only de `MachineEvent`s, clusterizado por
//!   `(root_event_id, sequence_number)`.
//! - `machine_event_archive`: una fila comprimida por `root_event_id`
//!   archivado.
//!
//! `id` y `root_event_id` se almacenan como `Text` (ULID canónico de 26
//! caracteres): Diesel no trae un mapeo `Ulid` de fábrica y el resto del
//! stack (`diesel`, `r2d2`) no lo necesita; `Ulid::from_string`/`to_string`
//! hacen el roundtrip en la capa de filas.

diesel::table! {
    event_log (id) {
        id -> Text,
        root_event_id -> Text,
        sequence_number -> BigInt,
        created_at -> Timestamptz,
        machine_id -> Text,
        machine_value -> Jsonb,
        source -> Text,
        #[sql_name = "type"]
        event_type -> Text,
        payload -> Nullable<Jsonb>,
        version -> Integer,
        context -> Nullable<Jsonb>,
        meta -> Nullable<Jsonb>,
    }
}

diesel::table! {
    machine_event_archive (root_event_id) {
        root_event_id -> Text,
        machine_id -> Text,
        events_data -> Binary,
        event_count -> Integer,
        original_size -> Integer,
        compressed_size -> Integer,
        compression_level -> Integer,
        archived_at -> Timestamptz,
        first_event_at -> Timestamptz,
        last_event_at -> Timestamptz,
        restore_count -> Integer,
        last_restored_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    instance_cooldown (root_event_id) {
        root_event_id -> Text,
        reactivated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(event_log, machine_event_archive, instance_cooldown,);
