//! Schema-tolerant normalization of agent-created tickets
//!
//! The agent owns its store and its column names drift across records and
//! deployments ("Comunidad" today, "edificio" tomorrow). Nothing here assumes
//! a fixed schema: every logical field is discovered through an ordered list
//! of candidate keys, and a value that fails to coerce is treated as absent,
//! never as an error.
//!
//! Normalization is a pure, total function of the raw record. The discovery
//! order per field is fixed, and candidate keys are scanned in sorted key
//! order, so the same record always normalizes identically - the live view
//! re-normalizes on every refresh and must not flap between candidate keys.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw agent-store record: whatever columns the agent happens to use.
///
/// serde_json's default map is BTree-backed, so key iteration is sorted and
/// pattern scans below are deterministic.
pub type RawTicket = serde_json::Map<String, Value>;

/// Key under which the store-local rowid is injected when the agent table
/// exposes no usable id column.
pub const ROWID_KEY: &str = "_rowid_";

/// Canonical projection of an agent ticket
///
/// Recomputed on every refresh; never persisted. Missing fields hold their
/// typed zero value rather than failing normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTicket {
    /// Store-local, stable ticket id (discovered id column or rowid)
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub message: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: String,
    /// Free-text building/community reference, not yet mapped to a canonical
    /// community
    pub building_label: String,
    /// Free-text or opaque assignee reference, not yet mapped to a canonical
    /// operator
    pub assignee_ref: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: String,
    /// Attachment references as the agent wrote them (paths or URLs)
    pub attachments: Vec<String>,
}

/// Logical fields the normalizer discovers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalField {
    Id,
    CreatedAt,
    Message,
    ClientName,
    ClientPhone,
    ClientEmail,
    BuildingLabel,
    AssigneeRef,
    Resolved,
    ResolvedAt,
    ResolvedBy,
    Attachments,
}

/// Candidate keys for one logical field, in priority order
struct FieldSpec {
    /// Case-insensitive exact key names, tried first
    exact: &'static [&'static str],
    /// Case-insensitive substring patterns, tried next over sorted keys
    patterns: &'static [&'static str],
}

static ID_SPEC: FieldSpec = FieldSpec {
    exact: &["id", "ticket_id", "uuid", "guid", ROWID_KEY],
    patterns: &[],
};
static CREATED_AT_SPEC: FieldSpec = FieldSpec {
    exact: &["created_at", "createdat", "fecha_creacion"],
    patterns: &["fecha", "creat", "creado", "timestamp", "date"],
};
static MESSAGE_SPEC: FieldSpec = FieldSpec {
    exact: &["message", "mensaje"],
    patterns: &["mensaje", "message", "solicitud", "descrip", "asunto", "texto", "comentario"],
};
static CLIENT_NAME_SPEC: FieldSpec = FieldSpec {
    exact: &["client_name", "nombre_cliente", "nombre"],
    patterns: &["nombre", "cliente", "vecino", "contacto"],
};
static CLIENT_PHONE_SPEC: FieldSpec = FieldSpec {
    exact: &["client_phone", "telefono"],
    patterns: &["telefono", "teléfono", "phone", "movil", "móvil", "tel"],
};
static CLIENT_EMAIL_SPEC: FieldSpec = FieldSpec {
    exact: &["client_email", "email", "correo"],
    patterns: &["email", "correo", "mail"],
};
static BUILDING_LABEL_SPEC: FieldSpec = FieldSpec {
    exact: &["building", "comunidad", "edificio"],
    patterns: &["comunida", "edificio", "building", "finca", "inmueble", "direccion", "dirección", "propiedad"],
};
static ASSIGNEE_REF_SPEC: FieldSpec = FieldSpec {
    exact: &["assignee", "gestor", "gestor_asignado"],
    patterns: &["gestor", "asignad", "assign", "agente", "operador", "responsable"],
};
static RESOLVED_SPEC: FieldSpec = FieldSpec {
    exact: &["resolved", "resuelto"],
    patterns: &["resuel", "resolv", "cerrado", "closed", "atendido"],
};
static RESOLVED_AT_SPEC: FieldSpec = FieldSpec {
    exact: &["resolved_at", "resuelto_at", "fecha_resolucion", "fecha_resuelto"],
    patterns: &["resol", "resuel", "cerrado", "closed"],
};
static RESOLVED_BY_SPEC: FieldSpec = FieldSpec {
    exact: &["resolved_by", "resuelto_por"],
    patterns: &["resuelto_por", "resolved_by", "cerrado_por", "atendido_por"],
};
static ATTACHMENTS_SPEC: FieldSpec = FieldSpec {
    exact: &["attachments", "adjuntos"],
    patterns: &["adjunt", "attach", "archivo", "fichero", "imagen", "foto", "documento"],
};

fn spec_for(field: LogicalField) -> &'static FieldSpec {
    match field {
        LogicalField::Id => &ID_SPEC,
        LogicalField::CreatedAt => &CREATED_AT_SPEC,
        LogicalField::Message => &MESSAGE_SPEC,
        LogicalField::ClientName => &CLIENT_NAME_SPEC,
        LogicalField::ClientPhone => &CLIENT_PHONE_SPEC,
        LogicalField::ClientEmail => &CLIENT_EMAIL_SPEC,
        LogicalField::BuildingLabel => &BUILDING_LABEL_SPEC,
        LogicalField::AssigneeRef => &ASSIGNEE_REF_SPEC,
        LogicalField::Resolved => &RESOLVED_SPEC,
        LogicalField::ResolvedAt => &RESOLVED_AT_SPEC,
        LogicalField::ResolvedBy => &RESOLVED_BY_SPEC,
        LogicalField::Attachments => &ATTACHMENTS_SPEC,
    }
}

/// Discover which raw key holds a logical field, if any
///
/// Used by agent-store writes (mark resolved, edit attachments) that must
/// touch only columns the agent actually has. Selection is key-based only;
/// the value is not inspected.
pub fn discover_key<'a>(raw: &'a RawTicket, field: LogicalField) -> Option<&'a str> {
    let spec = spec_for(field);

    for candidate in spec.exact {
        if let Some((key, _)) = raw
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(candidate))
        {
            return Some(key.as_str());
        }
    }

    for pattern in spec.patterns {
        if let Some((key, _)) = raw
            .iter()
            .find(|(k, _)| k.to_lowercase().contains(pattern))
        {
            return Some(key.as_str());
        }
    }

    None
}

/// Candidate values for a field, in discovery order, skipping nulls
fn candidates<'a>(raw: &'a RawTicket, field: LogicalField) -> Vec<&'a Value> {
    let spec = spec_for(field);
    let mut out = Vec::new();

    for candidate in spec.exact {
        for (key, value) in raw.iter() {
            if key.eq_ignore_ascii_case(candidate) && !value.is_null() {
                out.push(value);
            }
        }
    }

    for pattern in spec.patterns {
        for (key, value) in raw.iter() {
            if key.to_lowercase().contains(pattern) && !value.is_null() {
                out.push(value);
            }
        }
    }

    out
}

/// First candidate that coerces, or the typed fallback
fn discover<T>(raw: &RawTicket, field: LogicalField, coerce: fn(&Value) -> Option<T>) -> Option<T> {
    candidates(raw, field).into_iter().find_map(coerce)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "si" | "sí" | "x" | "y" | "resuelto" | "done" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a timestamp-like value; anything unparseable is absent, not an error
fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let epoch = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            epoch_to_utc(epoch)
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    // Bare epoch in a string column
    if let Ok(epoch) = s.parse::<i64>() {
        return epoch_to_utc(epoch);
    }
    None
}

fn epoch_to_utc(epoch: i64) -> Option<DateTime<Utc>> {
    // Small integers are ids or counters, not dates
    if epoch < 100_000_000 {
        return None;
    }
    if epoch >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// Parse an attachment list however the agent chose to encode it: a JSON
/// array of strings or objects, or a comma/newline separated string
fn as_attachments(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(attachment_ref)
                .collect(),
        ),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    return as_attachments(&parsed);
                }
            }
            Some(
                s.split(['\n', ','])
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        _ => None,
    }
}

fn attachment_ref(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        // Attachment objects from richer agent schemas ({url, filename, ...})
        Value::Object(obj) => ["url", "path", "file", "filename", "name"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(as_text)),
        _ => None,
    }
}

/// Normalize a raw agent record into the canonical ticket shape
///
/// Total over all possible inputs, including the empty map: never panics,
/// never returns an error, fills undiscoverable fields with typed zero
/// values.
pub fn normalize(raw: &RawTicket) -> NormalizedTicket {
    let id = discover(raw, LogicalField::Id, as_text).unwrap_or_default();
    if id.is_empty() {
        tracing::debug!("normalizer: record has no discoverable id column");
    }

    NormalizedTicket {
        id,
        created_at: discover(raw, LogicalField::CreatedAt, as_timestamp),
        message: discover(raw, LogicalField::Message, as_text).unwrap_or_default(),
        client_name: discover(raw, LogicalField::ClientName, as_text).unwrap_or_default(),
        client_phone: discover(raw, LogicalField::ClientPhone, as_text).unwrap_or_default(),
        client_email: discover(raw, LogicalField::ClientEmail, as_text).unwrap_or_default(),
        building_label: discover(raw, LogicalField::BuildingLabel, as_text).unwrap_or_default(),
        assignee_ref: discover(raw, LogicalField::AssigneeRef, as_text).unwrap_or_default(),
        resolved: discover(raw, LogicalField::Resolved, as_bool).unwrap_or(false),
        resolved_at: discover(raw, LogicalField::ResolvedAt, as_timestamp),
        resolved_by: discover(raw, LogicalField::ResolvedBy, as_text).unwrap_or_default(),
        attachments: discover(raw, LogicalField::Attachments, as_attachments).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawTicket {
        value.as_object().expect("test fixture must be an object").clone()
    }

    #[test]
    fn test_normalize_spanish_agent_record() {
        // Heuristic key discovery across the agent's Spanish column names
        let record = raw(json!({
            "Comunidad": "Edificio Sol",
            "Gestor_Asignado": "u-42",
            "mensaje": "fuga de agua",
            "resuelto": false
        }));

        let ticket = normalize(&record);
        assert_eq!(ticket.building_label, "Edificio Sol");
        assert_eq!(ticket.assignee_ref, "u-42");
        assert_eq!(ticket.message, "fuga de agua");
        assert!(!ticket.resolved);
    }

    #[test]
    fn test_normalize_empty_record_is_total() {
        let ticket = normalize(&RawTicket::new());
        assert_eq!(ticket.id, "");
        assert_eq!(ticket.message, "");
        assert!(!ticket.resolved);
        assert!(ticket.created_at.is_none());
        assert!(ticket.attachments.is_empty());
    }

    #[test]
    fn test_normalize_unrelated_keys_fall_back() {
        let record = raw(json!({
            "foo": 1,
            "bar": "baz",
            "deeply": {"nested": true}
        }));

        let ticket = normalize(&record);
        assert_eq!(ticket, normalize(&record), "normalization must be deterministic");
        assert_eq!(ticket.building_label, "");
        assert_eq!(ticket.assignee_ref, "");
    }

    #[test]
    fn test_id_prefers_id_column_over_rowid() {
        let record = raw(json!({
            "_rowid_": 7,
            "id": "sofia-17"
        }));
        assert_eq!(normalize(&record).id, "sofia-17");
    }

    #[test]
    fn test_id_falls_back_to_rowid() {
        let record = raw(json!({
            "_rowid_": 7,
            "mensaje": "ascensor parado"
        }));
        assert_eq!(normalize(&record).id, "7");
    }

    #[test]
    fn test_created_at_discovery_and_formats() {
        let rfc3339 = raw(json!({"fecha_creacion": "2026-03-01T10:15:00Z"}));
        assert!(normalize(&rfc3339).created_at.is_some());

        let sql_style = raw(json!({"Fecha_Solicitud": "2026-03-01 10:15:00"}));
        assert!(normalize(&sql_style).created_at.is_some());

        let epoch_secs = raw(json!({"created": 1_767_225_600}));
        assert!(normalize(&epoch_secs).created_at.is_some());

        let epoch_millis = raw(json!({"created": 1_767_225_600_000_i64}));
        assert!(normalize(&epoch_millis).created_at.is_some());

        let garbage = raw(json!({"fecha": "mañana por la tarde"}));
        assert!(normalize(&garbage).created_at.is_none(), "unparseable dates are absent");
    }

    #[test]
    fn test_resolved_value_coercions() {
        for (value, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!("sí"), true),
            (json!("x"), true),
            (json!(false), false),
            (json!(0), false),
            (json!("no"), false),
        ] {
            let record = raw(json!({"resuelto": value}));
            assert_eq!(normalize(&record).resolved, expected);
        }
    }

    #[test]
    fn test_resolved_and_resolved_at_do_not_collide() {
        // "resolved" is a bool column and "resolved_at" a timestamp; each
        // logical field must land on its own column even though the key
        // patterns overlap.
        let record = raw(json!({
            "resolved": true,
            "resolved_at": "2026-02-10 09:00:00",
            "resolved_by": "maria"
        }));

        let ticket = normalize(&record);
        assert!(ticket.resolved);
        assert!(ticket.resolved_at.is_some());
        assert_eq!(ticket.resolved_by, "maria");
    }

    #[test]
    fn test_resolved_at_skips_non_timestamp_candidates() {
        // Only the bool column exists: ResolvedAt's "resol" pattern matches
        // it, but a bool does not coerce to a timestamp, so the field is
        // absent rather than garbage.
        let record = raw(json!({"resuelto": true}));
        let ticket = normalize(&record);
        assert!(ticket.resolved);
        assert!(ticket.resolved_at.is_none());
    }

    #[test]
    fn test_attachments_json_array() {
        let record = raw(json!({
            "Adjuntos": ["fotos/fuga1.jpg", "fotos/fuga2.jpg"]
        }));
        assert_eq!(
            normalize(&record).attachments,
            vec!["fotos/fuga1.jpg", "fotos/fuga2.jpg"]
        );
    }

    #[test]
    fn test_attachments_object_entries() {
        let record = raw(json!({
            "attachments": [
                {"url": "https://cdn.example/a.png", "filename": "a.png"},
                {"path": "escrituras/b.pdf"}
            ]
        }));
        assert_eq!(
            normalize(&record).attachments,
            vec!["https://cdn.example/a.png", "escrituras/b.pdf"]
        );
    }

    #[test]
    fn test_attachments_comma_separated_string() {
        let record = raw(json!({
            "archivos": "uno.jpg, dos.jpg,\ntres.pdf"
        }));
        assert_eq!(
            normalize(&record).attachments,
            vec!["uno.jpg", "dos.jpg", "tres.pdf"]
        );
    }

    #[test]
    fn test_attachments_serialized_json_string() {
        // Some agent schemas store the array as a TEXT column
        let record = raw(json!({
            "adjuntos": "[\"x.png\", \"y.png\"]"
        }));
        assert_eq!(normalize(&record).attachments, vec!["x.png", "y.png"]);
    }

    #[test]
    fn test_discover_key_for_writes() {
        let record = raw(json!({
            "Resuelto": false,
            "Adjuntos": [],
            "mensaje": "..."
        }));

        assert_eq!(discover_key(&record, LogicalField::Resolved), Some("Resuelto"));
        assert_eq!(discover_key(&record, LogicalField::Attachments), Some("Adjuntos"));
        assert_eq!(discover_key(&record, LogicalField::ResolvedBy), None);
    }

    #[test]
    fn test_null_values_are_absent() {
        let record = raw(json!({
            "mensaje": null,
            "descripcion": "puerta del garaje rota"
        }));
        // Null canonical key must not shadow a usable pattern match
        assert_eq!(normalize(&record).message, "puerta del garaje rota");
    }
}
