use serde_json::Value;

/// Property data types worth pulling back through GraphQL. Refs and blobs
/// are left out of result reshaping.
const SELECTABLE_TYPES: [&str; 8] = [
    "text", "string", "int", "number", "boolean", "date", "uuid", "geoCoordinates",
];

/// GraphQL string literal with escaping for quotes, backslashes and
/// newlines in user-supplied queries.
pub fn gql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn gql_string_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| gql_string(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Primitive-typed property names from a collection schema, in schema order.
pub fn property_selection(schema: &Value) -> Vec<String> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_array()) else {
        return vec![];
    };
    properties
        .iter()
        .filter(|prop| {
            prop.get("dataType")
                .and_then(|t| t.as_array())
                .and_then(|t| t.first())
                .and_then(|t| t.as_str())
                .map(|t| SELECTABLE_TYPES.contains(&t) || SELECTABLE_TYPES.contains(&t.trim_end_matches("[]")))
                .unwrap_or(false)
        })
        .filter_map(|prop| prop.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect()
}

fn selection_body(properties: &[String], additional: &str) -> String {
    let mut fields = properties.join(" ");
    if !fields.is_empty() {
        fields.push(' ');
    }
    format!("{}_additional {{ {} }}", fields, additional)
}

pub fn bm25_query(collection: &str, query: &str, limit: usize, properties: &[String]) -> String {
    format!(
        "{{ Get {{ {}(bm25: {{query: {}}}, limit: {}) {{ {} }} }} }}",
        collection,
        gql_string(query),
        limit,
        selection_body(properties, "id score")
    )
}

pub fn near_text_query(collection: &str, query: &str, limit: usize, properties: &[String]) -> String {
    format!(
        "{{ Get {{ {}(nearText: {{concepts: [{}]}}, limit: {}) {{ {} }} }} }}",
        collection,
        gql_string(query),
        limit,
        selection_body(properties, "id distance")
    )
}

pub fn hybrid_query(
    collection: &str,
    query: &str,
    limit: usize,
    alpha: f64,
    query_properties: Option<&[String]>,
    properties: &[String],
) -> String {
    let mut args = format!("query: {}, alpha: {}", gql_string(query), alpha);
    if let Some(props) = query_properties {
        if !props.is_empty() {
            args.push_str(&format!(", properties: {}", gql_string_list(props)));
        }
    }
    format!(
        "{{ Get {{ {}(hybrid: {{{}}}, limit: {}) {{ {} }} }} }}",
        collection,
        args,
        limit,
        selection_body(properties, "id score distance")
    )
}

pub fn near_vector_query(
    collection: &str,
    vector: &[f32],
    limit: usize,
    target_vector: Option<&str>,
    properties: &[String],
) -> String {
    let rendered: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    let mut args = format!("vector: [{}]", rendered.join(", "));
    if let Some(target) = target_vector {
        args.push_str(&format!(", targetVectors: [{}]", gql_string(target)));
    }
    format!(
        "{{ Get {{ {}(nearVector: {{{}}}, limit: {}) {{ {} }} }} }}",
        collection,
        args,
        limit,
        selection_body(properties, "id distance")
    )
}

/// Which relevance fields a reshaped hit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// `bm25_score` only.
    Keyword,
    /// `distance` only.
    Vector,
    /// Both, for hybrid fusion.
    Both,
}

/// The BM25/hybrid score comes back as a GraphQL string.
fn score_value(additional: &Value) -> Value {
    match additional.get("score") {
        Some(Value::String(s)) => s
            .parse::<f64>()
            .map(|f| serde_json::json!(f))
            .unwrap_or(Value::Null),
        Some(Value::Number(n)) => Value::Number(n.clone()),
        _ => Value::Null,
    }
}

/// Reshape a GraphQL `data` payload into the fixed result form: uuid,
/// properties and the relevance fields for the query mode.
pub fn reshape_hits(data: &Value, collection: &str, relevance: Relevance) -> Vec<Value> {
    let Some(objects) = data
        .get("Get")
        .and_then(|g| g.get(collection))
        .and_then(|c| c.as_array())
    else {
        return vec![];
    };

    objects
        .iter()
        .map(|object| {
            let additional = object.get("_additional").cloned().unwrap_or(Value::Null);
            let uuid = additional
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();

            let mut properties = serde_json::Map::new();
            if let Some(fields) = object.as_object() {
                for (name, value) in fields {
                    if name != "_additional" {
                        properties.insert(name.clone(), value.clone());
                    }
                }
            }

            let mut hit = serde_json::json!({
                "uuid": uuid,
                "properties": properties,
            });
            if matches!(relevance, Relevance::Keyword | Relevance::Both) {
                hit["bm25_score"] = score_value(&additional);
            }
            if matches!(relevance, Relevance::Vector | Relevance::Both) {
                hit["distance"] = additional.get("distance").cloned().unwrap_or(Value::Null);
            }
            hit
        })
        .collect()
}
