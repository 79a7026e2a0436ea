//! Virtual-library item query
//!
//! Resolves a synthetic library's contents directly in SQL: filter rules,
//! optional ID scoping, and the caller's effective permissions (folder
//! whitelist, tag blacklist, parental rating) all evaluate server-side so
//! pagination numbers stay truthful.

use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::models::{ItemType, Rule, RuleLogic};
use crate::Result;

/// One page of a virtual-library query.
#[derive(Debug, Clone)]
pub struct VirtualQueryOptions {
    pub user_id: String,
    pub rules: Vec<Rule>,
    pub logic: RuleLogic,
    pub item_types: Vec<ItemType>,
    pub target_library_ids: Vec<String>,
    /// Scope to these metadata IDs (list / precomputed AI collections).
    pub tmdb_ids: Option<Vec<String>>,
    pub sort_by: String,
    pub sort_order: String,
    pub limit: i64,
    pub offset: i64,
}

impl VirtualQueryOptions {
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            rules: Vec::new(),
            logic: RuleLogic::And,
            item_types: Vec::new(),
            target_library_ids: Vec::new(),
            tmdb_ids: None,
            sort_by: "DateCreated".to_string(),
            sort_order: "Descending".to_string(),
            limit: 50,
            offset: 0,
        }
    }
}

pub struct VirtualLibraryQuery;

impl VirtualLibraryQuery {
    /// Returns `(library item IDs in engine order, permission-filtered total)`.
    pub async fn run(pool: &PgPool, opts: &VirtualQueryOptions) -> Result<(Vec<String>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM media_metadata m JOIN emby_users u ON u.id = ",
        );
        count.push_bind(&opts.user_id);
        push_where(&mut count, opts);
        let total: i64 = count.build().fetch_one(pool).await?.try_get(0)?;

        if total == 0 {
            return Ok((Vec::new(), 0));
        }

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT m.emby_item_ids->>0 AS emby_id \
             FROM media_metadata m JOIN emby_users u ON u.id = ",
        );
        select.push_bind(&opts.user_id);
        push_where(&mut select, opts);
        push_order_and_page(&mut select, opts);

        let rows = select.build().fetch_all(pool).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Option<String> = row.try_get("emby_id")?;
            if let Some(id) = id {
                ids.push(id);
            }
        }
        Ok((ids, total))
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, opts: &VirtualQueryOptions) {
    qb.push(" WHERE m.in_library = TRUE");

    if !opts.item_types.is_empty() {
        let types: Vec<String> = opts
            .item_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        qb.push(" AND m.item_type = ANY(");
        qb.push_bind(types);
        qb.push(")");
    }

    if let Some(tmdb_ids) = &opts.tmdb_ids {
        qb.push(" AND m.tmdb_id = ANY(");
        qb.push_bind(tmdb_ids.clone());
        qb.push(")");
    }

    if !opts.target_library_ids.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM jsonb_array_elements(m.asset_details) AS a \
             WHERE a->>'source_library_id' = ANY(",
        );
        qb.push_bind(opts.target_library_ids.clone());
        qb.push("))");
    }

    push_permission_predicates(qb);
    push_rules(qb, opts);
}

/// The three permission predicates, evaluated against the joined user's
/// policy snapshot. Missing or malformed policy arrays behave as empty.
fn push_permission_predicates(qb: &mut QueryBuilder<'_, Postgres>) {
    // Folder whitelist minus excluded subfolders: at least one asset must
    // pass both checks.
    qb.push(
        " AND EXISTS ( \
            SELECT 1 FROM jsonb_array_elements(m.asset_details) AS asset \
            WHERE ( \
                (u.policy->'EnableAllFolders' = 'true'::jsonb) \
                OR COALESCE(asset->'ancestor_ids', '[]'::jsonb) ?| ARRAY( \
                    SELECT jsonb_array_elements_text( \
                        CASE WHEN jsonb_typeof(u.policy->'EnabledFolders') = 'array' \
                             THEN u.policy->'EnabledFolders' ELSE '[]'::jsonb END)) \
                OR (asset->>'source_library_id') = ANY(ARRAY( \
                    SELECT jsonb_array_elements_text( \
                        CASE WHEN jsonb_typeof(u.policy->'EnabledFolders') = 'array' \
                             THEN u.policy->'EnabledFolders' ELSE '[]'::jsonb END))) \
            ) \
            AND NOT ( \
                COALESCE(asset->'ancestor_ids', '[]'::jsonb) ?| ARRAY( \
                    SELECT jsonb_array_elements_text( \
                        CASE WHEN jsonb_typeof(u.policy->'ExcludedSubFolders') = 'array' \
                             THEN u.policy->'ExcludedSubFolders' ELSE '[]'::jsonb END)) \
            ) \
        )",
    );

    // Tag blacklist.
    qb.push(
        " AND NOT (COALESCE(m.tags, '[]'::jsonb) ?| ARRAY( \
            SELECT jsonb_array_elements_text( \
                CASE WHEN jsonb_typeof(u.policy->'BlockedTags') = 'array' \
                     THEN u.policy->'BlockedTags' ELSE '[]'::jsonb END)))",
    );

    // Parental rating ceiling plus the unrated-items switch.
    qb.push(
        " AND ( \
            (u.policy->'MaxParentalRating' IS NULL) \
            OR (m.unified_rating IS NOT NULL \
                AND m.unified_rating ~ '^[0-9]+$' \
                AND (m.unified_rating)::int <= (u.policy->>'MaxParentalRating')::int) \
        ) \
        AND NOT ( \
            (u.policy->'BlockUnratedItems' = 'true'::jsonb) \
            AND (m.unified_rating IS NULL OR m.unified_rating = '' \
                 OR (CASE WHEN m.unified_rating ~ '^[0-9]+$' \
                          THEN (m.unified_rating)::int ELSE 0 END) = 0) \
        )",
    );
}

fn push_rules(qb: &mut QueryBuilder<'_, Postgres>, opts: &VirtualQueryOptions) {
    let rules: Vec<&Rule> = opts
        .rules
        .iter()
        .filter(|r| !r.value.is_null() && r.value != Value::String(String::new()))
        .collect();
    if rules.is_empty() {
        return;
    }

    let joiner = match opts.logic {
        RuleLogic::And => " AND ",
        RuleLogic::Or => " OR ",
    };

    qb.push(" AND (");
    let mut first = true;
    for rule in rules {
        if !first {
            qb.push(joiner);
        }
        first = false;
        push_rule(qb, rule);
    }
    qb.push(")");
}

/// Render one rule. Unknown fields or operators render as FALSE so a
/// malformed rule narrows instead of widening.
fn push_rule(qb: &mut QueryBuilder<'_, Postgres>, rule: &Rule) {
    match rule.field.as_str() {
        "genres" | "countries" | "studios" | "tags" | "keywords" => {
            push_string_list_rule(qb, &rule.field, &rule.operator, &rule.value);
        }
        "actors" | "directors" => {
            push_person_rule(qb, &rule.field, &rule.operator, &rule.value);
        }
        "release_date" | "date_added" => {
            push_date_rule(qb, &rule.field, &rule.operator, &rule.value);
        }
        "unified_rating" => push_rating_enum_rule(qb, &rule.operator, &rule.value),
        "is_in_progress" => {
            let expected = rule.value.as_bool().unwrap_or(true);
            if expected {
                qb.push(
                    "EXISTS (SELECT 1 FROM watchlist w \
                     WHERE w.tmdb_id = m.tmdb_id AND w.is_airing = TRUE)",
                );
            } else {
                qb.push(
                    "NOT EXISTS (SELECT 1 FROM watchlist w \
                     WHERE w.tmdb_id = m.tmdb_id AND w.is_airing = TRUE)",
                );
            }
        }
        "runtime" => push_runtime_rule(qb, &rule.operator, &rule.value),
        "release_year" => push_numeric_rule(qb, "m.release_year", &rule.operator, &rule.value),
        "rating" => push_numeric_rule(qb, "m.rating", &rule.operator, &rule.value),
        "title" => push_title_rule(qb, &rule.operator, &rule.value),
        _ => {
            qb.push("FALSE");
        }
    }
}

fn value_as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn push_string_list_rule(
    qb: &mut QueryBuilder<'_, Postgres>,
    field: &str,
    operator: &str,
    value: &Value,
) {
    let column = format!("m.{field}");
    match operator {
        "contains" | "eq" => {
            let Some(needle) = value.as_str().map(str::to_string).or_else(|| {
                value_as_string_list(value).into_iter().next()
            }) else {
                qb.push("FALSE");
                return;
            };
            qb.push(format!("jsonb_exists({column}, "));
            qb.push_bind(needle);
            qb.push(")");
        }
        "is_one_of" => {
            qb.push(format!("{column} ?| "));
            qb.push_bind(value_as_string_list(value));
        }
        "is_none_of" => {
            qb.push(format!("NOT ({column} ?| "));
            qb.push_bind(value_as_string_list(value));
            qb.push(")");
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

/// Person rules compare by metadata-provider ID with a name fallback.
/// `is_primary` restricts to the top billing slots: three for actors, one
/// for directors.
fn push_person_rule(
    qb: &mut QueryBuilder<'_, Postgres>,
    field: &str,
    operator: &str,
    value: &Value,
) {
    let column = format!("m.{field}");
    let mut ids: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(obj) => {
                        if let Some(id) = obj.get("id") {
                            match id {
                                Value::Number(n) => ids.push(n.to_string()),
                                Value::String(s) => ids.push(s.clone()),
                                _ => {}
                            }
                        }
                    }
                    Value::String(s) => names.push(s.clone()),
                    _ => {}
                }
            }
        }
        Value::String(s) => names.push(s.clone()),
        _ => {}
    }

    let ordinal_cap = match (operator, field) {
        ("is_primary", "actors") => Some(3),
        ("is_primary", _) => Some(1),
        _ => None,
    };

    if !ids.is_empty() {
        let exists = if operator == "is_none_of" {
            "NOT EXISTS"
        } else {
            "EXISTS"
        };
        qb.push(format!(
            "{exists} (SELECT 1 \
             FROM jsonb_array_elements({column}) WITH ORDINALITY AS t(p, ord) WHERE "
        ));
        if let Some(cap) = ordinal_cap {
            qb.push(format!("ord <= {cap} AND "));
        }
        qb.push("(p->>'tmdb_id') = ANY(");
        qb.push_bind(ids);
        qb.push("))");
    } else if !names.is_empty() {
        let exists = if operator == "is_none_of" {
            "NOT EXISTS"
        } else {
            "EXISTS"
        };
        qb.push(format!(
            "{exists} (SELECT 1 \
             FROM jsonb_array_elements({column}) WITH ORDINALITY AS t(p, ord) WHERE "
        ));
        if let Some(cap) = ordinal_cap {
            qb.push(format!("ord <= {cap} AND "));
        }
        qb.push("(");
        let mut first = true;
        for name in names {
            if !first {
                qb.push(" OR ");
            }
            first = false;
            qb.push("p->>'name' ILIKE ");
            qb.push_bind(format!("%{}%", escape_like(&name)));
        }
        qb.push("))");
    } else {
        qb.push("FALSE");
    }
}

fn push_date_rule(
    qb: &mut QueryBuilder<'_, Postgres>,
    field: &str,
    operator: &str,
    value: &Value,
) {
    let Some(days) = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    else {
        qb.push("FALSE");
        return;
    };

    // release_date is a date, date_added a timestamp; normalize to dates so
    // the inclusive-today bound holds for both.
    let column = if field == "date_added" {
        "m.date_added::date"
    } else {
        "m.release_date"
    };

    match operator {
        "in_last_days" => {
            qb.push(format!(
                "({column} IS NOT NULL AND {column} >= CURRENT_DATE - "
            ));
            qb.push_bind(days as i32);
            qb.push(format!(" AND {column} <= CURRENT_DATE)"));
        }
        "not_in_last_days" => {
            qb.push(format!("({column} IS NOT NULL AND {column} < CURRENT_DATE - "));
            qb.push_bind(days as i32);
            qb.push(")");
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

fn push_rating_enum_rule(qb: &mut QueryBuilder<'_, Postgres>, operator: &str, value: &Value) {
    match operator {
        "is_one_of" => {
            qb.push("m.unified_rating = ANY(");
            qb.push_bind(value_as_string_list(value));
            qb.push(")");
        }
        "is_none_of" => {
            qb.push("(m.unified_rating IS NULL OR NOT (m.unified_rating = ANY(");
            qb.push_bind(value_as_string_list(value));
            qb.push(")))");
        }
        "eq" => {
            let Some(v) = value.as_str() else {
                qb.push("FALSE");
                return;
            };
            qb.push("m.unified_rating = ");
            qb.push_bind(v.to_string());
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

/// Series runtime is the average episode runtime; movies read their own
/// column. A coalesced zero means unknown, so `lte` additionally requires
/// a positive value — an item without runtime data must not satisfy an
/// upper bound.
fn push_runtime_rule(qb: &mut QueryBuilder<'_, Postgres>, operator: &str, value: &Value) {
    const RUNTIME_EXPR: &str = "(CASE WHEN m.item_type = 'Series' THEN COALESCE( \
            (SELECT AVG(e.runtime_minutes) FROM media_metadata e \
             WHERE e.item_type = 'Episode' AND e.parent_series_tmdb_id = m.tmdb_id \
               AND e.runtime_minutes IS NOT NULL), 0) \
          ELSE COALESCE(m.runtime_minutes, 0) END)";

    let Some(minutes) = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    else {
        qb.push("FALSE");
        return;
    };

    match operator {
        "gte" | "eq" => {
            let op = if operator == "eq" { "=" } else { ">=" };
            qb.push(RUNTIME_EXPR);
            qb.push(format!(" {op} "));
            qb.push_bind(minutes);
        }
        "lte" => {
            qb.push(format!("({RUNTIME_EXPR} > 0 AND {RUNTIME_EXPR} <= "));
            qb.push_bind(minutes);
            qb.push(")");
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

fn push_numeric_rule(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    operator: &str,
    value: &Value,
) {
    let Some(v) = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    else {
        qb.push("FALSE");
        return;
    };
    let op = match operator {
        "gte" => ">=",
        "lte" => "<=",
        "eq" => "=",
        _ => {
            qb.push("FALSE");
            return;
        }
    };
    qb.push(format!("{column}::float8 {op} "));
    qb.push_bind(v);
}

fn push_title_rule(qb: &mut QueryBuilder<'_, Postgres>, operator: &str, value: &Value) {
    let Some(text) = value.as_str() else {
        qb.push("FALSE");
        return;
    };
    let escaped = escape_like(text);
    let (sql, pattern) = match operator {
        "contains" => ("m.title ILIKE ", format!("%{escaped}%")),
        "does_not_contain" => ("m.title NOT ILIKE ", format!("%{escaped}%")),
        "starts_with" => ("m.title ILIKE ", format!("{escaped}%")),
        "ends_with" => ("m.title ILIKE ", format!("%{escaped}")),
        _ => {
            qb.push("FALSE");
            return;
        }
    };
    qb.push(sql);
    qb.push_bind(pattern);
}

fn push_order_and_page(qb: &mut QueryBuilder<'_, Postgres>, opts: &VirtualQueryOptions) {
    // The request's SortBy names map onto cache columns; unknown values
    // fall back to the newest-first default.
    let column = match opts.sort_by.split(',').next().unwrap_or_default() {
        "SortName" => "m.title",
        "ProductionYear" => "m.release_year",
        "CommunityRating" => "m.rating",
        "PremiereDate" => "m.release_date",
        "DateLastContentAdded" => "m.last_synced_at",
        "Random" => "RANDOM()",
        _ => "m.date_added",
    };
    if column == "RANDOM()" {
        qb.push(" ORDER BY RANDOM()");
    } else {
        let dir = if opts.sort_order == "Ascending" {
            "ASC"
        } else {
            "DESC"
        };
        qb.push(format!(" ORDER BY {column} {dir} NULLS LAST"));
    }

    qb.push(" LIMIT ");
    qb.push_bind(opts.limit);
    qb.push(" OFFSET ");
    qb.push_bind(opts.offset);
}

/// Escape LIKE metacharacters in user-supplied patterns.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c\\d"), "c\\\\d");
    }

    #[test]
    fn test_value_as_string_list() {
        assert_eq!(
            value_as_string_list(&serde_json::json!(["a", "b"])),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            value_as_string_list(&serde_json::json!("solo")),
            vec!["solo".to_string()]
        );
        assert!(value_as_string_list(&serde_json::json!(42)).is_empty());
    }

    fn render(opts: &VirtualQueryOptions) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM media_metadata m");
        push_where(&mut qb, opts);
        qb.into_sql()
    }

    #[test]
    fn test_permission_predicates_always_present() {
        let opts = VirtualQueryOptions::for_user("u1");
        let sql = render(&opts);
        assert!(sql.contains("EnabledFolders"));
        assert!(sql.contains("BlockedTags"));
        assert!(sql.contains("MaxParentalRating"));
        assert!(sql.contains("BlockUnratedItems"));
        assert!(sql.contains("ExcludedSubFolders"));
    }

    #[test]
    fn test_unknown_rule_renders_false() {
        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.rules.push(Rule {
            field: "nonexistent".into(),
            operator: "gte".into(),
            value: serde_json::json!(1),
        });
        let sql = render(&opts);
        assert!(sql.contains("FALSE"));
    }

    #[test]
    fn test_or_logic_joins_rules() {
        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.logic = RuleLogic::Or;
        opts.rules.push(Rule {
            field: "release_year".into(),
            operator: "gte".into(),
            value: serde_json::json!(2020),
        });
        opts.rules.push(Rule {
            field: "rating".into(),
            operator: "gte".into(),
            value: serde_json::json!(8.0),
        });
        let sql = render(&opts);
        assert!(sql.contains("m.release_year"));
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn test_is_primary_caps_ordinality() {
        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.rules.push(Rule {
            field: "actors".into(),
            operator: "is_primary".into(),
            value: serde_json::json!([{"id": 500}]),
        });
        let sql = render(&opts);
        assert!(sql.contains("ord <= 3"));

        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.rules.push(Rule {
            field: "directors".into(),
            operator: "is_primary".into(),
            value: serde_json::json!([{"id": 7}]),
        });
        let sql = render(&opts);
        assert!(sql.contains("ord <= 1"));
    }

    #[test]
    fn test_series_runtime_uses_episode_average() {
        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.rules.push(Rule {
            field: "runtime".into(),
            operator: "gte".into(),
            value: serde_json::json!(40),
        });
        let sql = render(&opts);
        assert!(sql.contains("AVG(e.runtime_minutes)"));
        assert!(sql.contains("parent_series_tmdb_id"));
        // gte carries no positivity guard.
        assert!(!sql.contains("> 0 AND"));
    }

    #[test]
    fn test_runtime_lte_requires_positive_runtime() {
        // A null runtime coalesces to 0; the guard keeps it from
        // satisfying any upper bound.
        let mut opts = VirtualQueryOptions::for_user("u1");
        opts.rules.push(Rule {
            field: "runtime".into(),
            operator: "lte".into(),
            value: serde_json::json!(60),
        });
        let sql = render(&opts);
        assert!(sql.contains("> 0 AND"));
        assert!(sql.contains("<="));
    }
}
