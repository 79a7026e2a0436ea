//! Cast text processing: CJK detection, role cleanup, role selection,
//! name normalization, unified ratings, and the cast quality score.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Role strings that carry no information about the character.
pub const ROLE_PLACEHOLDERS: [&str; 4] = ["演员", "配音", "actor", "actress"];

#[must_use]
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
    })
}

#[must_use]
pub fn is_role_placeholder(role: &str) -> bool {
    let lowered = role.trim().to_lowercase();
    ROLE_PLACEHOLDERS.iter().any(|p| *p == lowered)
}

static BRACKETS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(.*?\)|\[.*?\]|（.*?）|【.*?】").expect("static regex")
});
static AS_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^as\s+").expect("static regex"));
static ROLE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^((?:饰演|饰|扮演|扮|配音|配|as\b)\s*)+").expect("static regex")
});
static ROLE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s*(?:饰演|饰|配音|配))+$").expect("static regex"));

/// Normalize a role string.
///
/// Removes bracketed content, leading/trailing role markers, and for
/// bilingual `<Chinese><Latin>` pairs keeps only the Chinese prefix.
/// Pure-Latin names are preserved for downstream translation.
#[must_use]
pub fn clean_role_name(role: &str) -> String {
    let mut name = role.trim().to_string();

    name = BRACKETS_RE.replace_all(&name, "").trim().to_string();
    name = AS_PREFIX_RE.replace(&name, "").trim().to_string();
    name = ROLE_PREFIX_RE.replace(&name, "").trim().to_string();
    name = ROLE_SUFFIX_RE.replace(&name, "").trim().to_string();

    // Bilingual pair: everything before the first Latin letter, when it is
    // actually Chinese, is the role; the Latin tail is a duplicate.
    if let Some(pos) = name.find(|c: char| c.is_ascii_alphabetic()) {
        let prefix = name[..pos].trim();
        if contains_cjk(prefix) {
            return prefix.to_string();
        }
    }

    name.trim().to_string()
}

/// Pick the better of a local role and a cultural-provider candidate.
///
/// Priority: CJK non-placeholder candidate, CJK non-placeholder local,
/// first non-placeholder (candidate preferred), first non-empty (candidate
/// preferred).
#[must_use]
pub fn select_role(local: &str, candidate: &str) -> String {
    let local = local.trim();
    let candidate = candidate.trim();

    let local_cjk = contains_cjk(local);
    let candidate_cjk = contains_cjk(candidate);
    let local_placeholder = is_role_placeholder(local);
    let candidate_placeholder = is_role_placeholder(candidate);

    if candidate_cjk && !candidate_placeholder {
        return candidate.to_string();
    }
    if local_cjk && !local_placeholder && !candidate_cjk {
        return local.to_string();
    }
    if !candidate.is_empty() && !candidate_placeholder {
        return candidate.to_string();
    }
    if !local.is_empty() && !local_placeholder {
        return local.to_string();
    }
    if !candidate.is_empty() {
        return candidate.to_string();
    }
    local.to_string()
}

/// Normalize a person name for fuzzy matching: NFKD decomposition, strip
/// combining marks, keep alphanumerics, lowercase.
/// `"Chloë Grace Moretz"` becomes `"chloegracemoretz"`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.nfkd()
        .filter(|c| {
            // Combining marks fall in these blocks after decomposition.
            !matches!(c, '\u{0300}'..='\u{036f}' | '\u{1ab0}'..='\u{1aff}' | '\u{20d0}'..='\u{20ff}')
        })
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Map the Library Server's `OfficialRating` string to a unified numeric age
/// string. Handles country prefixes (`us-R`) and bare forms (`R`, `PG-13`).
/// Returns `None` when the rating is unknown.
#[must_use]
pub fn unified_rating(official_rating: &str) -> Option<&'static str> {
    if official_rating.is_empty() {
        return None;
    }
    let mut value = official_rating.to_lowercase();
    // "us-r" and "pg-13" both resolve through the part after the first dash.
    if let Some((_, rest)) = value.split_once('-') {
        value = rest.to_string();
    }

    let age = match value.as_str() {
        "g" | "tv-g" | "approved" | "e" | "u" | "uc" | "0" | "6" | "6+" | "all" | "unrated"
        | "nr" | "y" | "ec" => "0",
        "pg" | "tv-pg" | "7" | "y7" | "y7-fv" => "7",
        "10" => "10",
        "12" => "12",
        "13" | "t" => "13",
        "14" => "14",
        "15" => "15",
        "16" => "16",
        "r" | "m" | "ma" | "17" => "17",
        "18" | "x" | "xxx" | "ao" | "rp" | "ur" => "18",
        "19" => "19",
        _ => return None,
    };
    Some(age)
}

/// An actor entry as scored by the quality gate.
#[derive(Debug, Clone)]
pub struct ScoredActor {
    pub name: String,
    pub role: String,
}

/// Cast quality score in `0.0..=10.0`.
///
/// Per actor: 5.0 for a CJK name (1.0 for a non-empty non-CJK one), plus
/// 5.0 for a meaningful CJK role, 2.5 for a CJK placeholder, 0.5 for any
/// other non-empty role. Size penalties apply only off the animation path.
#[must_use]
pub fn evaluate_cast_quality(
    final_cast: &[ScoredActor],
    original_count: usize,
    expected_count: Option<usize>,
    is_animation: bool,
) -> f64 {
    if final_cast.is_empty() {
        // Empty credits are normal for animation and documentary items.
        return if is_animation { 7.0 } else { 0.0 };
    }

    let total = final_cast.len();
    let mut accumulated = 0.0;

    for actor in final_cast {
        let mut score: f64 = 0.0;

        if contains_cjk(&actor.name) {
            score += 5.0;
        } else if !actor.name.trim().is_empty() {
            score += 1.0;
        }

        let role = actor.role.trim();
        let placeholder = role.ends_with("(配音)") || is_role_placeholder(role);
        if !role.is_empty() {
            if contains_cjk(role) && !placeholder {
                score += 5.0;
            } else if contains_cjk(role) && placeholder {
                score += 2.5;
            } else {
                score += 0.5;
            }
        }

        accumulated += score.min(10.0);
    }

    let mut avg = accumulated / total as f64;

    if !is_animation {
        if total < 10 {
            avg *= total as f64 / 10.0;
        } else if let Some(expected) = expected_count {
            if expected > 0 && (total as f64) < expected as f64 * 0.8 {
                avg *= total as f64 / expected as f64;
            }
        } else if original_count > 0 && (total as f64) < original_count as f64 * 0.8 {
            avg *= total as f64 / original_count as f64;
        }
    }

    (avg * 10.0).round() / 10.0
}

/// A processed cast entry on its way back to the Library Server.
#[derive(Debug, Clone)]
pub struct ProcessedActor {
    pub name: String,
    pub role: String,
    pub emby_person_id: Option<String>,
    pub tmdb_person_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub douban_celebrity_id: Option<String>,
    pub order: usize,
}

const GENERIC_ROLES: [&str; 2] = ["演员", "配音"];

/// Final formatting pass over a processed cast list.
///
/// Collapses internal whitespace in CJK roles, fills empty roles with the
/// generic 演员/配音, optionally prefixes 饰/配, re-sorts by the original
/// billing order and reassigns contiguous order values.
pub fn format_cast_list(cast: &mut Vec<ProcessedActor>, is_animation: bool, role_prefix: bool) {
    for actor in cast.iter_mut() {
        let mut role = actor.role.trim().to_string();
        if contains_cjk(&role) {
            role = role.replace([' ', '\u{3000}'], "");
        }
        if role_prefix {
            if !role.is_empty() && !GENERIC_ROLES.contains(&role.as_str()) {
                let prefix = if is_animation { "配 " } else { "饰 " };
                role = format!("{prefix}{role}");
            } else if role.is_empty() {
                role = if is_animation { "配音" } else { "演员" }.to_string();
            }
        } else if role.is_empty() {
            role = if is_animation { "配音" } else { "演员" }.to_string();
        }
        actor.role = role;
    }

    cast.sort_by_key(|a| a.order);
    for (idx, actor) in cast.iter_mut().enumerate() {
        actor.order = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("凯文"));
        assert!(contains_cjk("Kevin 凯文"));
        assert!(!contains_cjk("Kevin"));
        assert!(!contains_cjk(""));
    }

    #[test]
    fn test_clean_role_bilingual_pair() {
        assert_eq!(clean_role_name("饰 凯文 Kevin (voice) [s1]"), "凯文");
    }

    #[test]
    fn test_clean_role_as_prefix_keeps_latin() {
        assert_eq!(clean_role_name("as Kevin (voice)"), "Kevin");
    }

    #[test]
    fn test_clean_role_placeholder_preserved() {
        assert_eq!(clean_role_name("演员"), "演员");
    }

    #[test]
    fn test_clean_role_suffix_marker() {
        assert_eq!(clean_role_name("凯文 饰"), "凯文");
        assert_eq!(clean_role_name("九儿 配音"), "九儿");
    }

    #[test]
    fn test_clean_role_fullwidth_brackets() {
        assert_eq!(clean_role_name("李雪琴（客串）"), "李雪琴");
    }

    #[test]
    fn test_select_role_priorities() {
        // CJK candidate wins over anything.
        assert_eq!(select_role("Kevin", "凯文"), "凯文");
        // CJK local survives a Latin candidate.
        assert_eq!(select_role("凯文", "Kevin"), "凯文");
        // Placeholder candidate never beats a real CJK local.
        assert_eq!(select_role("凯文", "演员"), "凯文");
        // Non-placeholder candidate preferred between two Latin roles.
        assert_eq!(select_role("Cop", "Detective"), "Detective");
        // Placeholders lose to real content.
        assert_eq!(select_role("演员", "Detective"), "Detective");
        // Two placeholders: candidate preferred.
        assert_eq!(select_role("演员", "配音"), "配音");
        // Both empty.
        assert_eq!(select_role("", ""), "");
    }

    #[test]
    fn test_normalize_name_strips_accents_and_case() {
        assert_eq!(normalize_name("Chloë Grace Moretz"), "chloegracemoretz");
        assert_eq!(normalize_name("LÉON: The Professional!"), "leontheprofessional");
        assert_eq!(normalize_name("周迅"), "周迅");
    }

    #[test]
    fn test_unified_rating_country_prefix_and_bare() {
        assert_eq!(unified_rating("us-R"), Some("17"));
        assert_eq!(unified_rating("R"), Some("17"));
        assert_eq!(unified_rating("PG-13"), Some("13"));
        assert_eq!(unified_rating("TV-G"), Some("0"));
        assert_eq!(unified_rating("de-16"), Some("16"));
        assert_eq!(unified_rating(""), None);
        assert_eq!(unified_rating("weird"), None);
    }

    fn actor(name: &str, role: &str) -> ScoredActor {
        ScoredActor {
            name: name.to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn test_quality_empty_cast() {
        assert!((evaluate_cast_quality(&[], 5, None, false) - 0.0).abs() < f64::EPSILON);
        assert!((evaluate_cast_quality(&[], 5, None, true) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_perfect_cast_no_penalty() {
        let cast: Vec<_> = (0..12).map(|i| actor(&format!("演员{i}"), "角色")).collect();
        let score = evaluate_cast_quality(&cast, 12, None, false);
        assert!((score - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_small_cast_penalty() {
        // 5 perfect actors: 10.0 * 5/10 = 5.0
        let cast: Vec<_> = (0..5).map(|i| actor(&format!("演员{i}"), "角色")).collect();
        let score = evaluate_cast_quality(&cast, 5, None, false);
        assert!((score - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_animation_skips_penalty() {
        let cast: Vec<_> = (0..5).map(|i| actor(&format!("声优{i}"), "角色")).collect();
        let score = evaluate_cast_quality(&cast, 5, None, true);
        assert!((score - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_expected_count_penalty() {
        // 12 perfect actors against an expectation of 30: 12 < 24, so ×12/30.
        let cast: Vec<_> = (0..12).map(|i| actor(&format!("演员{i}"), "角色")).collect();
        let score = evaluate_cast_quality(&cast, 12, Some(30), false);
        assert!((score - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_expected_threshold_is_fractional() {
        // The 0.8 threshold is a float comparison: 10 < 13 × 0.8 = 10.4
        // penalizes, which truncating integer math would miss.
        let cast: Vec<_> = (0..10).map(|i| actor(&format!("演员{i}"), "角色")).collect();
        let score = evaluate_cast_quality(&cast, 10, Some(13), false);
        assert!((score - 7.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_placeholder_role_scores_lower() {
        let real: Vec<_> = (0..10).map(|i| actor(&format!("演员{i}"), "主角")).collect();
        let placeholder: Vec<_> = (0..10).map(|i| actor(&format!("演员{i}"), "演员")).collect();
        assert!(
            evaluate_cast_quality(&real, 10, None, false)
                > evaluate_cast_quality(&placeholder, 10, None, false)
        );
    }

    #[test]
    fn test_quality_monotonic_in_cjk_actors() {
        // Adding a CJK-named, meaningful-role actor never decreases the
        // score when the count stays in the penalty-free zone.
        let mut cast: Vec<_> = (0..10).map(|i| actor(&format!("演员{i}"), "角色")).collect();
        let before = evaluate_cast_quality(&cast, 10, None, false);
        cast.push(actor("新演员", "新角色"));
        let after = evaluate_cast_quality(&cast, 11, None, false);
        assert!(after >= before);
    }

    #[test]
    fn test_format_cast_fills_and_orders() {
        let mut cast = vec![
            ProcessedActor {
                name: "b".into(),
                role: String::new(),
                emby_person_id: None,
                tmdb_person_id: None,
                imdb_id: None,
                douban_celebrity_id: None,
                order: 7,
            },
            ProcessedActor {
                name: "a".into(),
                role: "凯 文".into(),
                emby_person_id: None,
                tmdb_person_id: None,
                imdb_id: None,
                douban_celebrity_id: None,
                order: 2,
            },
        ];
        format_cast_list(&mut cast, false, false);
        assert_eq!(cast[0].name, "a");
        assert_eq!(cast[0].role, "凯文");
        assert_eq!(cast[0].order, 0);
        assert_eq!(cast[1].role, "演员");
        assert_eq!(cast[1].order, 1);
    }

    #[test]
    fn test_format_cast_role_prefix() {
        let mut cast = vec![ProcessedActor {
            name: "a".into(),
            role: "凯文".into(),
            emby_person_id: None,
            tmdb_person_id: None,
            imdb_id: None,
            douban_celebrity_id: None,
            order: 0,
        }];
        format_cast_list(&mut cast, false, true);
        assert_eq!(cast[0].role, "饰 凯文");

        let mut voice = vec![ProcessedActor {
            name: "a".into(),
            role: "凯文".into(),
            emby_person_id: None,
            tmdb_person_id: None,
            imdb_id: None,
            douban_celebrity_id: None,
            order: 0,
        }];
        format_cast_list(&mut voice, true, true);
        assert_eq!(voice[0].role, "配 凯文");
    }
}
