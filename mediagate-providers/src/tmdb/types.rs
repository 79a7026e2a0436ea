//! Metadata Provider wire types

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PagedResponse<T> {
    pub page: i64,
    pub results: Vec<T>,
    pub total_pages: i64,
    pub total_results: i64,
}

/// A search/discover result row. Movie and TV payloads use different field
/// names for the same concepts (`title` vs `name`); accessors normalize.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub original_title: Option<String>,
    pub original_name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub media_type: Option<String>,
    pub overview: Option<String>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub genre_ids: Vec<i64>,
    pub poster_path: Option<String>,
}

impl SearchResult {
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn original(&self) -> &str {
        self.original_title
            .as_deref()
            .or(self.original_name.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .filter(|d| !d.is_empty())
    }

    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.date()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Keyword {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductionCountry {
    pub iso_3166_1: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompanyRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreditEntry {
    pub id: i64,
    pub name: Option<String>,
    pub character: Option<String>,
    pub order: Option<i64>,
    pub job: Option<String>,
    pub department: Option<String>,
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credits {
    pub cast: Vec<CreditEntry>,
    pub crew: Vec<CreditEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeasonSummary {
    pub season_number: i64,
    pub episode_count: i64,
    pub air_date: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EpisodeSummary {
    pub episode_number: i64,
    pub season_number: i64,
    pub air_date: Option<String>,
    pub name: Option<String>,
    pub runtime: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeasonDetails {
    pub season_number: i64,
    pub air_date: Option<String>,
    pub episodes: Vec<EpisodeSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<i64>,
    pub overview: Option<String>,
    pub vote_average: f64,
    pub vote_count: i64,
    pub popularity: f64,
    pub genres: Vec<Genre>,
    pub production_countries: Vec<ProductionCountry>,
    pub production_companies: Vec<CompanyRef>,
    pub keywords: Option<KeywordsEnvelope>,
    pub credits: Option<Credits>,
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeywordsEnvelope {
    // Movie payloads use `keywords`, TV payloads use `results`.
    pub keywords: Vec<Keyword>,
    pub results: Vec<Keyword>,
}

impl KeywordsEnvelope {
    #[must_use]
    pub fn all(&self) -> Vec<&Keyword> {
        self.keywords.iter().chain(self.results.iter()).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TvDetails {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub original_language: Option<String>,
    pub first_air_date: Option<String>,
    pub last_air_date: Option<String>,
    pub in_production: bool,
    pub status: Option<String>,
    pub number_of_seasons: i64,
    pub number_of_episodes: i64,
    pub episode_run_time: Vec<i64>,
    pub overview: Option<String>,
    pub vote_average: f64,
    pub vote_count: i64,
    pub popularity: f64,
    pub genres: Vec<Genre>,
    pub production_countries: Vec<ProductionCountry>,
    pub networks: Vec<CompanyRef>,
    pub seasons: Vec<SeasonSummary>,
    pub next_episode_to_air: Option<EpisodeSummary>,
    pub keywords: Option<KeywordsEnvelope>,
    pub credits: Option<Credits>,
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalIds {
    pub imdb_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonDetails {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub also_known_as: Vec<String>,
    pub gender: Option<i64>,
    pub adult: bool,
    pub popularity: f64,
    pub profile_path: Option<String>,
    pub external_ids: Option<ExternalIds>,
    pub translations: Option<PersonTranslations>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonTranslations {
    pub translations: Vec<PersonTranslation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonTranslation {
    pub iso_639_1: String,
    pub data: PersonTranslationData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonTranslationData {
    pub name: Option<String>,
}

/// A filmography entry from combined credits; carries the actor's billing
/// `order` within that title.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilmographyEntry {
    pub id: i64,
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub original_title: Option<String>,
    pub original_name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub character: Option<String>,
    pub order: Option<i64>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub genre_ids: Vec<i64>,
    pub poster_path: Option<String>,
}

impl FilmographyEntry {
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .filter(|d| !d.is_empty())
    }

    #[must_use]
    pub fn is_movie(&self) -> bool {
        match self.media_type.as_deref() {
            Some(t) => t == "movie",
            None => self.title.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CombinedCredits {
    pub cast: Vec<FilmographyEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListPage {
    pub page: i64,
    pub total_pages: i64,
    pub items: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_result_normalizes_movie_and_tv() {
        let movie: SearchResult = serde_json::from_str(
            r#"{"id": 1, "title": "Heat", "original_title": "Heat", "release_date": "1995-12-15"}"#,
        )
        .expect("valid");
        assert_eq!(movie.display_title(), "Heat");
        assert_eq!(movie.year(), Some(1995));

        let tv: SearchResult = serde_json::from_str(
            r#"{"id": 2, "name": "Dark", "original_name": "Dark", "first_air_date": "2017-12-01"}"#,
        )
        .expect("valid");
        assert_eq!(tv.display_title(), "Dark");
        assert_eq!(tv.original(), "Dark");
        assert_eq!(tv.year(), Some(2017));
    }

    #[test]
    fn test_empty_date_is_none() {
        let r: SearchResult =
            serde_json::from_str(r#"{"id": 3, "title": "X", "release_date": ""}"#).expect("valid");
        assert!(r.date().is_none());
        assert!(r.year().is_none());
    }

    #[test]
    fn test_keywords_envelope_merges_both_shapes() {
        let movie_shape: KeywordsEnvelope =
            serde_json::from_str(r#"{"keywords": [{"id": 1, "name": "heist"}]}"#).expect("valid");
        let tv_shape: KeywordsEnvelope =
            serde_json::from_str(r#"{"results": [{"id": 2, "name": "time travel"}]}"#)
                .expect("valid");
        assert_eq!(movie_shape.all().len(), 1);
        assert_eq!(tv_shape.all().len(), 1);
    }

    #[test]
    fn test_filmography_media_type_fallback() {
        let no_type: FilmographyEntry =
            serde_json::from_str(r#"{"id": 9, "title": "Film"}"#).expect("valid");
        assert!(no_type.is_movie());
        let tv: FilmographyEntry =
            serde_json::from_str(r#"{"id": 9, "name": "Show", "media_type": "tv"}"#)
                .expect("valid");
        assert!(!tv.is_movie());
    }
}
