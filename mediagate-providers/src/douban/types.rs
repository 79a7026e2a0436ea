//! Cultural Provider wire types

use serde::Deserialize;

/// An acting credit as the cultural provider reports it: Chinese name,
/// optional Latin name, role text, and a celebrity ID plus avatar link.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CulturalActor {
    pub id: Option<String>,
    pub name: String,
    pub latin_name: Option<String>,
    pub character: Option<String>,
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Avatar {
    pub large: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActingResponse {
    pub cast: Vec<CulturalActor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CelebrityDetails {
    pub id: Option<String>,
    pub name: String,
    pub latin_name: Option<String>,
    pub aka: Vec<String>,
    pub aka_en: Vec<String>,
    pub imdb_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acting_response_deserialize() {
        let json = r#"{
            "cast": [
                {"id": "1274297", "name": "周迅", "latin_name": "Xun Zhou",
                 "character": "饰 九儿", "avatar": {"large": "http://img/x.jpg"}},
                {"name": "无名氏"}
            ]
        }"#;
        let resp: ActingResponse = serde_json::from_str(json).expect("valid");
        assert_eq!(resp.cast.len(), 2);
        assert_eq!(resp.cast[0].name, "周迅");
        assert_eq!(resp.cast[0].character.as_deref(), Some("饰 九儿"));
        assert!(resp.cast[1].id.is_none());
    }
}
