use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: i32,
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default = "default_activated")]
    pub activated: bool,
    pub updated_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
}

fn default_activated() -> bool {
    true
}

impl User {
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let json = r#"{"id":7,"email":"a@b.c","password":"","firstName":"Ada","lastName":null,"activated":false,"updatedAt":null,"createdAt":"2021-05-01T10:20:30.123456"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, 7);
        assert!(!user.activated);
        assert!(user.created_at.is_some());
        assert_eq!(user.full_name(), "Ada");
    }

    #[test]
    fn test_serialize_camel_case() {
        let user = User {
            email: "a@b.c".to_string(),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert!(json.get("first_name").is_none());
    }
}
