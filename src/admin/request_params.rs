// Request-scoped parameters (the query string of a changelist request).

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    values: BTreeMap<String, String>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    /// Later duplicates win.
    pub fn from_query_string(query: &str) -> Result<Self, serde_urlencoded::de::Error> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query.trim_start_matches('?'))?;
        Ok(Self {
            values: pairs.into_iter().collect(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Remove a parameter, returning it. Later consumers no longer see it.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_query_strings() {
        let params = RequestParams::from_query_string("?status=IP&name=Jacob+Kaplan&flag").unwrap();
        assert_eq!(params.get("status"), Some("IP"));
        assert_eq!(params.get("name"), Some("Jacob Kaplan"));
        assert_eq!(params.get("flag"), Some(""));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_percent_encoded_values_are_decoded() {
        let params =
            RequestParams::from_query_string("name=Jacob%20Kaplan&status=approved&note=a%26b%3Dc")
                .unwrap();
        assert_eq!(params.get("name"), Some("Jacob Kaplan"));
        assert_eq!(params.get("note"), Some("a&b=c"));
        assert_eq!(params.get("status"), Some("approved"));
    }

    #[test]
    fn test_later_duplicates_win() {
        let params = RequestParams::from_query_string("age=34&age=35").unwrap();
        assert_eq!(params.get("age"), Some("35"));
    }

    #[test]
    fn test_take_removes_the_parameter() {
        let mut params = RequestParams::from_query_string("status=AP&age=34").unwrap();
        assert_eq!(params.take("status").as_deref(), Some("AP"));
        assert_eq!(params.get("status"), None);
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("age", "34")]);
    }

    #[test]
    fn test_empty_query_string_has_no_parameters() {
        assert!(RequestParams::from_query_string("").unwrap().is_empty());
        assert!(RequestParams::from_query_string("?").unwrap().is_empty());
    }
}
