//! Parameter resolution (spec.md §6): for each logical parameter, the POST
//! body takes precedence over the URL query; within a precedence level the
//! first alias listed wins; a value present but invalid in the
//! higher-precedence source is a hard error — it never falls through to a
//! valid value in the lower-precedence source.

use std::collections::HashMap;

pub const API_KEY_ALIASES: &[&str] = &["apiKey", "api_key", "key"];
pub const QUERY_ALIASES: &[&str] = &["asn", "as", "ip", "q", "query"];

/// One candidate source for a parameter value, ordered by the precedence
/// spec.md §6 names: body first, then the URL query string.
pub struct ParamSources<'a> {
    pub body: Option<&'a HashMap<String, String>>,
    pub query: &'a HashMap<String, String>,
}

/// Case-insensitive lookup of any of `aliases` within one source map,
/// returning the first alias (in the order given) that is present.
fn lookup_in<'a>(map: &'a HashMap<String, String>, aliases: &[&str]) -> Option<&'a str> {
    for alias in aliases {
        for (k, v) in map {
            if k.eq_ignore_ascii_case(alias) {
                return Some(v.as_str());
            }
        }
    }
    None
}

/// A value resolved for one logical parameter along with which source it
/// came from, so callers can apply the "hard error, no fallback" rule when
/// validation fails.
pub struct Resolved<'a> {
    pub value: &'a str,
    pub from_body: bool,
}

impl<'a> ParamSources<'a> {
    pub fn resolve(&self, aliases: &[&str]) -> Option<Resolved<'a>> {
        if let Some(body) = self.body {
            if let Some(v) = lookup_in(body, aliases) {
                return Some(Resolved { value: v, from_body: true });
            }
        }
        lookup_in(self.query, aliases).map(|v| Resolved { value: v, from_body: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn body_wins_over_query() {
        let body = map(&[("apiKey", "from-body")]);
        let query = map(&[("apiKey", "from-query")]);
        let sources = ParamSources {
            body: Some(&body),
            query: &query,
        };
        let resolved = sources.resolve(API_KEY_ALIASES).unwrap();
        assert_eq!(resolved.value, "from-body");
        assert!(resolved.from_body);
    }

    #[test]
    fn falls_back_to_query_when_body_absent() {
        let query = map(&[("key", "from-query")]);
        let sources = ParamSources { body: None, query: &query };
        let resolved = sources.resolve(API_KEY_ALIASES).unwrap();
        assert_eq!(resolved.value, "from-query");
        assert!(!resolved.from_body);
    }

    #[test]
    fn first_listed_alias_wins_within_a_source() {
        let query = map(&[("api_key", "second"), ("apiKey", "first")]);
        let sources = ParamSources { body: None, query: &query };
        let resolved = sources.resolve(API_KEY_ALIASES).unwrap();
        assert_eq!(resolved.value, "first");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let query = map(&[("APIKEY", "v")]);
        let sources = ParamSources { body: None, query: &query };
        assert_eq!(sources.resolve(API_KEY_ALIASES).unwrap().value, "v");
    }
}
