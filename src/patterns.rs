use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A pattern as written in the configuration file.
///
/// A bare string is a literal substring, `{ "regex": "..." }` is a regular
/// expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Literal(String),
    Regex { regex: String },
}

/// A compiled pattern. Regexes are compiled once when configuration loads.
#[derive(Clone, Debug)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn is_match(&self, field: &str) -> bool {
        match self {
            Pattern::Literal(needle) => field.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(field),
        }
    }
}

/// The fields of a script element a pattern may match against.
#[derive(Clone, Copy, Debug, Default)]
pub struct Candidate<'a> {
    pub src: Option<&'a str>,
    pub id: Option<&'a str>,
    pub content: Option<&'a str>,
}

impl<'a> Candidate<'a> {
    fn fields(&self) -> impl Iterator<Item = &'a str> {
        [self.src, self.id, self.content]
            .into_iter()
            .flatten()
            .filter(|x| !x.is_empty())
    }
}

pub fn compile(set: &'static str, specs: &[PatternSpec]) -> Result<Vec<Pattern>> {
    //! Compiles every spec of a set, failing on the first empty pattern or
    //! bad regex.
    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| match spec {
            PatternSpec::Literal(x) | PatternSpec::Regex { regex: x } if x.is_empty() => {
                Err(Error::EmptyPattern { set, index })
            }
            PatternSpec::Literal(x) => Ok(Pattern::Literal(x.to_owned())),
            PatternSpec::Regex { regex } => {
                Regex::new(regex)
                    .map(Pattern::Regex)
                    .map_err(|source| Error::InvalidPattern {
                        set,
                        index,
                        pattern: regex.to_owned(),
                        source,
                    })
            }
        })
        .collect()
}

/// True iff a non-empty field of `candidate` is matched by one of `patterns`.
pub fn matches(candidate: &Candidate<'_>, patterns: &[Pattern]) -> bool {
    candidate
        .fields()
        .any(|field| patterns.iter().any(|p| p.is_match(field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(x: &str) -> Pattern {
        Pattern::Literal(x.to_string())
    }

    #[test]
    fn literal_matches_any_field() {
        let patterns = vec![literal("googletagmanager.com")];
        let by_src = Candidate {
            src: Some("https://www.googletagmanager.com/gtm.js?id=GTM-1"),
            ..Candidate::default()
        };
        let by_content = Candidate {
            content: Some("j.src='https://www.googletagmanager.com/gtm.js'"),
            ..Candidate::default()
        };
        let by_id = Candidate {
            id: Some("googletagmanager.com-loader"),
            ..Candidate::default()
        };
        assert!(matches(&by_src, &patterns));
        assert!(matches(&by_content, &patterns));
        assert!(matches(&by_id, &patterns));
    }

    #[test]
    fn missing_and_empty_fields_never_match() {
        let patterns = vec![literal("")];
        assert!(!matches(&Candidate::default(), &patterns));
        let empty = Candidate {
            src: Some(""),
            id: Some(""),
            content: Some(""),
        };
        assert!(!matches(&empty, &patterns));
    }

    #[test]
    fn regex_patterns() {
        let specs = vec![PatternSpec::Regex {
            regex: r"gtag\(".to_string(),
        }];
        let patterns = compile("offload", &specs).unwrap();
        let hit = Candidate {
            content: Some("gtag('config', 'G-1');"),
            ..Candidate::default()
        };
        let miss = Candidate {
            content: Some("var gtag;"),
            ..Candidate::default()
        };
        assert!(matches(&hit, &patterns));
        assert!(!matches(&miss, &patterns));
    }

    #[test]
    fn bad_regex_names_set_and_index() {
        let specs = vec![
            PatternSpec::Literal("ok".to_string()),
            PatternSpec::Regex {
                regex: "(unclosed".to_string(),
            },
        ];
        match compile("defer", &specs) {
            Err(Error::InvalidPattern { set, index, .. }) => {
                assert_eq!(set, "defer");
                assert_eq!(index, 1);
            }
            other => panic!("expected InvalidPattern, got {:?}", other),
        }
    }

    #[test]
    fn empty_patterns_are_rejected() {
        let literal = vec![
            PatternSpec::Literal("gtm".to_string()),
            PatternSpec::Literal(String::new()),
        ];
        assert!(matches!(
            compile("offload", &literal),
            Err(Error::EmptyPattern { set: "offload", index: 1 })
        ));

        let regex = vec![PatternSpec::Regex {
            regex: String::new(),
        }];
        assert!(matches!(
            compile("defer", &regex),
            Err(Error::EmptyPattern { set: "defer", index: 0 })
        ));

        let blank = vec![PatternSpec::Literal(" ".to_string())];
        assert_eq!(compile("defer", &blank).unwrap().len(), 1);
    }

    #[test]
    fn specs_deserialize_from_strings_and_objects() {
        let specs: Vec<PatternSpec> =
            serde_json::from_str(r#"["cdn.jsdelivr.net", {"regex": ".*weglot.*"}]"#).unwrap();
        assert_eq!(
            specs,
            vec![
                PatternSpec::Literal("cdn.jsdelivr.net".to_string()),
                PatternSpec::Regex {
                    regex: ".*weglot.*".to_string()
                },
            ]
        );
    }
}
